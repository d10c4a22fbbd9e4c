//! Arithmetic expression evaluation.
//!
//! Supports `+ - * / %`, `^` (or `**`) for powers, parentheses, unary minus,
//! the constants `pi` and `e`, and the functions `sqrt abs ln log exp sin
//! cos tan floor ceil round`.

use async_trait::async_trait;
use serde::Deserialize;

use heavy_core::{Error, PropertySchema, Tool, ToolDefinition, ToolOutput, ToolParameters};

pub struct CalculatorTool;

#[derive(Deserialize)]
struct CalculatorArgs {
    expression: String,
}

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate a mathematical expression. Supports + - * / % ^, parentheses, \
         pi, e, and sqrt, abs, ln, log, exp, sin, cos, tan, floor, ceil, round."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(
            ToolParameters::new().add_property(
                "expression",
                PropertySchema::string("The expression to evaluate, e.g. '(2 + 3) * sqrt(16)'"),
                true,
            ),
        )
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, Error> {
        let args: CalculatorArgs = serde_json::from_value(arguments)
            .map_err(|e| Error::tool("calculator", format!("Invalid arguments: {}", e)))?;

        match evaluate(&args.expression) {
            Ok(value) => Ok(ToolOutput::success(format!(
                "{} = {}",
                args.expression.trim(),
                format_number(value)
            ))),
            Err(reason) => Ok(ToolOutput::error(format!(
                "Cannot evaluate '{}': {}",
                args.expression, reason
            ))),
        }
    }
}

/// Deepest nesting of parentheses, signs and exponents the parser accepts.
const MAX_DEPTH: usize = 256;

/// Evaluate an expression to a finite number.
pub fn evaluate(expression: &str) -> Result<f64, String> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if let Some(token) = parser.peek() {
        return Err(format!("unexpected {}", token));
    }
    if !value.is_finite() {
        return Err("result is not a finite number".to_string());
    }
    Ok(value)
}

/// Integral values print without a fractional part.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Num(n) => write!(f, "number {}", n),
            Token::Ident(name) => write!(f, "'{}'", name),
            Token::Op(op) => write!(f, "'{}'", op),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() || (c == ',' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) {
            // Thousands separators are dropped along with whitespace.
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.' || chars[i] == ',') {
                i += 1;
            }
            let literal: String = chars[start..i].iter().filter(|c| **c != ',').collect();
            let n = literal
                .parse::<f64>()
                .map_err(|_| format!("invalid number '{}'", literal))?;
            tokens.push(Token::Num(n));
            continue;
        }

        if c.is_ascii_alphabetic() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_alphanumeric() {
                i += 1;
            }
            let ident: String = chars[start..i].iter().collect();
            tokens.push(Token::Ident(ident.to_ascii_lowercase()));
            continue;
        }

        let token = match c {
            '*' if chars.get(i + 1) == Some(&'*') => {
                i += 1;
                Token::Op('^')
            }
            '+' | '-' | '*' | '/' | '%' | '^' => Token::Op(c),
            '(' => Token::LParen,
            ')' => Token::RParen,
            _ => return Err(format!("unexpected character '{}'", c)),
        };
        tokens.push(token);
        i += 1;
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat_op(&mut self, ops: &[char]) -> Option<char> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        while let Some(op) = self.eat_op(&['+', '-']) {
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    // term := unary (('*' | '/' | '%') unary)*
    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.unary()?;
        while let Some(op) = self.eat_op(&['*', '/', '%']) {
            let rhs = self.unary()?;
            value = match op {
                '*' => value * rhs,
                _ if rhs == 0.0 => return Err("division by zero".to_string()),
                '/' => value / rhs,
                _ => value % rhs,
            };
        }
        Ok(value)
    }

    // unary := ('-' | '+') unary | power
    //
    // Every recursive path passes through here, so this is where nesting
    // depth is bounded.
    fn unary(&mut self) -> Result<f64, String> {
        if self.depth >= MAX_DEPTH {
            return Err(format!("expression nested deeper than {} levels", MAX_DEPTH));
        }
        self.depth += 1;
        let value = match self.eat_op(&['-', '+']) {
            Some('-') => self.unary().map(|v| -v),
            Some(_) => self.unary(),
            None => self.power(),
        };
        self.depth -= 1;
        value
    }

    // power := primary ('^' unary)?, right associative
    fn power(&mut self) -> Result<f64, String> {
        let base = self.primary()?;
        if self.eat_op(&['^']).is_some() {
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, String> {
        match self.next() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.expr()?;
                self.expect_rparen()?;
                Ok(value)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "pi" => Ok(std::f64::consts::PI),
                "e" => Ok(std::f64::consts::E),
                _ => {
                    if self.next() != Some(Token::LParen) {
                        return Err(format!("unknown identifier '{}'", name));
                    }
                    let arg = self.expr()?;
                    self.expect_rparen()?;
                    apply(&name, arg)
                }
            },
            Some(token) => Err(format!("unexpected {}", token)),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn expect_rparen(&mut self) -> Result<(), String> {
        match self.next() {
            Some(Token::RParen) => Ok(()),
            _ => Err("missing ')'".to_string()),
        }
    }
}

fn apply(function: &str, arg: f64) -> Result<f64, String> {
    let value = match function {
        "sqrt" if arg < 0.0 => return Err("square root of a negative number".to_string()),
        "sqrt" => arg.sqrt(),
        "abs" => arg.abs(),
        "ln" | "log" | "log10" if arg <= 0.0 => {
            return Err("logarithm of a non-positive number".to_string())
        }
        "ln" => arg.ln(),
        "log" | "log10" => arg.log10(),
        "exp" => arg.exp(),
        "sin" => arg.sin(),
        "cos" => arg.cos(),
        "tan" => arg.tan(),
        "floor" => arg.floor(),
        "ceil" => arg.ceil(),
        "round" => arg.round(),
        _ => return Err(format!("unknown function '{}'", function)),
    };
    Ok(value)
}
