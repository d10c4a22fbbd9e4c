//! Interactive single-agent session.

use std::sync::Arc;

use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use heavy_core::Provider;
use heavy_orchestrator::clean_output;

use crate::config::Config;
use crate::create_agent;

const EXIT_WORDS: [&str; 3] = ["quit", "exit", "bye"];

pub async fn run(provider: Arc<dyn Provider>, config: &Config) -> Result<()> {
    if !atty::is(atty::Stream::Stdin) {
        anyhow::bail!("chat needs an interactive terminal; use `heavy run <prompt>` instead");
    }

    let agent = create_agent(provider, config, "chat");
    let mut editor = DefaultEditor::new()?;

    println!("heavy chat ({}). Type 'quit', 'exit' or 'bye' to leave.", config.provider);
    if let Some(model) = &config.provider_settings().model {
        println!("Model: {}", model);
    }

    loop {
        let line = match editor.readline("you> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                return Ok(());
            }
            Err(e) => return Err(anyhow::anyhow!("Error reading input: {}", e)),
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(input);
        if is_exit(input) {
            println!("Goodbye!");
            return Ok(());
        }

        eprintln!("Thinking...");
        match agent.run(input, &[]).await {
            Ok(answer) => println!("\n{}\n", clean_output(&answer)),
            Err(e) => eprintln!("Error: {}", e),
        }
    }
}

fn is_exit(input: &str) -> bool {
    EXIT_WORDS.iter().any(|word| input.eq_ignore_ascii_case(word))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_words() {
        assert!(is_exit("quit"));
        assert!(is_exit("BYE"));
        assert!(!is_exit("quite"));
    }
}
