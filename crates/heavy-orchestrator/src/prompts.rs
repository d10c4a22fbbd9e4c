//! Prompt templates for the orchestration stages.
//!
//! Templates use `{name}` placeholders. Unknown placeholders are left as-is,
//! so literal braces in a template are safe.

use serde::{Deserialize, Serialize};

pub const QUESTION_GENERATION_PROMPT: &str = r#"You are a strategic question generator. Given a user query, generate exactly 4 specialized questions that will help gather comprehensive information.

Original query: {user_input}

Generate 4 questions, each from a different angle:
1. Research-focused: Gather factual information and data
2. Analysis-focused: Examine implications, patterns, and deeper meaning
3. Alternatives-focused: Explore different approaches, options, or perspectives
4. Verification-focused: Cross-check facts, identify potential issues or contradictions

Return ONLY a JSON array of 4 strings:
["research question", "analysis question", "alternatives question", "verification question"]"#;

pub const SYNTHESIS_PROMPT: &str = r#"You have received responses from 4 specialized research agents analyzing a query from different angles.

AGENT RESPONSES:
{agent_responses}

Synthesize these into a comprehensive first draft that combines insights from all perspectives.
Focus on creating a cohesive, well-organized response.
Do not mention that this is a synthesis or draft."#;

pub const ACCURACY_VALIDATION_PROMPT: &str = r#"You are Validation Agent 1: Accuracy Checker.

ORIGINAL USER QUERY:
{original_query}

DRAFT ANSWER:
{draft_answer}

Your task:
1. Verify the draft actually answers the original question
2. Check for factual accuracy and consistency
3. Identify any gaps or missing information
4. Suggest specific improvements

Provide a structured critique with:
- Accuracy score (1-10)
- List of issues found
- Suggested improvements"#;

pub const QUALITY_VALIDATION_PROMPT: &str = r#"You are Validation Agent 2: Quality Reviewer.

ORIGINAL USER QUERY:
{original_query}

DRAFT ANSWER:
{draft_answer}

Your task:
1. Evaluate clarity and organization
2. Check for completeness and depth
3. Assess if the response is actionable and useful
4. Suggest improvements for readability

Provide a structured critique with:
- Quality score (1-10)
- Strengths of the response
- Areas for improvement"#;

pub const FINAL_SYNTHESIS_PROMPT: &str = r###"You are the Final Synthesis Agent. Your job is to create the definitive answer.

ORIGINAL USER QUERY:
{original_query}

FIRST DRAFT:
{draft_answer}

VALIDATION AGENT 1 FEEDBACK:
{validation_1}

VALIDATION AGENT 2 FEEDBACK:
{validation_2}

Create the final, polished answer.

STRUCTURE YOUR RESPONSE EXACTLY AS FOLLOWS:

## Executive Summary
[Provide a concise 2-3 sentence summary of the answer]

## Final Answer
[Provide the complete but focused answer. Integrate the validation feedback to improve accuracy and clarity. Avoid unnecessary verbosity or showing the step-by-step working unless asked.]

IMPORTANT:
- Do NOT output any JSON at the end.
- Do NOT mention "Validation Agent" or "Draft" in the final text.
- Start directly with the header "## Executive Summary"."###;

pub const DECOMPOSITION_PROMPT: &str = r#"You are a task planner. Break the user's request into exactly {num_agents} independent sub-tasks that can be researched in parallel and together cover the whole request.

User request: {user_input}

Each sub-task should be a self-contained question or instruction that makes sense without the others.

Return ONLY a JSON array of {num_agents} strings."#;

pub const AGGREGATION_PROMPT: &str = r#"You have received responses from {num_agents} agents, each working on one part of the user's request.

ORIGINAL USER REQUEST:
{user_input}

AGENT RESPONSES:
{agent_responses}

Combine these into one complete, well-organized answer to the original request.
Resolve contradictions, remove repetition, and do not mention the individual agents."#;

/// The full set of stage prompts. Every field can be overridden from
/// configuration; missing fields keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptTemplates {
    pub question_generation: String,
    pub synthesis: String,
    pub accuracy_validation: String,
    pub quality_validation: String,
    pub final_synthesis: String,
    pub decomposition: String,
    pub aggregation: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            question_generation: QUESTION_GENERATION_PROMPT.to_string(),
            synthesis: SYNTHESIS_PROMPT.to_string(),
            accuracy_validation: ACCURACY_VALIDATION_PROMPT.to_string(),
            quality_validation: QUALITY_VALIDATION_PROMPT.to_string(),
            final_synthesis: FINAL_SYNTHESIS_PROMPT.to_string(),
            decomposition: DECOMPOSITION_PROMPT.to_string(),
            aggregation: AGGREGATION_PROMPT.to_string(),
        }
    }
}

impl PromptTemplates {
    pub fn question_generation(&self, user_input: &str) -> String {
        render(&self.question_generation, &[("user_input", user_input)])
    }

    pub fn synthesis(&self, agent_responses: &str) -> String {
        render(&self.synthesis, &[("agent_responses", agent_responses)])
    }

    pub fn accuracy_validation(&self, original_query: &str, draft_answer: &str) -> String {
        render(
            &self.accuracy_validation,
            &[("original_query", original_query), ("draft_answer", draft_answer)],
        )
    }

    pub fn quality_validation(&self, original_query: &str, draft_answer: &str) -> String {
        render(
            &self.quality_validation,
            &[("original_query", original_query), ("draft_answer", draft_answer)],
        )
    }

    pub fn final_synthesis(
        &self,
        original_query: &str,
        draft_answer: &str,
        validation_1: &str,
        validation_2: &str,
    ) -> String {
        render(
            &self.final_synthesis,
            &[
                ("original_query", original_query),
                ("draft_answer", draft_answer),
                ("validation_1", validation_1),
                ("validation_2", validation_2),
            ],
        )
    }

    pub fn decomposition(&self, user_input: &str, num_agents: usize) -> String {
        render(
            &self.decomposition,
            &[("user_input", user_input), ("num_agents", &num_agents.to_string())],
        )
    }

    pub fn aggregation(&self, user_input: &str, agent_responses: &str, num_agents: usize) -> String {
        render(
            &self.aggregation,
            &[
                ("user_input", user_input),
                ("agent_responses", agent_responses),
                ("num_agents", &num_agents.to_string()),
            ],
        )
    }
}

/// Substitute `{key}` placeholders in a single pass, so substituted values
/// are never themselves expanded.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let substituted = after.find('}').and_then(|close| {
            let key = &after[..close];
            values
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value, close))
        });
        match substituted {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
