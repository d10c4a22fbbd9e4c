//! Turning agent output into input for the next stage.
//!
//! Two jobs live here: reading the question list out of free text (with a
//! deterministic fallback), and merging parallel results into one labeled
//! block in a fixed order.

use std::sync::LazyLock;

use heavy_core::AgentRunResult;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

/// Research agents in canonical order. Question `i` goes to agent `i`.
pub const RESEARCH_AGENTS: [&str; 4] = ["research", "analysis", "alternatives", "verification"];

pub const VALIDATION_AGENTS: [&str; 2] = ["validator_1", "validator_2"];

const FRAMINGS: [&str; 4] = [
    "Research comprehensive information about",
    "Analyze and provide insights about",
    "Find alternative perspectives on",
    "Verify and cross-check facts about",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuestionParseError {
    #[error("not valid JSON: {0}")]
    Json(String),
    #[error("expected a JSON array")]
    NotAnArray,
    #[error("item {index} is not a string")]
    NonStringItem { index: usize },
    #[error("expected {expected} items, got {got}")]
    WrongCount { expected: usize, got: usize },
}

/// Parse a JSON array of exactly `expected` strings out of model output.
///
/// The whole text is tried first. Failing that, the first array found at any
/// `[` wins, which covers prose or repeated transcripts around the array.
pub fn parse_questions(text: &str, expected: usize) -> Result<Vec<String>, QuestionParseError> {
    let body = strip_code_fence(text.trim());

    let value = match serde_json::from_str::<Value>(body) {
        Ok(value) => value,
        Err(strict_err) => find_embedded_array(body)
            .ok_or_else(|| QuestionParseError::Json(strict_err.to_string()))?,
    };

    let Value::Array(items) = value else {
        return Err(QuestionParseError::NotAnArray);
    };

    let questions = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::String(s) => Ok(s),
            _ => Err(QuestionParseError::NonStringItem { index }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    if questions.len() != expected {
        return Err(QuestionParseError::WrongCount {
            expected,
            got: questions.len(),
        });
    }
    Ok(questions)
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (```json) up to the first newline.
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end()
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

fn find_embedded_array(text: &str) -> Option<Value> {
    text.match_indices('[').find_map(|(start, _)| {
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value @ Value::Array(_))) => Some(value),
            _ => None,
        }
    })
}

/// The four framed questions used when question generation fails.
pub fn fallback_questions(query: &str) -> Vec<String> {
    FRAMINGS
        .iter()
        .map(|framing| format!("{}: {}", framing, query))
        .collect()
}

/// `count` framed sub-tasks, cycling the framings when more than four are
/// needed.
pub fn fallback_subtasks(query: &str, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            let framed = format!("{}: {}", FRAMINGS[i % FRAMINGS.len()], query);
            if i < FRAMINGS.len() {
                framed
            } else {
                format!("{} (perspective {})", framed, i + 1)
            }
        })
        .collect()
}

/// The response of the agent with the given id, if it ran.
pub fn response_for<'a>(results: &'a [AgentRunResult], agent_id: &str) -> Option<&'a str> {
    results
        .iter()
        .find(|r| r.agent_id() == agent_id)
        .map(AgentRunResult::response)
}

/// Merge results into `=== ID AGENT ===` blocks in `order`, regardless of the
/// order in `results`. Results whose id is not in `order` follow at the end.
pub fn merge_labeled(results: &[AgentRunResult], order: &[&str]) -> String {
    let known = order
        .iter()
        .filter_map(|id| results.iter().find(|r| r.agent_id() == *id));
    let extra = results
        .iter()
        .filter(|r| !order.contains(&r.agent_id()));

    known
        .chain(extra)
        .map(|r| {
            format!(
                "=== {} AGENT ===\n{}\n\n",
                r.agent_id().to_uppercase(),
                r.response()
            )
        })
        .collect()
}

/// Merge results into numbered blocks, keeping their order.
pub fn merge_in_order(results: &[AgentRunResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("=== AGENT {} ===\n{}\n\n", i + 1, r.response()))
        .collect()
}

static ANSI_ESCAPES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").unwrap());
static STATUS_GLYPHS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("[●○◐◑◒◓✓✗×·🔄🔧📞💭✅❌⚠🚨📋🔍📝💡🎯⚡🚀]\u{FE0F}?").unwrap()
});
static HEAVY_EMPHASIS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*{3,}").unwrap());
static DEEP_HEADINGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#{4,}[ \t]*").unwrap());
static LONE_STARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[ \t]*\*[ \t]*$").unwrap());
static BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Strip terminal decoration from text shown to the user.
pub fn clean_output(text: &str) -> String {
    let text = ANSI_ESCAPES.replace_all(text, "");
    let text = STATUS_GLYPHS.replace_all(&text, "");
    let text = HEAVY_EMPHASIS.replace_all(&text, "**");
    let text = DEEP_HEADINGS.replace_all(&text, "### ");
    let text = LONE_STARS.replace_all(&text, "");
    let text = BLANK_RUNS.replace_all(&text, "\n\n");
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_exact_array() {
        let text = r#"["a", "b", "c", "d"]"#;
        assert_eq!(parse_questions(text, 4).unwrap(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_parse_fenced_array() {
        let text = "```json\n[\"a\", \"b\", \"c\", \"d\"]\n```";
        assert_eq!(parse_questions(text, 4).unwrap().len(), 4);
    }

    #[test]
    fn test_parse_embedded_array() {
        let text = "Here you go:\n[\"one\", \"two\", \"three\", \"four\"]\n\n[\"one\", \"two\", \"three\", \"four\"]";
        assert_eq!(
            parse_questions(text, 4).unwrap(),
            vec!["one", "two", "three", "four"]
        );
    }

    #[test]
    fn test_parse_skips_bracket_noise() {
        let text = "Angles [draft]: [\"a\", \"b\", \"c\", \"d\"]";
        assert_eq!(parse_questions(text, 4).unwrap()[3], "d");
    }

    #[test]
    fn test_parse_shape_errors() {
        assert_eq!(
            parse_questions(r#"["a", "b"]"#, 4),
            Err(QuestionParseError::WrongCount { expected: 4, got: 2 })
        );
        assert_eq!(
            parse_questions(r#"["a", 2, "c", "d"]"#, 4),
            Err(QuestionParseError::NonStringItem { index: 1 })
        );
        assert_eq!(
            parse_questions(r#"{"questions": []}"#, 4),
            Err(QuestionParseError::NotAnArray)
        );
        assert!(matches!(
            parse_questions("no json here", 4),
            Err(QuestionParseError::Json(_))
        ));
    }

    #[test]
    fn test_fallback_is_deterministic() {
        let first = fallback_questions("What is 2+2?");
        assert_eq!(first, fallback_questions("What is 2+2?"));
        assert_eq!(first.len(), 4);
        assert_eq!(first[0], "Research comprehensive information about: What is 2+2?");
        assert_eq!(first[3], "Verify and cross-check facts about: What is 2+2?");
    }

    #[test]
    fn test_fallback_subtasks_cycle() {
        let tasks = fallback_subtasks("q", 6);
        assert_eq!(tasks.len(), 6);
        assert_eq!(tasks[1], "Analyze and provide insights about: q");
        assert_eq!(tasks[4], "Research comprehensive information about: q (perspective 5)");
        assert!(fallback_subtasks("q", 0).is_empty());
    }

    #[test]
    fn test_merge_uses_canonical_order() {
        let results = vec![
            AgentRunResult::success("verification", "checked", Duration::ZERO),
            AgentRunResult::error("analysis", "Error: boom"),
            AgentRunResult::success("research", "facts", Duration::ZERO),
            AgentRunResult::success("alternatives", "others", Duration::ZERO),
        ];
        let merged = merge_labeled(&results, &RESEARCH_AGENTS);
        assert_eq!(
            merged,
            "=== RESEARCH AGENT ===\nfacts\n\n\
             === ANALYSIS AGENT ===\nError: boom\n\n\
             === ALTERNATIVES AGENT ===\nothers\n\n\
             === VERIFICATION AGENT ===\nchecked\n\n"
        );
    }

    #[test]
    fn test_merge_appends_unknown_ids() {
        let results = vec![
            AgentRunResult::success("extra", "x", Duration::ZERO),
            AgentRunResult::success("research", "r", Duration::ZERO),
        ];
        let merged = merge_labeled(&results, &RESEARCH_AGENTS);
        assert!(merged.starts_with("=== RESEARCH AGENT ===\nr"));
        assert!(merged.ends_with("=== EXTRA AGENT ===\nx\n\n"));
    }

    #[test]
    fn test_merge_in_order() {
        let results = vec![
            AgentRunResult::success("agent_0", "a", Duration::ZERO),
            AgentRunResult::success("agent_1", "b", Duration::ZERO),
        ];
        assert_eq!(
            merge_in_order(&results),
            "=== AGENT 1 ===\na\n\n=== AGENT 2 ===\nb\n\n"
        );
    }

    #[test]
    fn test_response_for() {
        let results = vec![AgentRunResult::success("validator_1", "ok", Duration::ZERO)];
        assert_eq!(response_for(&results, "validator_1"), Some("ok"));
        assert_eq!(response_for(&results, "validator_2"), None);
    }

    #[test]
    fn test_clean_output() {
        let raw = "\x1b[32m✓ Done\x1b[0m\n\n\n\n##### Deep\n***bold***\n  *  \nend   ";
        assert_eq!(clean_output(raw), "Done\n\n### Deep\n**bold**\n\nend");
    }

    #[test]
    fn test_clean_output_keeps_markdown() {
        let text = "## Executive Summary\nIt is **4**.\n\n- item";
        assert_eq!(clean_output(text), text);
    }
}
