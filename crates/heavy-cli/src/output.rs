//! Printing progress and answers.
//!
//! Human output sends progress to stderr and the answer to stdout. JSON
//! output writes one event object per line to stdout.

use std::io::Write;

use clap::ValueEnum;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use heavy_core::{AgentRunResult, StageStatus};
use heavy_orchestrator::{clean_output, PipelineResult, ProgressEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Output {
    Human,
    Json,
}

impl Output {
    pub fn status(self, message: &str) {
        match self {
            Output::Human => eprintln!("==> {}", message),
            Output::Json => emit(json!({"type": "status", "message": message})),
        }
    }

    pub fn progress(self, event: &ProgressEvent) {
        match self {
            Output::Human => {
                // Stage starts are already announced by `status`.
                if let ProgressEvent::Agent { agent_id, status } = event {
                    eprintln!("    {:<14} {}", agent_id, human_status(*status));
                }
            }
            Output::Json => match serde_json::to_value(event) {
                Ok(value) => emit(value),
                Err(e) => tracing::warn!(error = %e, "Failed to serialize progress event"),
            },
        }
    }

    /// Print events until the reporter closes the channel.
    pub async fn forward(self, mut events: mpsc::UnboundedReceiver<ProgressEvent>) {
        while let Some(event) = events.recv().await {
            self.progress(&event);
        }
    }

    pub fn result(self, content: &str, details: Option<Value>) {
        match self {
            Output::Human => {
                println!("{}", content);
            }
            Output::Json => {
                let mut event = json!({"type": "result", "content": content});
                if let Some(details) = details {
                    event["details"] = details;
                }
                emit(event);
            }
        }
    }

    pub fn error(self, message: &str) {
        match self {
            Output::Human => eprintln!("Error: {}", message),
            Output::Json => emit(json!({"type": "error", "message": message})),
        }
    }

    pub fn done(self) {
        if self == Output::Json {
            emit(json!({"type": "done"}));
        }
    }

    /// Intermediate pipeline output. JSON mode carries it in the result
    /// event instead.
    pub fn thinking(self, result: &PipelineResult) {
        if self == Output::Json {
            return;
        }

        if !result.questions().is_empty() {
            eprintln!("\n--- Questions ---");
            for (i, question) in result.questions().iter().enumerate() {
                eprintln!("{}. {}", i + 1, question);
            }
        }
        print_agents("Research", result.research_results());
        if let Some(draft) = result.first_draft() {
            eprintln!("\n--- Draft ---\n{}", clean_output(draft));
        }
        print_agents("Validation", result.validation_results());
        eprintln!();
    }
}

fn print_agents(heading: &str, results: &[AgentRunResult]) {
    for result in results {
        let marker = if result.is_success() { "" } else { " (failed)" };
        eprintln!(
            "\n--- {}: {}{} [{:.1}s] ---\n{}",
            heading,
            result.agent_id(),
            marker,
            result.execution_time().as_secs_f64(),
            clean_output(result.response())
        );
    }
}

fn human_status(status: StageStatus) -> &'static str {
    match status {
        StageStatus::NotStarted => "waiting",
        StageStatus::Queued => "queued",
        StageStatus::InProgress => "working",
        StageStatus::Completed => "done",
        StageStatus::Failed => "failed",
    }
}

fn emit(event: Value) {
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{}", event);
    let _ = stdout.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_event_payload() {
        let event = ProgressEvent::Stage {
            stage: "validation".into(),
            status: StageStatus::InProgress,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "megamind_stage", "stage": "validation", "status": "IN_PROGRESS"})
        );
    }

    #[test]
    fn test_human_status_words() {
        assert_eq!(human_status(StageStatus::Completed), "done");
        assert_eq!(human_status(StageStatus::Failed), "failed");
    }
}
