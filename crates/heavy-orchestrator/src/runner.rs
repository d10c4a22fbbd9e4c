//! Running agents on behalf of a stage, with progress tracking.

use std::sync::Arc;
use std::time::{Duration, Instant};

use heavy_core::{
    run_bounded, AgentConfig, AgentLoop, AgentRunResult, Attachment, Error, ProgressTracker,
    Provider, StageStatus, TaskOutcome, ToolRegistry,
};
use tracing::{debug, warn};

use crate::aggregate::clean_output;

/// Builds identically configured agents that differ only in id and tools.
#[derive(Clone)]
pub struct AgentFactory {
    provider: Arc<dyn Provider>,
    tools: ToolRegistry,
    system_prompt: Option<String>,
    max_iterations: usize,
    model: Option<String>,
}

impl AgentFactory {
    pub fn new(provider: Arc<dyn Provider>, tools: ToolRegistry) -> Self {
        Self {
            provider,
            tools,
            system_prompt: None,
            max_iterations: heavy_core::DEFAULT_MAX_ITERATIONS,
            model: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// A fresh agent with the full tool set.
    pub fn create(&self, id: &str) -> AgentLoop {
        let mut config = AgentConfig::new(id).with_max_iterations(self.max_iterations);
        if let Some(prompt) = &self.system_prompt {
            config = config.with_system_prompt(prompt.as_str());
        }
        if let Some(model) = &self.model {
            config = config.with_model(model.as_str());
        }
        AgentLoop::new(Arc::clone(&self.provider), self.tools.clone(), config)
    }

    /// A fresh agent limited to the named tools.
    pub fn create_with_tools(&self, id: &str, tools: &[&str]) -> AgentLoop {
        let mut agent = self.create(id);
        agent.retain_tools(tools);
        agent
    }
}

/// Run one agent to completion, mirroring its progress into the tracker.
pub(crate) async fn run_tracked(
    agent: &AgentLoop,
    prompt: &str,
    attachments: &[Attachment],
    tracker: &ProgressTracker,
) -> Result<AgentRunResult, Error> {
    let id = agent.id().as_str();
    tracker.update_agent(id, StageStatus::InProgress, None);
    let started = Instant::now();

    match agent.run(prompt, attachments).await {
        Ok(text) => {
            let elapsed = started.elapsed();
            debug!(agent = id, elapsed_ms = elapsed.as_millis() as u64, "Agent finished");
            tracker.update_agent(id, StageStatus::Completed, Some(clean_output(&text)));
            Ok(AgentRunResult::success(id, text, elapsed))
        }
        Err(e) => {
            warn!(agent = id, error = %e, "Agent failed");
            tracker.update_agent(id, StageStatus::Failed, Some(e.to_string()));
            Err(e)
        }
    }
}

/// One unit of work in a fan-out stage.
pub(crate) struct AgentTask {
    pub agent: AgentLoop,
    pub prompt: String,
}

/// Run every task concurrently, at most `tasks.len()` at a time, under one
/// deadline for the whole batch.
///
/// Always returns one result per task, in task order. Failures, panics and
/// tasks still running at the deadline become error results.
pub(crate) async fn fan_out(
    tasks: Vec<AgentTask>,
    attachments: &[Attachment],
    tracker: &Arc<ProgressTracker>,
    timeout: Duration,
) -> Vec<AgentRunResult> {
    let ids: Vec<String> = tasks
        .iter()
        .map(|task| task.agent.id().as_str().to_string())
        .collect();
    for id in &ids {
        tracker.update_agent(id, StageStatus::Queued, None);
    }

    let width = tasks.len();
    let futures: Vec<_> = tasks
        .into_iter()
        .map(|task| {
            let tracker = Arc::clone(tracker);
            let attachments = attachments.to_vec();
            async move { run_tracked(&task.agent, &task.prompt, &attachments, &tracker).await }
        })
        .collect();

    let outcomes = run_bounded(futures, width, timeout).await;

    ids.into_iter()
        .zip(outcomes)
        .map(|(id, outcome)| match outcome {
            TaskOutcome::Completed(Ok(result)) => result,
            TaskOutcome::Completed(Err(e)) => AgentRunResult::error(id, format!("Error: {}", e)),
            TaskOutcome::Panicked(message) => {
                let message = format!("Agent panicked: {}", message);
                tracker.update_agent(&id, StageStatus::Failed, Some(message.clone()));
                AgentRunResult::error(id, message)
            }
            TaskOutcome::TimedOut => {
                warn!(agent = %id, timeout_secs = timeout.as_secs_f64(), "Agent timed out");
                let message = format!("Agent timed out after {}s", timeout.as_secs_f64());
                tracker.update_agent(&id, StageStatus::Failed, Some(message.clone()));
                AgentRunResult::error(id, message)
            }
        })
        .collect()
}
