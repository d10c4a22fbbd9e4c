//! Split a task into N sub-tasks, run them in parallel, merge the answers.

use std::sync::Arc;

use heavy_core::{AgentRunResult, ProgressTracker, StageStatus, COMPLETION_TOOL};
use serde::Serialize;
use tracing::{info, warn};

use crate::aggregate::{fallback_subtasks, merge_in_order, parse_questions};
use crate::pipeline::{enter, leave, OrchestratorConfig, StageCallback};
use crate::prompts::PromptTemplates;
use crate::runner::{fan_out, run_tracked, AgentFactory, AgentTask};
use crate::stage::{Stage, StageError};

#[derive(Debug, Clone, Serialize)]
pub struct DecompositionResult {
    pub subtasks: Vec<String>,
    pub agent_results: Vec<AgentRunResult>,
    pub final_result: String,
}

pub struct TaskOrchestrator {
    factory: AgentFactory,
    prompts: PromptTemplates,
    config: OrchestratorConfig,
}

impl TaskOrchestrator {
    pub fn new(factory: AgentFactory) -> Self {
        Self {
            factory,
            prompts: PromptTemplates::default(),
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_prompts(mut self, prompts: PromptTemplates) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn orchestrate(
        &self,
        query: &str,
        on_stage: Option<StageCallback<'_>>,
    ) -> Result<DecompositionResult, StageError> {
        let tracker = Arc::new(ProgressTracker::new());
        self.orchestrate_tracked(query, &tracker, on_stage).await
    }

    /// Same as [`orchestrate`](Self::orchestrate), recording progress in a
    /// tracker owned by this run.
    pub async fn orchestrate_tracked(
        &self,
        query: &str,
        tracker: &Arc<ProgressTracker>,
        on_stage: Option<StageCallback<'_>>,
    ) -> Result<DecompositionResult, StageError> {
        let width = self.config.parallel_agents.max(1);

        enter(tracker, Stage::Decomposition, on_stage);
        let subtasks = self.decompose(query, width, tracker).await;
        leave(tracker, Stage::Decomposition, StageStatus::Completed);

        enter(tracker, Stage::ParallelExecution, on_stage);
        let tasks = subtasks
            .iter()
            .enumerate()
            .map(|(i, subtask)| AgentTask {
                agent: self.factory.create(&format!("agent_{}", i)),
                prompt: subtask.clone(),
            })
            .collect();
        let agent_results = fan_out(tasks, &[], tracker, self.config.task_timeout).await;
        leave(tracker, Stage::ParallelExecution, StageStatus::Completed);

        enter(tracker, Stage::Aggregation, on_stage);
        let prompt = self
            .prompts
            .aggregation(query, &merge_in_order(&agent_results), width);
        let aggregator = self
            .factory
            .create_with_tools("aggregator", &[COMPLETION_TOOL]);
        let final_result = match run_tracked(&aggregator, &prompt, &[], tracker).await {
            Ok(result) => result.response().to_string(),
            Err(e) => {
                leave(tracker, Stage::Aggregation, StageStatus::Failed);
                return Err(StageError::new(Stage::Aggregation, e));
            }
        };
        leave(tracker, Stage::Aggregation, StageStatus::Completed);
        info!(agents = width, "Decomposition run complete");

        Ok(DecompositionResult {
            subtasks,
            agent_results,
            final_result,
        })
    }

    async fn decompose(&self, query: &str, width: usize, tracker: &ProgressTracker) -> Vec<String> {
        let mut agent = self.factory.create("decomposer");
        agent.remove_tool(COMPLETION_TOOL);

        let prompt = self.prompts.decomposition(query, width);
        let parsed = match run_tracked(&agent, &prompt, &[], tracker).await {
            Ok(result) => parse_questions(result.response(), width).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        parsed.unwrap_or_else(|reason| {
            warn!(%reason, "Decomposition failed, using fallback sub-tasks");
            fallback_subtasks(query, width)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heavy_core::testing::{completion_response, text_response, RecordingTool, ScriptedProvider};
    use heavy_core::{Error, ToolRegistry};
    use std::time::Duration;

    fn orchestrator(provider: ScriptedProvider, agents: usize) -> TaskOrchestrator {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(RecordingTool::new("search")));
        tools.register(Arc::new(RecordingTool::new(COMPLETION_TOOL)));
        let factory = AgentFactory::new(Arc::new(provider), tools).with_max_iterations(2);
        TaskOrchestrator::new(factory).with_config(OrchestratorConfig {
            parallel_agents: agents,
            task_timeout: Duration::from_secs(5),
        })
    }

    #[tokio::test]
    async fn test_decomposes_runs_and_aggregates() {
        let provider = ScriptedProvider::new(|req| {
            let prompt = req.last_user_text().unwrap_or_default();
            if prompt.contains("task planner") {
                Ok(text_response(r#"["part one", "part two", "part three"]"#))
            } else if prompt.contains("AGENT RESPONSES:") {
                assert!(prompt.contains("=== AGENT 1 ===\ndone: part one"));
                assert!(prompt.contains("=== AGENT 3 ===\ndone: part three"));
                Ok(completion_response("combined"))
            } else {
                Ok(completion_response(&format!("done: {}", prompt)))
            }
        });
        let tracker = Arc::new(ProgressTracker::new());

        let result = orchestrator(provider, 3)
            .orchestrate_tracked("big task", &tracker, None)
            .await
            .unwrap();

        assert_eq!(result.subtasks, vec!["part one", "part two", "part three"]);
        let ids: Vec<_> = result.agent_results.iter().map(|r| r.agent_id()).collect();
        assert_eq!(ids, vec!["agent_0", "agent_1", "agent_2"]);
        assert_eq!(result.final_result, "combined");

        let snapshot = tracker.snapshot();
        for stage in Stage::DECOMPOSITION {
            assert_eq!(snapshot.stage(stage.key()), StageStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_wrong_count_falls_back() {
        let provider = ScriptedProvider::new(|req| {
            let prompt = req.last_user_text().unwrap_or_default();
            if prompt.contains("task planner") {
                Ok(text_response(r#"["only one"]"#))
            } else {
                Ok(completion_response("ok"))
            }
        });

        let result = orchestrator(provider, 2)
            .orchestrate("big task", None)
            .await
            .unwrap();

        assert_eq!(result.subtasks, fallback_subtasks("big task", 2));
        assert_eq!(result.agent_results.len(), 2);
    }

    #[tokio::test]
    async fn test_aggregation_failure_is_fatal() {
        let provider = ScriptedProvider::new(|req| {
            let prompt = req.last_user_text().unwrap_or_default();
            if prompt.contains("AGENT RESPONSES:") {
                Err(Error::network("down"))
            } else {
                Ok(completion_response("ok"))
            }
        });

        let err = orchestrator(provider, 2)
            .orchestrate("big task", None)
            .await
            .unwrap_err();

        assert_eq!(err.stage, Stage::Aggregation);
    }
}
