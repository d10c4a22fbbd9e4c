//! The five-stage research pipeline.
//!
//! 1. One agent turns the query into four specialized questions.
//! 2. Four research agents answer them in parallel.
//! 3. One agent synthesizes the research into a draft.
//! 4. Two validators critique the draft in parallel.
//! 5. One agent writes the final answer from the draft and critiques.
//!
//! Only stage 1 can recover from failure. Fan-out stages record failed
//! agents as error results and carry on; the single-agent synthesis stages
//! end the run.

use std::sync::Arc;
use std::time::Duration;

use heavy_core::{AgentRunResult, Attachment, ProgressTracker, StageStatus, COMPLETION_TOOL};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::aggregate::{
    fallback_questions, merge_labeled, parse_questions, response_for, RESEARCH_AGENTS,
    VALIDATION_AGENTS,
};
use crate::prompts::PromptTemplates;
use crate::runner::{fan_out, run_tracked, AgentFactory, AgentTask};
use crate::stage::{Stage, StageError};

pub const QUESTION_COUNT: usize = 4;

/// Tools the research agents may use.
///
/// Tool policy per stage:
/// - question generation keeps every tool except the completion sentinel and
///   runs to the iteration cap;
/// - research agents get these three;
/// - synthesis, validation and final synthesis keep only the sentinel.
///
/// The text-only stages are not tool-free. An agent stops on the sentinel
/// only while the sentinel is registered with it (see
/// `AgentLoop::is_completion_call`), so removing every tool would leave those
/// stages looping until the cap.
pub const RESEARCH_TOOLS: [&str; 3] = ["search", "calculator", COMPLETION_TOOL];

/// Called with a human-readable label each time a stage starts.
pub type StageCallback<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Runtime knobs for an orchestration run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Deadline for each parallel batch as a whole.
    pub task_timeout: Duration,
    /// Width of the decomposition fan-out.
    pub parallel_agents: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(300),
            parallel_agents: 4,
        }
    }
}

/// Everything a pipeline run produced, one field per stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineResult {
    questions: Vec<String>,
    research_results: Vec<AgentRunResult>,
    first_draft: Option<String>,
    validation_results: Vec<AgentRunResult>,
    final_result: Option<String>,
}

impl PipelineResult {
    pub fn questions(&self) -> &[String] {
        &self.questions
    }

    pub fn research_results(&self) -> &[AgentRunResult] {
        &self.research_results
    }

    pub fn first_draft(&self) -> Option<&str> {
        self.first_draft.as_deref()
    }

    pub fn validation_results(&self) -> &[AgentRunResult] {
        &self.validation_results
    }

    pub fn final_result(&self) -> Option<&str> {
        self.final_result.as_deref()
    }
}

/// A failed run: the stage error plus whatever completed before it.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct PipelineError {
    #[source]
    pub error: StageError,
    partial: Box<PipelineResult>,
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        self.error.stage
    }

    pub fn partial(&self) -> &PipelineResult {
        &self.partial
    }
}

pub struct MegamindPipeline {
    factory: AgentFactory,
    prompts: PromptTemplates,
    config: OrchestratorConfig,
}

impl MegamindPipeline {
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

    /// Run the pipeline with a private tracker.
    pub async fn orchestrate(
        &self,
        query: &str,
        attachments: &[Attachment],
        on_stage: Option<StageCallback<'_>>,
    ) -> Result<PipelineResult, PipelineError> {
        let tracker = Arc::new(ProgressTracker::new());
        self.orchestrate_tracked(query, attachments, &tracker, on_stage).await
    }

    /// Run the pipeline, recording progress in `tracker`.
    ///
    /// Give every run its own tracker. Agents abandoned at a batch deadline
    /// keep running and still write to the tracker of the run that started
    /// them.
    pub async fn orchestrate_tracked(
        &self,
        query: &str,
        attachments: &[Attachment],
        tracker: &Arc<ProgressTracker>,
        on_stage: Option<StageCallback<'_>>,
    ) -> Result<PipelineResult, PipelineError> {
        let mut result = PipelineResult::default();

        enter(tracker, Stage::QuestionGeneration, on_stage);
        result.questions = self.generate_questions(query, tracker).await;
        leave(tracker, Stage::QuestionGeneration, StageStatus::Completed);

        enter(tracker, Stage::ParallelResearch, on_stage);
        result.research_results = self.research(&result.questions, attachments, tracker).await;
        leave(tracker, Stage::ParallelResearch, StageStatus::Completed);

        enter(tracker, Stage::FirstSynthesis, on_stage);
        let research = merge_labeled(&result.research_results, &RESEARCH_AGENTS);
        let prompt = self.prompts.synthesis(&research);
        let draft = self
            .run_single(Stage::FirstSynthesis, "synthesis", &prompt, tracker)
            .await;
        let draft = match draft {
            Ok(draft) => draft,
            Err(error) => return Err(fail(error, result)),
        };
        result.first_draft = Some(draft.clone());

        enter(tracker, Stage::Validation, on_stage);
        result.validation_results = self.validate(query, &draft, tracker).await;
        leave(tracker, Stage::Validation, StageStatus::Completed);

        enter(tracker, Stage::FinalSynthesis, on_stage);
        let critique = |id| response_for(&result.validation_results, id).unwrap_or_default();
        let prompt = self.prompts.final_synthesis(
            query,
            &draft,
            critique(VALIDATION_AGENTS[0]),
            critique(VALIDATION_AGENTS[1]),
        );
        match self.run_single(Stage::FinalSynthesis, "final", &prompt, tracker).await {
            Ok(answer) => result.final_result = Some(answer),
            Err(error) => return Err(fail(error, result)),
        }

        info!("Pipeline complete");
        Ok(result)
    }

    /// Always yields exactly four questions.
    async fn generate_questions(&self, query: &str, tracker: &ProgressTracker) -> Vec<String> {
        let mut agent = self.factory.create("question_gen");
        agent.remove_tool(COMPLETION_TOOL);

        let prompt = self.prompts.question_generation(query);
        let text = match run_tracked(&agent, &prompt, &[], tracker).await {
            Ok(result) => result.response().to_string(),
            Err(e) => {
                warn!(error = %e, "Question generation failed, using fallback questions");
                return fallback_questions(query);
            }
        };

        match parse_questions(&text, QUESTION_COUNT) {
            Ok(questions) => questions,
            Err(e) => {
                warn!(error = %e, "Could not parse generated questions, using fallback questions");
                fallback_questions(query)
            }
        }
    }

    async fn research(
        &self,
        questions: &[String],
        attachments: &[Attachment],
        tracker: &Arc<ProgressTracker>,
    ) -> Vec<AgentRunResult> {
        let tasks = RESEARCH_AGENTS
            .iter()
            .zip(questions)
            .map(|(id, question)| AgentTask {
                agent: self.factory.create_with_tools(id, &RESEARCH_TOOLS),
                prompt: question.clone(),
            })
            .collect();
        fan_out(tasks, attachments, tracker, self.config.task_timeout).await
    }

    async fn validate(
        &self,
        query: &str,
        draft: &str,
        tracker: &Arc<ProgressTracker>,
    ) -> Vec<AgentRunResult> {
        let prompts = [
            self.prompts.accuracy_validation(query, draft),
            self.prompts.quality_validation(query, draft),
        ];
        let tasks = VALIDATION_AGENTS
            .iter()
            .zip(prompts)
            .map(|(id, prompt)| AgentTask {
                agent: self.factory.create_with_tools(id, &[COMPLETION_TOOL]),
                prompt,
            })
            .collect();
        fan_out(tasks, &[], tracker, self.config.task_timeout).await
    }

    /// A text-only stage run by a single agent, holding only the completion
    /// sentinel. Failure ends the pipeline.
    async fn run_single(
        &self,
        stage: Stage,
        agent_id: &str,
        prompt: &str,
        tracker: &ProgressTracker,
    ) -> Result<String, StageError> {
        let agent = self.factory.create_with_tools(agent_id, &[COMPLETION_TOOL]);
        match run_tracked(&agent, prompt, &[], tracker).await {
            Ok(result) => {
                leave(tracker, stage, StageStatus::Completed);
                Ok(result.response().to_string())
            }
            Err(e) => {
                leave(tracker, stage, StageStatus::Failed);
                Err(StageError::new(stage, e))
            }
        }
    }
}

pub(crate) fn enter(tracker: &ProgressTracker, stage: Stage, on_stage: Option<StageCallback<'_>>) {
    info!(stage = %stage, "Stage starting");
    tracker.update_stage(stage.key(), StageStatus::InProgress);
    if let Some(callback) = on_stage {
        callback(stage.label());
    }
}

pub(crate) fn leave(tracker: &ProgressTracker, stage: Stage, status: StageStatus) {
    info!(stage = %stage, %status, "Stage finished");
    tracker.update_stage(stage.key(), status);
}

fn fail(error: StageError, partial: PipelineResult) -> PipelineError {
    warn!(stage = %error.stage, error = %error.source, "Pipeline aborted");
    PipelineError {
        error,
        partial: Box::new(partial),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heavy_core::testing::{completion_response, text_response, RecordingTool, ScriptedProvider};
    use heavy_core::{CompletionRequest, CompletionResponse, Error, ToolRegistry};
    use std::sync::Mutex;

    const QUESTIONS: &str = r#"["Q research", "Q analysis", "Q alternatives", "Q verification"]"#;

    fn tools() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        for name in ["search", "calculator", "file_read", COMPLETION_TOOL] {
            tools.register(Arc::new(RecordingTool::new(name)));
        }
        tools
    }

    fn prompt_of(req: &CompletionRequest) -> String {
        req.last_user_text().unwrap_or_default()
    }

    fn is_synthesis(prompt: &str) -> bool {
        prompt.contains("specialized research agents")
    }

    /// Answers every agent in one turn by calling the completion tool.
    fn answer(req: &CompletionRequest) -> Result<CompletionResponse, Error> {
        let prompt = prompt_of(req);
        let reply = if prompt.contains("strategic question generator") {
            return Ok(text_response(QUESTIONS));
        } else if is_synthesis(&prompt) {
            "Draft: 2+2 is 4."
        } else if prompt.contains("Accuracy Checker") {
            "Accuracy score: 10"
        } else if prompt.contains("Quality Reviewer") {
            "Quality score: 9"
        } else if prompt.contains("Final Synthesis Agent") {
            "## Executive Summary\n2+2 equals 4.\n\n## Final Answer\n4"
        } else {
            "Research says 4."
        };
        Ok(completion_response(reply))
    }

    fn pipeline(provider: ScriptedProvider) -> MegamindPipeline {
        let factory = AgentFactory::new(Arc::new(provider), tools()).with_max_iterations(3);
        MegamindPipeline::new(factory)
    }

    #[tokio::test]
    async fn test_full_run() {
        let labels = Mutex::new(Vec::new());
        let on_stage = |label: &str| labels.lock().unwrap().push(label.to_string());

        let tracker = Arc::new(ProgressTracker::new());
        let result = pipeline(ScriptedProvider::new(answer))
            .orchestrate_tracked("What is 2+2?", &[], &tracker, Some(&on_stage))
            .await
            .unwrap();

        assert_eq!(result.questions()[0], "Q research");
        let ids: Vec<_> = result.research_results().iter().map(|r| r.agent_id()).collect();
        assert_eq!(ids, RESEARCH_AGENTS);
        assert!(result.research_results().iter().all(|r| r.is_success()));
        assert_eq!(result.first_draft(), Some("Draft: 2+2 is 4."));
        assert_eq!(result.validation_results().len(), 2);
        let final_text = result.final_result().unwrap();
        assert!(!final_text.is_empty());
        assert!(final_text.contains("## Executive Summary"));

        let labels = labels.into_inner().unwrap();
        assert_eq!(labels.len(), 5);
        assert_eq!(labels[0], "Generating specialized questions");
        assert_eq!(labels[4], "Creating final answer");

        let snapshot = tracker.snapshot();
        for stage in Stage::MEGAMIND {
            assert_eq!(snapshot.stage(stage.key()), StageStatus::Completed);
        }
        assert_eq!(
            snapshot.agent("research").unwrap().result.as_deref(),
            Some("Research says 4.")
        );
    }

    #[tokio::test]
    async fn test_stage_tool_sets() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let provider = ScriptedProvider::new(move |req| {
            let mut names: Vec<String> = req.tools.iter().map(|t| t.name.clone()).collect();
            names.sort();
            recorder.lock().unwrap().push((prompt_of(req), names));
            answer(req)
        });

        pipeline(provider)
            .orchestrate("What is 2+2?", &[], None)
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        let tools_for = |pred: &dyn Fn(&str) -> bool| {
            seen.iter()
                .find(|(prompt, _)| pred(prompt.as_str()))
                .map(|(_, tools)| tools.clone())
                .unwrap()
        };

        let question_tools = tools_for(&|p| p.contains("strategic question generator"));
        assert!(!question_tools.iter().any(|t| t == COMPLETION_TOOL));
        assert!(question_tools.iter().any(|t| t == "file_read"));

        assert_eq!(
            tools_for(&|p| p == "Q research"),
            vec!["calculator", COMPLETION_TOOL, "search"]
        );
        assert_eq!(tools_for(&is_synthesis), vec![COMPLETION_TOOL]);
        assert_eq!(tools_for(&|p| p.contains("Quality Reviewer")), vec![COMPLETION_TOOL]);
    }

    #[tokio::test]
    async fn test_unparseable_questions_fall_back() {
        let provider = ScriptedProvider::new(|req| {
            if prompt_of(req).contains("strategic question generator") {
                Ok(text_response("Sure! Here are some thoughts, but no list."))
            } else {
                answer(req)
            }
        });

        let result = pipeline(provider)
            .orchestrate("What is 2+2?", &[], None)
            .await
            .unwrap();

        assert_eq!(result.questions(), fallback_questions("What is 2+2?"));
        assert_eq!(result.research_results().len(), 4);
        assert!(result.final_result().is_some());
    }

    #[tokio::test]
    async fn test_question_provider_error_falls_back() {
        let provider = ScriptedProvider::new(|req| {
            if prompt_of(req).contains("strategic question generator") {
                Err(Error::network("connection reset"))
            } else {
                answer(req)
            }
        });
        let tracker = Arc::new(ProgressTracker::new());

        let result = pipeline(provider)
            .orchestrate_tracked("Why?", &[], &tracker, None)
            .await
            .unwrap();

        assert_eq!(result.questions(), fallback_questions("Why?"));
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.agent("question_gen").unwrap().status, StageStatus::Failed);
        assert_eq!(snapshot.stage("question_generation"), StageStatus::Completed);
    }

    #[tokio::test]
    async fn test_synthesis_failure_is_fatal() {
        let provider = ScriptedProvider::new(|req| {
            if is_synthesis(&prompt_of(req)) {
                Err(Error::api(500, "upstream exploded"))
            } else {
                answer(req)
            }
        });
        let tracker = Arc::new(ProgressTracker::new());

        let err = pipeline(provider)
            .orchestrate_tracked("What is 2+2?", &[], &tracker, None)
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Stage::FirstSynthesis);
        assert!(err.to_string().contains("first_synthesis"));
        assert_eq!(err.partial().questions().len(), 4);
        assert_eq!(err.partial().research_results().len(), 4);
        assert!(err.partial().first_draft().is_none());
        assert!(err.partial().final_result().is_none());

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.stage("first_synthesis"), StageStatus::Failed);
        assert_eq!(snapshot.stage("validation"), StageStatus::NotStarted);
    }

    #[tokio::test]
    async fn test_slow_research_agent_times_out() {
        let synthesis_prompt = Arc::new(Mutex::new(String::new()));
        let captured = Arc::clone(&synthesis_prompt);
        let provider = ScriptedProvider::new(move |req| {
            let prompt = prompt_of(req);
            if is_synthesis(&prompt) {
                *captured.lock().unwrap() = prompt;
            }
            answer(req)
        })
        .with_delay(|req| (prompt_of(req) == "Q analysis").then_some(Duration::from_millis(500)));

        let pipeline = pipeline(provider).with_config(OrchestratorConfig {
            task_timeout: Duration::from_millis(150),
            ..OrchestratorConfig::default()
        });

        let tracker = Arc::new(ProgressTracker::new());
        let result = pipeline
            .orchestrate_tracked("What is 2+2?", &[], &tracker, None)
            .await
            .unwrap();

        let research = result.research_results();
        assert_eq!(research.len(), 4);
        assert_eq!(research[1].agent_id(), "analysis");
        assert!(!research[1].is_success());
        assert!(research[1].response().contains("timed out"));
        assert_eq!(research.iter().filter(|r| r.is_success()).count(), 3);

        let synthesis_prompt = synthesis_prompt.lock().unwrap().clone();
        assert!(synthesis_prompt.contains("=== ANALYSIS AGENT ===\nAgent timed out"));
        assert!(synthesis_prompt.contains("=== RESEARCH AGENT ===\nResearch says 4."));
        assert!(result.final_result().is_some());

        // The abandoned agent finishes later; its status must stay failed.
        tokio::time::sleep(Duration::from_millis(600)).await;
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.agent("analysis").unwrap().status, StageStatus::Failed);
    }

    #[tokio::test]
    async fn test_abandoned_agent_does_not_leak_into_next_run() {
        let run = Arc::new(Mutex::new(1));
        let current = Arc::clone(&run);
        let provider = ScriptedProvider::new(move |req| {
            let prompt = prompt_of(req);
            match (*current.lock().unwrap(), prompt.as_str()) {
                (1, "Q analysis") => Ok(completion_response("late answer from run 1")),
                (2, "Q analysis") => Err(Error::network("analysis down")),
                _ => answer(req),
            }
        })
        .with_delay(|req| (prompt_of(req) == "Q analysis").then_some(Duration::from_millis(400)));

        let pipeline = pipeline(provider).with_config(OrchestratorConfig {
            task_timeout: Duration::from_millis(100),
            ..OrchestratorConfig::default()
        });

        let first = Arc::new(ProgressTracker::new());
        pipeline
            .orchestrate_tracked("What is 2+2?", &[], &first, None)
            .await
            .unwrap();

        *run.lock().unwrap() = 2;
        let second = Arc::new(ProgressTracker::new());
        let result = pipeline
            .orchestrate_tracked("What is 2+2?", &[], &second, None)
            .await
            .unwrap();

        // Let the straggler from run 1 finish.
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(!result.research_results()[1].is_success());
        let snapshot = second.snapshot();
        let analysis = snapshot.agent("analysis").unwrap();
        assert_eq!(analysis.status, StageStatus::Failed);
        assert_ne!(analysis.result.as_deref(), Some("late answer from run 1"));
        assert_eq!(
            first.snapshot().agent("analysis").unwrap().status,
            StageStatus::Failed
        );
    }
}
