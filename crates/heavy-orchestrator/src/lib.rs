//! heavy-orchestrator: Multi-agent pipelines built on the heavy agent loop
//!
//! Two patterns share the same primitives:
//! - [`MegamindPipeline`]: question generation, parallel research, synthesis,
//!   parallel validation and a final synthesis.
//! - [`TaskOrchestrator`]: decompose into N sub-tasks, run them in parallel,
//!   aggregate.
//!
//! Both report progress through a shared [`heavy_core::ProgressTracker`],
//! which [`ProgressReporter`] turns into a stream of events.

pub mod aggregate;
pub mod decompose;
pub mod pipeline;
pub mod prompts;
pub mod reporter;
pub mod runner;
pub mod stage;

pub use aggregate::{
    clean_output, fallback_questions, fallback_subtasks, merge_labeled, parse_questions,
    QuestionParseError, RESEARCH_AGENTS, VALIDATION_AGENTS,
};
pub use decompose::{DecompositionResult, TaskOrchestrator};
pub use pipeline::{
    MegamindPipeline, OrchestratorConfig, PipelineError, PipelineResult, StageCallback,
    QUESTION_COUNT, RESEARCH_TOOLS,
};
pub use prompts::PromptTemplates;
pub use reporter::{diff_snapshots, ProgressEvent, ProgressReporter, POLL_INTERVAL};
pub use runner::AgentFactory;
pub use stage::{Stage, StageError};
