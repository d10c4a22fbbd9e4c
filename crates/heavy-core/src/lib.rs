//! heavy-core: Core types, the agent loop and progress tracking for heavy
//!
//! This crate provides the provider and tool abstractions, the tool-calling
//! agent loop, the shared progress tracker and the bounded fan-out used by
//! the orchestrator.

pub mod agent;
pub mod conversation;
pub mod error;
pub mod message;
pub mod progress;
pub mod provider;
pub mod task;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tool;

pub use agent::{
    AgentConfig, AgentId, AgentLoop, AgentRunResult, RunStatus, COMPLETION_TOOL,
    DEFAULT_MAX_ITERATIONS, DEFAULT_SYSTEM_PROMPT, EXHAUSTED_MESSAGE,
};
pub use conversation::Conversation;
pub use error::Error;
pub use message::{Attachment, Content, ContentPart, Message, Role, ToolCall, ToolResult, Usage};
pub use progress::{AgentProgress, ProgressSnapshot, ProgressTracker, StageStatus};
pub use provider::{CompletionRequest, CompletionResponse, FinishReason, Provider};
pub use task::{run_bounded, TaskOutcome};
pub use tool::{PropertySchema, Tool, ToolDefinition, ToolOutput, ToolParameters, ToolRegistry};

pub type Result<T> = std::result::Result<T, Error>;
