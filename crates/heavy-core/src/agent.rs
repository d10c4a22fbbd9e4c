//! The tool-calling agent loop.
//!
//! An [`AgentLoop`] drives one conversation: it calls the provider, runs any
//! requested tools, feeds the results back, and stops when the model invokes
//! the completion tool or the iteration cap is hit. Every piece of visible
//! assistant text along the way is kept and returned, not just the last turn.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::conversation::Conversation;
use crate::error::Error;
use crate::message::{Attachment, Content, Message, ToolCall, ToolResult};
use crate::provider::{CompletionRequest, Provider};
use crate::tool::ToolRegistry;

/// Name of the tool whose invocation ends a run.
pub const COMPLETION_TOOL: &str = "mark_task_complete";

/// Returned when the iteration cap is hit without any assistant text.
pub const EXHAUSTED_MESSAGE: &str = "Maximum iterations reached. The agent may be stuck in a loop.";

pub const DEFAULT_MAX_ITERATIONS: usize = 10;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful research assistant. \
Use the available tools to gather information before answering. \
When you have fully answered the request, call the mark_task_complete tool.";

/// Unique identifier for an agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Configuration for an agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Unique agent identifier.
    pub id: AgentId,
    /// System prompt seeded as the first message.
    pub system_prompt: String,
    /// Maximum agentic loop iterations.
    pub max_iterations: usize,
    /// Model override for every request of this agent.
    pub model: Option<String>,
    /// Tool name that signals task completion.
    pub completion_tool: String,
}

impl AgentConfig {
    pub fn new(id: impl Into<AgentId>) -> Self {
        Self {
            id: id.into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            model: None,
            completion_tool: COMPLETION_TOOL.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
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

    pub fn with_completion_tool(mut self, name: impl Into<String>) -> Self {
        self.completion_tool = name.into();
        self
    }
}

/// An LLM-powered agent bound to a provider and its own tool set.
///
/// The tool set can be shrunk before a run with [`AgentLoop::remove_tool`]
/// or [`AgentLoop::retain_tools`]. Both take `&mut self`, so they cannot
/// race with an in-flight [`AgentLoop::run`].
pub struct AgentLoop {
    config: AgentConfig,
    provider: Arc<dyn Provider>,
    tools: ToolRegistry,
}

impl AgentLoop {
    pub fn new(provider: Arc<dyn Provider>, tools: ToolRegistry, config: AgentConfig) -> Self {
        Self {
            config,
            provider,
            tools,
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.config.id
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.names()
    }

    /// Remove a tool by name. Returns true if it was present.
    pub fn remove_tool(&mut self, name: &str) -> bool {
        self.tools.remove(name)
    }

    /// Keep only the named tools.
    pub fn retain_tools(&mut self, names: &[&str]) {
        self.tools.retain(names);
    }

    /// Run the loop for one prompt.
    ///
    /// Provider failures abort the run with [`Error::Completion`]; tool
    /// failures are reported back to the model and the loop carries on.
    pub async fn run(&self, prompt: &str, attachments: &[Attachment]) -> Result<String, Error> {
        let mut conversation = Conversation::seeded(
            Message::system(self.config.system_prompt.as_str()),
            Message::user(Content::with_attachments(prompt, attachments)),
        );
        let definitions = self.tools.definitions();
        let mut transcript: Vec<String> = Vec::new();

        debug!(
            agent = %self.config.id,
            tools = ?self.tools.names(),
            attachments = attachments.len(),
            max_iterations = self.config.max_iterations,
            "Agent run starting"
        );

        for iteration in 0..self.config.max_iterations {
            debug!(
                agent = %self.config.id,
                iteration = iteration + 1,
                message_count = conversation.len(),
                "Agent iteration starting"
            );

            let mut request = CompletionRequest::new(conversation.messages().to_vec())
                .with_tools(definitions.clone());
            if let Some(model) = &self.config.model {
                request = request.with_model(model.as_str());
            }

            let response = self
                .provider
                .complete(request)
                .await
                .map_err(into_completion_error)?;

            let text = response.message.content.to_string_lossy();
            if !text.trim().is_empty() {
                transcript.push(text);
            }

            let tool_calls = conversation.push_assistant(response.message);
            if tool_calls.is_empty() {
                debug!(
                    agent = %self.config.id,
                    iteration = iteration + 1,
                    "Responded without tool calls, continuing"
                );
                continue;
            }

            debug!(
                agent = %self.config.id,
                tool_count = tool_calls.len(),
                "Agent executing tools"
            );

            for call in &tool_calls {
                let result = self.invoke(call).await;
                conversation.push_tool_result(&result);

                if self.is_completion_call(call) {
                    info!(
                        agent = %self.config.id,
                        iterations = iteration + 1,
                        "Completion tool called, ending run"
                    );
                    return Ok(transcript.join("\n\n"));
                }
            }
        }

        warn!(
            agent = %self.config.id,
            max_iterations = self.config.max_iterations,
            "Iteration cap reached without completion signal"
        );

        if transcript.is_empty() {
            Ok(EXHAUSTED_MESSAGE.to_string())
        } else {
            Ok(transcript.join("\n\n"))
        }
    }

    /// The sentinel only counts while it is part of this agent's tool set. A
    /// call to it after `remove_tool` is treated as an unknown tool.
    fn is_completion_call(&self, call: &ToolCall) -> bool {
        call.name == self.config.completion_tool && self.tools.contains(&call.name)
    }

    async fn invoke(&self, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!(agent = %self.config.id, tool = %call.name, "Unknown tool requested");
            return ToolResult::error(&call.name, &call.id, format!("Unknown tool '{}'", call.name));
        };

        if let Err(reason) = tool.definition().parameters.validate(&call.arguments) {
            warn!(agent = %self.config.id, tool = %call.name, %reason, "Rejected tool arguments");
            return ToolResult::error(&call.name, &call.id, format!("Invalid arguments: {}", reason));
        }

        debug!(agent = %self.config.id, tool = %call.name, "Executing tool");

        match tool.execute(call.arguments.clone()).await {
            Ok(output) if output.is_error => {
                ToolResult::error(&call.name, &call.id, output.content)
            }
            Ok(output) => ToolResult::success(&call.name, &call.id, output.content),
            Err(e) => {
                warn!(agent = %self.config.id, tool = %call.name, error = %e, "Tool execution failed");
                ToolResult::error(&call.name, &call.id, format!("Tool execution failed: {}", e))
            }
        }
    }
}

fn into_completion_error(err: Error) -> Error {
    match err {
        Error::Completion(_) => err,
        other => Error::completion(other),
    }
}

/// Whether an agent run produced an answer or an error description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
}

/// Outcome of one agent run, as exchanged with the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunResult {
    agent_id: String,
    status: RunStatus,
    response: String,
    execution_time: Duration,
}

impl AgentRunResult {
    pub fn success(agent_id: impl Into<String>, response: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            agent_id: agent_id.into(),
            status: RunStatus::Success,
            response: response.into(),
            execution_time: elapsed,
        }
    }

    pub fn error(agent_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            status: RunStatus::Error,
            response: message.into(),
            execution_time: Duration::ZERO,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn response(&self) -> &str {
        &self.response
    }

    pub fn execution_time(&self) -> Duration {
        self.execution_time
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}
