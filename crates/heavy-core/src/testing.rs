//! Test doubles for providers and tools.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agent::COMPLETION_TOOL;
use crate::error::Error;
use crate::message::{Message, ToolCall};
use crate::provider::{CompletionRequest, CompletionResponse, Provider};
use crate::tool::{PropertySchema, Tool, ToolDefinition, ToolOutput, ToolParameters};

/// A plain assistant reply with no tool calls.
pub fn text_response(content: &str) -> CompletionResponse {
    CompletionResponse::from_message(Message::assistant(content))
}

/// An assistant reply carrying tool calls.
pub fn tool_call_response(content: &str, calls: Vec<ToolCall>) -> CompletionResponse {
    CompletionResponse::from_message(Message::assistant_with_tool_calls(content, calls))
}

/// An assistant reply that calls the completion tool.
pub fn completion_response(content: &str) -> CompletionResponse {
    tool_call_response(
        content,
        vec![ToolCall::new(
            "done",
            COMPLETION_TOOL,
            json!({"task_summary": "done", "completion_message": content}),
        )],
    )
}

/// A mock provider that returns queued responses in order.
pub struct MockProvider {
    responses: Mutex<VecDeque<Result<CompletionResponse, Error>>>,
    /// Captured requests (for assertion).
    pub captured_requests: Mutex<Vec<CompletionRequest>>,
    pub name: String,
    pub default_model: Option<String>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            captured_requests: Mutex::new(Vec::new()),
            name: "mock".to_string(),
            default_model: None,
        }
    }

    /// Queue a text response to be returned by the next complete() call.
    /// Responses are returned in FIFO order (first queued = first returned).
    pub fn queue_response(&self, content: &str) {
        self.queue_raw_response(text_response(content));
    }

    /// Queue a raw CompletionResponse.
    pub fn queue_raw_response(&self, response: CompletionResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    /// Queue a failure.
    pub fn queue_error(&self, error: Error) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Get the number of captured requests.
    pub fn request_count(&self) -> usize {
        self.captured_requests.lock().unwrap().len()
    }

    /// Get the last captured request.
    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.captured_requests.lock().unwrap().last().cloned()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, Error> {
        self.captured_requests.lock().unwrap().push(request);
        match self.responses.lock().unwrap().pop_front() {
            Some(response) => response,
            None => Err(Error::Unknown("No mock response queued".to_string())),
        }
    }
}

type Script = Box<dyn Fn(&CompletionRequest) -> Result<CompletionResponse, Error> + Send + Sync>;
type DelayScript = Box<dyn Fn(&CompletionRequest) -> Option<Duration> + Send + Sync>;

/// A provider that answers each request by running a closure over it.
///
/// Useful when many agents share one provider concurrently and the reply
/// depends on which agent is asking (usually keyed off the prompt text).
pub struct ScriptedProvider {
    script: Script,
    delay: Option<DelayScript>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<CompletionResponse, Error> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleep before answering when the closure returns a duration.
    pub fn with_delay<F>(mut self, delay: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Option<Duration> + Send + Sync + 'static,
    {
        self.delay = Some(Box::new(delay));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> Option<&str> {
        None
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay.as_ref().and_then(|d| d(&request)) {
            tokio::time::sleep(delay).await;
        }
        (self.script)(&request)
    }
}

enum Behavior {
    Succeed,
    ReportError(String),
    Fail(String),
}

/// A tool that records every invocation.
pub struct RecordingTool {
    name: String,
    parameters: ToolParameters,
    behavior: Behavior,
    calls: Mutex<Vec<Value>>,
}

impl RecordingTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: ToolParameters::new(),
            behavior: Behavior::Succeed,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Declare a required string parameter.
    pub fn with_required(mut self, param: &str) -> Self {
        self.parameters = self
            .parameters
            .add_property(param, PropertySchema::string(param), true);
        self
    }

    /// Return an error output instead of succeeding.
    pub fn erroring(mut self, message: impl Into<String>) -> Self {
        self.behavior = Behavior::ReportError(message.into());
        self
    }

    /// Fail execution with an `Err`.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.behavior = Behavior::Fail(message.into());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Records its invocations"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(&self.name, self.description()).with_parameters(self.parameters.clone())
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput, Error> {
        self.calls.lock().unwrap().push(arguments);
        match &self.behavior {
            Behavior::Succeed => Ok(ToolOutput::success(format!("{} ok", self.name))),
            Behavior::ReportError(message) => Ok(ToolOutput::error(message.clone())),
            Behavior::Fail(message) => Err(Error::tool(&self.name, message.clone())),
        }
    }
}
