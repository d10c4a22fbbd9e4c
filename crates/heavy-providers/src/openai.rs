use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use heavy_core::{
    CompletionRequest, CompletionResponse, Content, ContentPart, Error, FinishReason, Message,
    Provider, Role, ToolCall, ToolDefinition, Usage,
};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Adapter for OpenAI-compatible `/chat/completions` endpoints.
///
/// OpenRouter speaks the same protocol, so it is this provider pointed at
/// [`OPENROUTER_BASE_URL`] under the name `openrouter`.
pub struct OpenAIProvider {
    client: Client,
    name: String,
    api_key: String,
    base_url: String,
    default_model: Option<String>,
}

impl OpenAIProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            name: "openai".to_string(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: None,
        }
    }

    /// An OpenRouter client.
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new(api_key)
            .with_name("openrouter")
            .with_base_url(OPENROUTER_BASE_URL)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    fn build_request(&self, request: &CompletionRequest) -> OpenAIChatRequest {
        // Model priority: request > provider default
        // If neither is set, don't send model field (let API use its default)
        let model = request
            .model
            .clone()
            .or_else(|| self.default_model.clone());

        let messages: Vec<OpenAIMessage> = request
            .messages
            .iter()
            .map(|m| self.convert_message(m))
            .collect();

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| self.convert_tool(t))
                    .collect(),
            )
        };

        OpenAIChatRequest {
            model,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            top_p: request.top_p,
            tools,
            extra: request.extra.clone(),
        }
    }

    fn convert_message(&self, message: &Message) -> OpenAIMessage {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };

        let content = match &message.content {
            Content::Text(s) => Some(OpenAIContent::Text(s.clone())),
            Content::Parts(parts) if parts.is_empty() => None,
            Content::Parts(parts) => Some(OpenAIContent::Parts(
                parts.iter().map(convert_part).collect(),
            )),
        };

        let tool_calls = if message.tool_calls.is_empty() {
            None
        } else {
            Some(
                message
                    .tool_calls
                    .iter()
                    .map(|tc| OpenAIToolCall {
                        id: tc.id.clone(),
                        r#type: "function".to_string(),
                        function: OpenAIFunctionCall {
                            name: tc.name.clone(),
                            arguments: tc.arguments.to_string(),
                        },
                    })
                    .collect(),
            )
        };

        // Tool results are linked by call id, not by name.
        let name = match message.role {
            Role::Tool => None,
            _ => message.name.clone(),
        };

        OpenAIMessage {
            role: role.to_string(),
            content,
            name,
            tool_calls,
            tool_call_id: message.tool_call_id.clone(),
        }
    }

    fn convert_tool(&self, tool: &ToolDefinition) -> OpenAITool {
        OpenAITool {
            r#type: "function".to_string(),
            function: OpenAIFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: serde_json::to_value(&tool.parameters).unwrap_or_default(),
            },
        }
    }

    fn parse_response(&self, response: OpenAIChatResponse) -> Result<CompletionResponse, Error> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::api(500, "No choices in response"))?;

        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                ToolCall::new(
                    tc.id,
                    tc.function.name,
                    serde_json::from_str(&tc.function.arguments).unwrap_or_default(),
                )
            })
            .collect();

        let content = match choice.message.content {
            Some(OpenAIContent::Text(text)) => text,
            Some(OpenAIContent::Parts(parts)) => parts
                .into_iter()
                .filter_map(|p| match p {
                    OpenAIContentPart::Text { text } => Some(text),
                    OpenAIContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
            None => String::new(),
        };

        let message = if tool_calls.is_empty() {
            Message::assistant(content)
        } else {
            Message::assistant_with_tool_calls(content, tool_calls)
        };

        let finish_reason = match choice.finish_reason.as_deref() {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("tool_calls") => FinishReason::ToolCalls,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        };

        let usage = response.usage.map(|u| Usage::new(u.prompt_tokens, u.completion_tokens));

        Ok(CompletionResponse {
            message,
            usage: usage.unwrap_or_default(),
            model: response.model,
            finish_reason,
        })
    }

    fn parse_error(&self, status: u16, body: &str) -> Error {
        #[derive(Deserialize)]
        struct ErrorResponse {
            error: ErrorDetail,
        }

        #[derive(Deserialize)]
        struct ErrorDetail {
            message: String,
        }

        if let Ok(err) = serde_json::from_str::<ErrorResponse>(body) {
            match status {
                401 | 403 => Error::auth(err.error.message),
                429 => Error::rate_limit(err.error.message),
                400 => Error::invalid_request(err.error.message),
                _ => Error::api(status, err.error.message),
            }
        } else {
            Error::api(status, body.to_string())
        }
    }
}

fn convert_part(part: &ContentPart) -> OpenAIContentPart {
    match part {
        ContentPart::Text { text } => OpenAIContentPart::Text { text: text.clone() },
        ContentPart::Image { mime_type, data } => OpenAIContentPart::ImageUrl {
            image_url: OpenAIImageUrl {
                url: format!("data:{};base64,{}", mime_type, data),
            },
        },
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, Error> {
        let api_request = self.build_request(&request);

        debug!(
            provider = %self.name,
            model = ?api_request.model,
            message_count = api_request.messages.len(),
            tool_count = api_request.tools.as_ref().map_or(0, |t| t.len()),
            "Chat completion request"
        );
        trace!(request = %serde_json::to_string(&api_request).unwrap_or_default(), "Chat completion payload");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(provider = %self.name, status = status.as_u16(), body = %error_text, "Chat completion failed");
            return Err(self.parse_error(status.as_u16(), &error_text));
        }

        let api_response: OpenAIChatResponse = response
            .json()
            .await
            .map_err(|e| Error::serialization(e.to_string()))?;

        let parsed = self.parse_response(api_response)?;

        debug!(
            provider = %self.name,
            model = %parsed.model,
            finish_reason = ?parsed.finish_reason,
            tool_calls = parsed.message.tool_calls.len(),
            prompt_tokens = parsed.usage.prompt_tokens,
            completion_tokens = parsed.usage.completion_tokens,
            "Chat completion response"
        );

        Ok(parsed)
    }
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct OpenAIChatRequest {
    /// Model to use. Optional for servers that have a default model.
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    /// Extra parameters (reasoning_effort, provider routing, etc.)
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<OpenAIContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum OpenAIContent {
    Text(String),
    Parts(Vec<OpenAIContentPart>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAIContentPart {
    Text { text: String },
    ImageUrl { image_url: OpenAIImageUrl },
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIImageUrl {
    url: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIToolCall {
    id: String,
    r#type: String,
    function: OpenAIFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct OpenAITool {
    r#type: String,
    function: OpenAIFunction,
}

#[derive(Debug, Serialize)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OpenAIChatResponse {
    #[serde(default)]
    model: String,
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use heavy_core::{Attachment, ToolResult};

    #[test]
    fn test_provider_creation() {
        let provider = OpenAIProvider::new("test-key");
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.default_model(), None);
    }

    #[test]
    fn test_openrouter_preset() {
        let provider = OpenAIProvider::openrouter("test-key").with_default_model("openai/gpt-4o");
        assert_eq!(provider.name(), "openrouter");
        assert_eq!(provider.base_url, OPENROUTER_BASE_URL);
        assert_eq!(provider.default_model(), Some("openai/gpt-4o"));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let provider = OpenAIProvider::new("k").with_base_url("http://localhost:8080/v1/");
        assert_eq!(provider.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn test_build_request() {
        let provider = OpenAIProvider::new("test-key").with_default_model("test-model");
        let request = CompletionRequest::new(vec![Message::user("Hello")]);
        let api_request = provider.build_request(&request);

        assert_eq!(api_request.model, Some("test-model".to_string()));
        assert_eq!(api_request.messages.len(), 1);
        assert_eq!(api_request.messages[0].role, "user");
        assert!(api_request.tools.is_none());
    }

    #[test]
    fn test_build_request_no_model() {
        let provider = OpenAIProvider::new("test-key");
        let request = CompletionRequest::new(vec![Message::user("Hello")]);
        let api_request = provider.build_request(&request);

        // No model configured - field should be None (skipped in serialization)
        assert_eq!(api_request.model, None);
        let json = serde_json::to_value(&api_request).unwrap();
        assert!(json.get("model").is_none());
    }

    #[test]
    fn test_image_attachment_becomes_data_url() {
        let provider = OpenAIProvider::new("test-key");
        let content = Content::with_attachments(
            "What is in this image?",
            &[Attachment::new("image/png", "aGVsbG8=")],
        );
        let request = CompletionRequest::new(vec![Message::user(content)]);
        let json = serde_json::to_value(provider.build_request(&request)).unwrap();

        let parts = json["messages"][0]["content"].as_array().unwrap();
        assert_eq!(parts[0]["type"], "image_url");
        assert_eq!(parts[0]["image_url"]["url"], "data:image/png;base64,aGVsbG8=");
        assert_eq!(parts[1]["type"], "text");
        assert_eq!(parts[1]["text"], "What is in this image?");
    }

    #[test]
    fn test_tool_round_trip_shapes() {
        let provider = OpenAIProvider::new("test-key");
        let call = ToolCall::new("call_1", "search", serde_json::json!({"query": "rust"}));
        let request = CompletionRequest::new(vec![
            Message::user("Search"),
            Message::assistant_with_tool_calls("", vec![call]),
            Message::tool_result(&ToolResult::success("search", "call_1", "results")),
        ])
        .with_tools(vec![ToolDefinition::new("search", "Search the web")]);

        let json = serde_json::to_value(provider.build_request(&request)).unwrap();
        let assistant = &json["messages"][1];
        assert_eq!(assistant["tool_calls"][0]["function"]["name"], "search");
        assert_eq!(
            assistant["tool_calls"][0]["function"]["arguments"],
            r#"{"query":"rust"}"#
        );
        let tool = &json["messages"][2];
        assert_eq!(tool["role"], "tool");
        assert_eq!(tool["tool_call_id"], "call_1");
        assert!(tool.get("name").is_none());
        assert_eq!(json["tools"][0]["type"], "function");
    }

    #[test]
    fn test_parse_response_tool_calls() {
        let provider = OpenAIProvider::new("test-key");
        let body = r#"{
            "model": "openai/gpt-4o",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "Let me check.",
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "calculator", "arguments": "{\"expression\": \"2+2\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 7}
        }"#;
        let response: OpenAIChatResponse = serde_json::from_str(body).unwrap();
        let parsed = provider.parse_response(response).unwrap();

        assert_eq!(parsed.message.content.to_string_lossy(), "Let me check.");
        assert_eq!(parsed.message.tool_calls.len(), 1);
        assert_eq!(parsed.message.tool_calls[0].id, "call_abc");
        assert_eq!(parsed.message.tool_calls[0].arguments["expression"], "2+2");
        assert_eq!(parsed.finish_reason, FinishReason::ToolCalls);
        assert_eq!(parsed.usage.total_tokens, 19);
    }

    #[test]
    fn test_parse_response_null_content() {
        let provider = OpenAIProvider::new("test-key");
        let body = r#"{"model": "m", "choices": [{"message": {"role": "assistant", "content": null}, "finish_reason": "stop"}]}"#;
        let response: OpenAIChatResponse = serde_json::from_str(body).unwrap();
        let parsed = provider.parse_response(response).unwrap();
        assert_eq!(parsed.message.content.to_string_lossy(), "");
    }

    #[test]
    fn test_parse_response_no_choices() {
        let provider = OpenAIProvider::new("test-key");
        let response: OpenAIChatResponse =
            serde_json::from_str(r#"{"model": "m", "choices": []}"#).unwrap();
        assert!(provider.parse_response(response).is_err());
    }

    #[test]
    fn test_parse_error_mapping() {
        let provider = OpenAIProvider::new("test-key");
        let body = r#"{"error": {"message": "bad key", "type": "auth"}}"#;
        assert!(matches!(provider.parse_error(401, body), Error::Auth(_)));
        assert!(matches!(provider.parse_error(429, body), Error::RateLimit(_)));
        assert!(matches!(
            provider.parse_error(502, "gateway"),
            Error::Api { status: 502, .. }
        ));
    }
}
