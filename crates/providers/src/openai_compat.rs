//! OpenAI-compatible model client.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, DeepSeek, Together AI and
//! any endpoint exposing `/v1/chat/completions` with function calling.

use async_trait::async_trait;
use contextloop_core::client::{ModelClient, ModelReply, Usage};
use contextloop_core::error::ProviderError;
use contextloop_core::message::{Message, Role, ToolCall};
use contextloop_core::model::ModelProfile;
use contextloop_core::tool::ToolSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Seconds to wait when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// An OpenAI-compatible model client.
///
/// This handles the vast majority of endpoints since most expose an
/// OpenAI-compatible `/v1/chat/completions` route.
pub struct OpenAiCompatClient {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    /// Create a new OpenAI-compatible client.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create an OpenRouter client (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    /// Create an OpenAI client (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an Ollama client (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| {
                let tool_calls = (!m.tool_calls.is_empty()).then(|| {
                    m.tool_calls
                        .iter()
                        .map(|tc| ApiToolCall {
                            id: tc.id.clone(),
                            r#type: "function".into(),
                            function: ApiFunction {
                                name: tc.name.clone(),
                                arguments: match &tc.arguments {
                                    serde_json::Value::String(raw) => raw.clone(),
                                    other => other.to_string(),
                                },
                            },
                        })
                        .collect()
                });
                // An assistant turn that only calls tools carries null content
                let content = if m.content.is_empty() && tool_calls.is_some() {
                    None
                } else {
                    Some(m.content.clone())
                };
                ApiMessage {
                    role: m.role.to_string(),
                    content,
                    tool_calls,
                    tool_call_id: m.tool_call_id.clone(),
                }
            })
            .collect()
    }

    /// Convert tool schemas to OpenAI API format.
    fn to_api_tools(tools: &[ToolSchema]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(
        messages: &[Message],
        tools: &[ToolSchema],
        profile: &ModelProfile,
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": profile.model_id,
            "messages": Self::to_api_messages(messages),
            "temperature": profile.temperature,
            "max_tokens": profile.reserved_output,
            "stream": false,
        });

        if !tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(tools));
        }
        body
    }
}

/// Parse a `/chat/completions` response body into a reply.
fn parse_reply(body: &str) -> Result<ModelReply, ProviderError> {
    let api_response: ApiResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {e}")))?;

    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".into()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCall {
            id: tc.id,
            name: tc.function.name,
            arguments: parse_arguments(&tc.function.arguments),
        })
        .collect();

    Ok(ModelReply {
        content: choice.message.content.filter(|c| !c.is_empty()),
        tool_calls,
        usage: api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
    })
}

/// Decode tool-call arguments. Malformed JSON is kept as a string so that
/// schema validation reports it to the model.
fn parse_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

/// Phrases endpoints use when the prompt does not fit the model's window.
const CONTEXT_LENGTH_MARKERS: &[&str] = &[
    "context_length_exceeded",
    "maximum context length",
    "context length",
    "context window",
    "prompt is too long",
    "too many tokens",
];

/// Classify a non-200 response.
fn status_error(status: u16, body: String) -> ProviderError {
    let lower = body.to_lowercase();
    let too_long = matches!(status, 400 | 413 | 422)
        && CONTEXT_LENGTH_MARKERS.iter().any(|m| lower.contains(m));
    if too_long {
        ProviderError::ContextLengthExceeded(body)
    } else {
        ProviderError::ApiError {
            status_code: status,
            message: body,
        }
    }
}

fn retry_after(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

#[async_trait]
impl ModelClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        profile: &ModelProfile,
    ) -> Result<ModelReply, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(messages, tools, profile);

        debug!(
            provider = %self.name,
            model = %profile.model_id,
            messages = messages.len(),
            tools = tools.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: retry_after(&response),
            });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if status != 200 {
            warn!(status, body = %text, "Provider returned error");
            return Err(status_error(status, text));
        }

        parse_reply(&text)
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openrouter_constructor() {
        let client = OpenAiCompatClient::openrouter("sk-test");
        assert_eq!(client.name(), "openrouter");
        assert!(client.base_url().contains("openrouter.ai"));
    }

    #[test]
    fn ollama_constructor() {
        let client = OpenAiCompatClient::ollama(None);
        assert_eq!(client.name(), "ollama");
        assert!(client.base_url().contains("localhost:11434"));
    }

    #[test]
    fn trailing_slash_trimmed() {
        let client = OpenAiCompatClient::new("x", "http://host/v1/", "");
        assert_eq!(client.base_url(), "http://host/v1");
    }

    #[test]
    fn message_conversion() {
        let messages = vec![Message::system("You are helpful"), Message::user("Hello")];
        let api_messages = OpenAiCompatClient::to_api_messages(&messages);
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[1].role, "user");
    }

    #[test]
    fn message_conversion_with_tool_calls() {
        let msg = Message::assistant_with_calls(
            "",
            vec![ToolCall::new("call_1", "read_file", serde_json::json!({"path": "a.txt"}))],
        );
        let api_msgs = OpenAiCompatClient::to_api_messages(&[msg]);
        assert!(api_msgs[0].content.is_none());
        let tc = api_msgs[0].tool_calls.as_ref().unwrap();
        assert_eq!(tc[0].function.name, "read_file");
        assert_eq!(tc[0].function.arguments, r#"{"path":"a.txt"}"#);
    }

    #[test]
    fn message_conversion_tool_response() {
        let msg = Message::tool_result("call_1", "result data");
        let api_msgs = OpenAiCompatClient::to_api_messages(&[msg]);
        assert_eq!(api_msgs[0].role, "tool");
        assert_eq!(api_msgs[0].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn request_body_carries_profile_and_tools() {
        let profile = ModelProfile::new("gpt-4o-mini", 128_000, 2_048);
        let tools = vec![ToolSchema {
            name: "calculator".into(),
            description: "Evaluate arithmetic".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let body = OpenAiCompatClient::request_body(&[Message::user("hi")], &tools, &profile);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 2_048);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "calculator");

        let bare = OpenAiCompatClient::request_body(&[Message::user("hi")], &[], &profile);
        assert!(bare.get("tools").is_none());
    }

    #[test]
    fn parse_text_reply() {
        let body = r#"{
            "model": "gpt-4o-mini",
            "choices": [{"message": {"role": "assistant", "content": "4"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 1, "total_tokens": 11}
        }"#;
        let reply = parse_reply(body).unwrap();
        assert_eq!(reply.content.as_deref(), Some("4"));
        assert!(reply.tool_calls.is_empty());
        assert_eq!(reply.usage.unwrap().completion_tokens, 1);
    }

    #[test]
    fn parse_tool_call_reply() {
        let body = r#"{
            "choices": [{"message": {"role": "assistant", "content": null, "tool_calls": [
                {"id": "call_a", "type": "function", "function": {"name": "compute_sum", "arguments": "{\"a\":2,\"b\":2}"}},
                {"id": "call_b", "type": "function", "function": {"name": "compute_sum", "arguments": "{oops"}}
            ]}}]
        }"#;
        let reply = parse_reply(body).unwrap();
        assert!(reply.content.is_none());
        assert_eq!(reply.tool_calls.len(), 2);
        assert_eq!(reply.tool_calls[0].arguments["a"], 2);
        assert_eq!(reply.tool_calls[1].arguments, serde_json::json!("{oops"));
    }

    #[test]
    fn parse_empty_choices_is_invalid() {
        assert!(matches!(
            parse_reply(r#"{"choices": []}"#),
            Err(ProviderError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_reply("<html>bad gateway</html>"),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn context_length_rejection_is_classified() {
        let body = r#"{"error":{"message":"This model's maximum context length is 8192 tokens.","code":"context_length_exceeded"}}"#;
        assert!(matches!(
            status_error(400, body.into()),
            ProviderError::ContextLengthExceeded(_)
        ));
        assert!(matches!(
            status_error(413, "Prompt is too long".into()),
            ProviderError::ContextLengthExceeded(_)
        ));
    }

    #[test]
    fn other_rejections_stay_api_errors() {
        let err = status_error(400, r#"{"error":{"message":"invalid model"}}"#.into());
        assert!(matches!(err, ProviderError::ApiError { status_code: 400, .. }));
        assert!(!err.is_retryable());

        // A server error mentioning tokens is still a server error
        let err = status_error(500, "too many tokens in flight".into());
        assert!(matches!(err, ProviderError::ApiError { status_code: 500, .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn empty_arguments_become_object() {
        assert_eq!(parse_arguments(""), serde_json::json!({}));
    }
}
