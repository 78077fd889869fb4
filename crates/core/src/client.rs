//! ModelClient trait: the abstraction over chat-completion endpoints.
//!
//! A client sends the current message sequence plus the available tool
//! schemas to a model and returns either text, tool calls, or both.
//!
//! Implementations: OpenAI-compatible endpoints (see `contextloop-providers`),
//! scripted clients in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::{Message, ToolCall};
use crate::model::ModelProfile;
use crate::tool::ToolSchema;

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A successful model reply.
///
/// `content == None && tool_calls.is_empty()` is a valid (empty) reply, not
/// an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelReply {
    #[serde(default)]
    pub content: Option<String>,

    /// Requested tool calls, in the order the model emitted them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ModelReply {
    /// A plain text answer.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// A reply requesting tool calls.
    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Fold this reply into the assistant message appended to the history.
    pub fn into_message(self) -> Message {
        let completion = self.usage.map(|u| u.completion_tokens as usize);
        let mut message =
            Message::assistant_with_calls(self.content.unwrap_or_default(), self.tool_calls);
        if let Some(tokens) = completion.filter(|t| *t > 0) {
            message = message.with_token_count(tokens);
        }
        message
    }
}

/// The model endpoint.
///
/// The agent loop calls `send()` without knowing which backend is used.
/// `profile.reserved_output` bounds the reply length; the summarizer relies
/// on that to keep summaries short.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// A human-readable name for this client (e.g., "openrouter").
    fn name(&self) -> &str;

    /// Send the conversation and tool schemas, returning the model's reply.
    async fn send(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        profile: &ModelProfile,
    ) -> Result<ModelReply, ProviderError>;
}
