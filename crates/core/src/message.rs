//! Message and Conversation domain types.
//!
//! A [`Conversation`] is the dialogue history of one session. It is
//! append-only except for compression, which swaps a contiguous run of old
//! messages for a single summary message. Every mutation keeps the ordering
//! invariant: a `tool` message always follows the assistant message holding
//! its originating call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;
use uuid::Uuid;

use crate::error::ConversationError;

/// Prefix written at the top of every compression summary.
pub const SUMMARY_HEADER: &str = "[Conversation Summary]";

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The model
    Assistant,
    /// System instructions, and compression summaries
    System,
    /// Tool execution result
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        };
        f.write_str(s)
    }
}

/// Distinguishes raw dialogue turns from compression summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Raw,
    /// Replaces a folded prefix of older messages. Never re-summarized.
    Summary,
}

impl MessageKind {
    fn is_raw(&self) -> bool {
        *self == MessageKind::Raw
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the model's tool_call.id)
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content (structured payloads are carried as JSON text)
    pub content: String,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Raw turn or compression summary
    #[serde(default, skip_serializing_if = "MessageKind::is_raw")]
    pub kind: MessageKind,

    /// Exact token count, when the provider reported one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_tokens: Option<usize>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Optional metadata (provider info, compression stats, etc.)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            kind: MessageKind::Raw,
            estimated_tokens: None,
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create an assistant message carrying tool calls.
    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::with_role(Role::Assistant, content);
        msg.tool_calls = tool_calls;
        msg
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::with_role(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    /// Create a compression summary.
    pub fn summary(text: impl AsRef<str>) -> Self {
        let mut msg = Self::with_role(Role::System, format!("{SUMMARY_HEADER}\n{}", text.as_ref()));
        msg.kind = MessageKind::Summary;
        msg
    }

    pub fn is_summary(&self) -> bool {
        self.kind == MessageKind::Summary
    }

    /// Attach an exact token count.
    pub fn with_token_count(mut self, tokens: usize) -> Self {
        self.estimated_tokens = Some(tokens);
        self
    }
}

/// A conversation is an ordered sequence of messages with shared context.
///
/// The message vector is private so that every mutation goes through the
/// invariant checks below.
#[derive(Debug, Clone)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    messages: Vec<Message>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last mutation happened
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuild a conversation from a previously persisted message sequence.
    pub fn from_messages(messages: Vec<Message>) -> Result<Self, ConversationError> {
        let mut conv = Self::new();
        for message in messages {
            conv.push(message)?;
        }
        Ok(conv)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Append a message, rejecting orphaned tool results.
    pub fn push(&mut self, message: Message) -> Result<(), ConversationError> {
        let index = self.messages.len();
        match message.role {
            Role::Tool => {
                let call_id = message
                    .tool_call_id
                    .as_deref()
                    .ok_or(ConversationError::MissingToolCallId { index })?;
                if self.origin_of(call_id, index).is_none() {
                    return Err(ConversationError::OrphanToolResult {
                        index,
                        tool_call_id: call_id.to_string(),
                    });
                }
            }
            Role::Assistant => {
                let mut seen = std::collections::HashSet::new();
                for call in &message.tool_calls {
                    if !seen.insert(call.id.as_str()) {
                        return Err(ConversationError::DuplicateToolCallId(call.id.clone()));
                    }
                }
            }
            Role::User | Role::System => {}
        }

        self.updated_at = Utc::now();
        self.messages.push(message);
        Ok(())
    }

    /// Insert a system prompt at the very front.
    pub fn prepend_system(&mut self, content: impl Into<String>) {
        self.updated_at = Utc::now();
        self.messages.insert(0, Message::system(content));
    }

    /// Index of the assistant message that issued `call_id`, searching
    /// backwards from `before`.
    pub fn origin_of(&self, call_id: &str, before: usize) -> Option<usize> {
        self.messages[..before.min(self.messages.len())]
            .iter()
            .rposition(|m| {
                m.role == Role::Assistant && m.tool_calls.iter().any(|c| c.id == call_id)
            })
    }

    /// Indices where an exchange starts.
    ///
    /// A user message opens an exchange that includes the first reply to
    /// it. Every later assistant step in the same turn opens its own
    /// exchange together with the tool results answering it.
    pub fn exchange_starts(&self) -> Vec<usize> {
        self.messages
            .iter()
            .enumerate()
            .filter(|(i, m)| match m.role {
                Role::User => true,
                Role::Assistant => *i == 0 || self.messages[i - 1].role != Role::User,
                _ => false,
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Check that `range` holds every call/result pair it touches.
    pub fn check_range(&self, range: &Range<usize>) -> Result<(), ConversationError> {
        if range.start > range.end || range.end > self.messages.len() {
            return Err(ConversationError::InvalidRange {
                start: range.start,
                end: range.end,
                len: self.messages.len(),
            });
        }

        for (index, message) in self.messages.iter().enumerate().skip(range.start) {
            if message.role != Role::Tool {
                continue;
            }
            let Some(call_id) = message.tool_call_id.as_deref() else {
                continue;
            };
            let Some(origin) = self.origin_of(call_id, index) else {
                continue;
            };
            if range.contains(&index) != range.contains(&origin) {
                return Err(ConversationError::SplitToolExchange {
                    start: range.start,
                    end: range.end,
                    tool_call_id: call_id.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Replace `range` with a single summary message. Returns the removed
    /// messages in their original order.
    pub fn replace_range(
        &mut self,
        range: Range<usize>,
        summary: Message,
    ) -> Result<Vec<Message>, ConversationError> {
        self.check_range(&range)?;
        self.updated_at = Utc::now();
        let removed = self
            .messages
            .splice(range, std::iter::once(summary))
            .collect();
        Ok(removed)
    }

    /// Load a persisted message sequence (JSON array).
    pub fn load_json(path: &Path) -> crate::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let messages: Vec<Message> = serde_json::from_str(&raw)?;
        Ok(Self::from_messages(messages)?)
    }

    /// Persist the message sequence as a JSON array.
    pub fn save_json(&self, path: &Path) -> crate::Result<()> {
        let json = serde_json::to_string_pretty(&self.messages)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(conv: &mut Conversation, call_id: &str) {
        conv.push(Message::assistant_with_calls(
            "",
            vec![ToolCall::new(call_id, "echo", serde_json::json!({}))],
        ))
        .unwrap();
        conv.push(Message::tool_result(call_id, "ok")).unwrap();
    }

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello, agent!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello, agent!");
        assert!(msg.tool_calls.is_empty());
        assert!(!msg.is_summary());
    }

    #[test]
    fn conversation_tracks_updates() {
        let mut conv = Conversation::new();
        let created = conv.created_at;

        conv.push(Message::user("First message")).unwrap();
        assert_eq!(conv.len(), 1);
        assert!(conv.updated_at >= created);
    }

    #[test]
    fn orphan_tool_result_rejected() {
        let mut conv = Conversation::new();
        conv.push(Message::user("hi")).unwrap();
        let err = conv.push(Message::tool_result("call_x", "4")).unwrap_err();
        assert!(matches!(err, ConversationError::OrphanToolResult { index: 1, .. }));
        assert_eq!(conv.len(), 1);
    }

    #[test]
    fn tool_message_without_id_rejected() {
        let mut conv = Conversation::new();
        let mut msg = Message::tool_result("x", "4");
        msg.tool_call_id = None;
        assert!(matches!(
            conv.push(msg),
            Err(ConversationError::MissingToolCallId { index: 0 })
        ));
    }

    #[test]
    fn duplicate_call_ids_in_one_message_rejected() {
        let mut conv = Conversation::new();
        let msg = Message::assistant_with_calls(
            "",
            vec![
                ToolCall::new("c1", "a", serde_json::json!({})),
                ToolCall::new("c1", "b", serde_json::json!({})),
            ],
        );
        assert!(matches!(
            conv.push(msg),
            Err(ConversationError::DuplicateToolCallId(_))
        ));
    }

    #[test]
    fn message_serialization_roundtrip() {
        let msg = Message::summary("User asked about Rust.");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"kind\":\"summary\""));
        let deserialized: Message = serde_json::from_str(&json).unwrap();
        assert!(deserialized.is_summary());
        assert!(deserialized.content.starts_with(SUMMARY_HEADER));

        let raw = serde_json::to_string(&Message::user("x")).unwrap();
        assert!(!raw.contains("\"kind\""));
    }

    #[test]
    fn replace_range_rejects_split_exchange() {
        let mut conv = Conversation::new();
        conv.push(Message::user("q")).unwrap();
        exchange(&mut conv, "c1");
        conv.push(Message::assistant("done")).unwrap();

        // [user, assistant(c1), tool(c1), assistant]: cutting after the call splits it
        let err = conv
            .replace_range(0..2, Message::summary("s"))
            .unwrap_err();
        assert!(matches!(err, ConversationError::SplitToolExchange { .. }));

        let removed = conv.replace_range(0..3, Message::summary("s")).unwrap();
        assert_eq!(removed.len(), 3);
        assert_eq!(conv.len(), 2);
        assert!(conv.messages()[0].is_summary());
    }

    #[test]
    fn replace_range_out_of_bounds() {
        let mut conv = Conversation::new();
        conv.push(Message::user("q")).unwrap();
        assert!(matches!(
            conv.replace_range(0..5, Message::summary("s")),
            Err(ConversationError::InvalidRange { len: 1, .. })
        ));
    }

    #[test]
    fn exchange_starts_split_turns_at_follow_up_steps() {
        let mut conv = Conversation::new();
        conv.push(Message::system("sys")).unwrap();
        conv.push(Message::user("a")).unwrap();
        exchange(&mut conv, "c1");
        conv.push(Message::user("b")).unwrap();
        exchange(&mut conv, "c2");
        exchange(&mut conv, "c3");
        conv.push(Message::assistant("done")).unwrap();
        // [sys, user, a(c1), t(c1), user, a(c2), t(c2), a(c3), t(c3), a]
        assert_eq!(conv.exchange_starts(), vec![1, 4, 7, 9]);
    }

    #[test]
    fn from_messages_validates_sequence() {
        let ok = vec![
            Message::user("q"),
            Message::assistant_with_calls("", vec![ToolCall::new("c1", "t", serde_json::json!({}))]),
            Message::tool_result("c1", "r"),
        ];
        assert_eq!(Conversation::from_messages(ok).unwrap().len(), 3);

        let bad = vec![Message::user("q"), Message::tool_result("c1", "r")];
        assert!(Conversation::from_messages(bad).is_err());
    }

    #[test]
    fn json_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let mut conv = Conversation::new();
        conv.push(Message::user("what's 2+2")).unwrap();
        exchange(&mut conv, "c1");
        conv.save_json(&path).unwrap();

        let restored = Conversation::load_json(&path).unwrap();
        assert_eq!(restored.messages(), conv.messages());
    }
}
