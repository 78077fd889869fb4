//! Error types for the contextloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the loop-level taxonomy
//! lives in [`LoopError`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The top-level error type for all contextloop operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model endpoint errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    // --- Conversation invariants ---
    #[error("Conversation error: {0}")]
    Conversation(#[from] ConversationError),

    // --- Agent loop ---
    #[error("Agent loop failed: {0}")]
    Loop(#[from] LoopError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures reported by a [`ModelClient`](crate::client::ModelClient).
///
/// These are transport-level failures. A valid reply with no content and no
/// tool calls is *not* an error.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The endpoint rejected the request as too long for the model's window.
    #[error("Context length exceeded: {0}")]
    ContextLengthExceeded(String),
}

impl ProviderError {
    /// Whether sending the same request again could succeed.
    ///
    /// Only transport trouble qualifies: network failures, timeouts, rate
    /// limits and server-side errors. A 4xx other than 408/429 rejects the
    /// request itself.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Network(_)
            | ProviderError::Timeout(_)
            | ProviderError::RateLimited { .. } => true,
            ProviderError::ApiError { status_code, .. } => {
                !(400..500).contains(status_code) || matches!(status_code, 408 | 429)
            }
            ProviderError::AuthenticationFailed(_)
            | ProviderError::NotConfigured(_)
            | ProviderError::InvalidResponse(_)
            | ProviderError::ContextLengthExceeded(_) => false,
        }
    }
}

/// Tool-call-local failures. Every one of these degrades to an `error`
/// [`ToolResult`](crate::tool::ToolResult); none aborts the loop.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid arguments for {tool}: {}", violations.join("; "))]
    SchemaValidation {
        tool: String,
        violations: Vec<String>,
    },

    #[error("Workspace access denied for {tool}: {reason}")]
    WorkspaceAccess { tool: String, reason: String },

    #[error("Tool execution failed: {tool}: {reason}")]
    Execution { tool: String, reason: String },

    #[error("Tool timed out: {tool} after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },
}

impl ToolError {
    /// Shorthand for a handler-internal failure.
    pub fn execution(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        ToolError::Execution {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// The taxonomy name reported back to the model.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::UnknownTool { .. } => "UnknownToolError",
            ToolError::SchemaValidation { .. } => "SchemaValidationError",
            ToolError::WorkspaceAccess { .. } => "WorkspaceAccessError",
            ToolError::Execution { .. } | ToolError::Timeout { .. } => "ToolExecutionError",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("Invalid parameter schema for {tool}: {reason}")]
    InvalidSchema { tool: String, reason: String },

    #[error("Model profile already registered: {0}")]
    DuplicateProfile(String),

    #[error("Unknown model profile '{id}' (known: {})", known.join(", "))]
    UnknownProfile { id: String, known: Vec<String> },
}

/// Violations of the Conversation ordering invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversationError {
    #[error("Tool message at index {index} references unknown tool call '{tool_call_id}'")]
    OrphanToolResult { index: usize, tool_call_id: String },

    #[error("Tool message at index {index} has no tool_call_id")]
    MissingToolCallId { index: usize },

    #[error("Duplicate tool call id '{0}'")]
    DuplicateToolCallId(String),

    #[error("Range {start}..{end} would separate tool call '{tool_call_id}' from its result")]
    SplitToolExchange {
        start: usize,
        end: usize,
        tool_call_id: String,
    },

    #[error("Range {start}..{end} is out of bounds for {len} messages")]
    InvalidRange { start: usize, end: usize, len: usize },
}

/// Loop-level failures. These terminate the session.
#[derive(Debug, Clone, Error)]
pub enum LoopError {
    #[error("Model endpoint unavailable after {attempts} attempt(s): {last_error}")]
    ModelUnavailable {
        attempts: u32,
        last_error: ProviderError,
    },

    #[error("Context overflow: estimate {estimate} tokens, target at most {target} tokens")]
    ContextOverflow { estimate: usize, target: i64 },

    #[error("Exceeded {limit} loop iterations without a final answer")]
    MaxIterationsExceeded { limit: u32 },

    #[error("Conversation invariant violated: {0}")]
    Conversation(#[from] ConversationError),
}
