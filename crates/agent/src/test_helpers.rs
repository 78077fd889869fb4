//! Shared test helpers: a scripted model client and small tools.

use async_trait::async_trait;
use contextloop_core::client::{ModelClient, ModelReply, Usage};
use contextloop_core::error::{ProviderError, ToolError};
use contextloop_core::message::{Message, ToolCall};
use contextloop_core::model::ModelProfile;
use contextloop_core::tool::{Tool, ToolSchema};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What the client was asked, one entry per `send`.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tool_count: usize,
    pub reserved_output: usize,
}

/// A client that returns a scripted sequence of replies.
///
/// Each call to `send` pops the next entry. Running past the end of the
/// script yields an `InvalidResponse` error.
pub struct ScriptedClient {
    replies: Mutex<VecDeque<Result<ModelReply, ProviderError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedClient {
    pub fn new(replies: Vec<Result<ModelReply, ProviderError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        profile: &ModelProfile,
    ) -> Result<ModelReply, ProviderError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            messages: messages.to_vec(),
            tool_count: tools.len(),
            reserved_output: profile.reserved_output,
        });
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::InvalidResponse("script exhausted".into())))
    }
}

/// A text reply with usage attached.
pub fn text_reply(text: &str) -> ModelReply {
    ModelReply::text(text).with_usage(Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    })
}

pub fn call(id: &str, name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall::new(id, name, args)
}

/// Adds two integers. Counts its invocations.
#[derive(Default)]
pub struct SumTool {
    pub invocations: AtomicUsize,
}

impl SumTool {
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for SumTool {
    fn name(&self) -> &str {
        "compute_sum"
    }

    fn description(&self) -> &str {
        "Add two integers."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "a": { "type": "integer" },
                "b": { "type": "integer" }
            },
            "required": ["a", "b"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _workspace_root: &Path,
    ) -> Result<serde_json::Value, ToolError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let a = arguments["a"].as_i64().unwrap_or_default();
        let b = arguments["b"].as_i64().unwrap_or_default();
        Ok(serde_json::json!(a + b))
    }
}

/// Sleeps for `delay_ms`, then records `label` in the shared finish log.
/// Fires `cancel_on_start` (if set) as soon as it begins.
pub struct SleepTool {
    pub finished: std::sync::Arc<Mutex<Vec<String>>>,
    pub exclusive: bool,
    pub cancel_on_start: Option<CancellationToken>,
}

#[async_trait]
impl Tool for SleepTool {
    fn name(&self) -> &str {
        if self.exclusive { "sleep_exclusive" } else { "sleep" }
    }

    fn description(&self) -> &str {
        "Sleep, then echo the label."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "label": { "type": "string" },
                "delay_ms": { "type": "integer", "minimum": 0 }
            },
            "required": ["label", "delay_ms"]
        })
    }

    fn exclusive(&self) -> bool {
        self.exclusive
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _workspace_root: &Path,
    ) -> Result<serde_json::Value, ToolError> {
        let label = arguments["label"].as_str().unwrap_or_default().to_string();
        let delay = arguments["delay_ms"].as_u64().unwrap_or_default();
        if let Some(token) = &self.cancel_on_start {
            token.cancel();
        }
        tokio::time::sleep(Duration::from_millis(delay)).await;
        self.finished.lock().unwrap().push(label.clone());
        Ok(serde_json::json!(label))
    }
}

/// Panics on every call.
pub struct PanicTool;

#[async_trait]
impl Tool for PanicTool {
    fn name(&self) -> &str {
        "explode"
    }

    fn description(&self) -> &str {
        "Always panics."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    async fn execute(
        &self,
        _arguments: serde_json::Value,
        _workspace_root: &Path,
    ) -> Result<serde_json::Value, ToolError> {
        panic!("tool blew up");
    }
}

/// Reports which path it was given. Declares `path` and `paths` as path
/// arguments.
#[derive(Default)]
pub struct PathEchoTool {
    pub invocations: AtomicUsize,
}

#[async_trait]
impl Tool for PathEchoTool {
    fn name(&self) -> &str {
        "echo_path"
    }

    fn description(&self) -> &str {
        "Echo a path argument."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "paths": { "type": "array", "items": { "type": "string" } }
            }
        })
    }

    fn path_arguments(&self) -> &[&str] {
        &["path", "paths"]
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _workspace_root: &Path,
    ) -> Result<serde_json::Value, ToolError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(arguments)
    }
}
