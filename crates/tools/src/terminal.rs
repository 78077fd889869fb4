//! Terminal tool: run a shell command in the workspace root.
//!
//! Exclusive: the dispatcher never runs it alongside sibling calls, since a
//! command may touch any file the other tools are working on.

use async_trait::async_trait;
use contextloop_core::error::ToolError;
use contextloop_core::tool::Tool;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::str_arg;

/// Output beyond this many bytes is cut before it reaches the model.
const DEFAULT_MAX_OUTPUT_BYTES: usize = 32 * 1024;

pub struct TerminalTool {
    max_output_bytes: usize,
}

impl TerminalTool {
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }

    fn clip(&self, mut text: String) -> String {
        if text.len() <= self.max_output_bytes {
            return text;
        }
        let mut cut = self.max_output_bytes;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        let dropped = text.len() - cut;
        text.truncate(cut);
        text.push_str(&format!("\n[output truncated: {dropped} bytes omitted]"));
        text
    }
}

impl Default for TerminalTool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OUTPUT_BYTES)
    }
}

#[async_trait]
impl Tool for TerminalTool {
    fn name(&self) -> &str {
        "run_terminal_command"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace directory and return its exit code and output."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"]
        })
    }

    fn exclusive(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        workspace_root: &Path,
    ) -> Result<serde_json::Value, ToolError> {
        let command = str_arg(self.name(), &arguments, "command")?;

        debug!(command = %command, cwd = %workspace_root.display(), "Executing terminal command");

        let mut process = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };

        // Aborting the call (timeout, cancel) drops the future and kills the child
        let output = process
            .current_dir(workspace_root)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ToolError::execution(self.name(), e.to_string()))?;

        let code = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            warn!(command = %command, exit_code = code, "Command failed");
        }

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }

        Ok(serde_json::json!({
            "success": output.status.success(),
            "exit_code": code,
            "output": self.clip(combined),
        }))
    }
}
