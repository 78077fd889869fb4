//! File write tools: create, update and delete files in the workspace.

use async_trait::async_trait;
use contextloop_core::error::ToolError;
use contextloop_core::tool::Tool;
use std::path::Path;

use crate::{display, resolve, str_arg};

async fn ensure_parent(tool: &str, path: &Path) -> Result<(), ToolError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ToolError::execution(tool, format!("Failed to create directory: {e}")))?;
    }
    Ok(())
}

/// Create a file (overwriting any existing one), creating parent directories.
pub struct CreateFileTool;

#[async_trait]
impl Tool for CreateFileTool {
    fn name(&self) -> &str {
        "create_file"
    }

    fn description(&self) -> &str {
        "Create a file in the workspace with the given content. Overwrites an existing file."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path of the file to create, relative to the workspace root"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write (default: empty)"
                }
            },
            "required": ["file_path"]
        })
    }

    fn path_arguments(&self) -> &[&str] {
        &["file_path"]
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        workspace_root: &Path,
    ) -> Result<serde_json::Value, ToolError> {
        let path = str_arg(self.name(), &arguments, "file_path")?;
        let content = arguments["content"].as_str().unwrap_or_default();
        let (workspace, full_path) = resolve(self.name(), workspace_root, path)?;

        ensure_parent(self.name(), &full_path).await?;
        tokio::fs::write(&full_path, content)
            .await
            .map_err(|e| ToolError::execution(self.name(), format!("Failed to write file: {e}")))?;

        Ok(serde_json::json!({
            "file_path": display(&workspace, &full_path),
            "bytes_written": content.len(),
        }))
    }
}

/// Replace the content of an existing file.
pub struct UpdateFileTool;

#[async_trait]
impl Tool for UpdateFileTool {
    fn name(&self) -> &str {
        "update_file"
    }

    fn description(&self) -> &str {
        "Replace the content of an existing workspace file. Fails if the file does not exist."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path of the file to update, relative to the workspace root"
                },
                "content": {
                    "type": "string",
                    "description": "The new content"
                }
            },
            "required": ["file_path", "content"]
        })
    }

    fn path_arguments(&self) -> &[&str] {
        &["file_path"]
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        workspace_root: &Path,
    ) -> Result<serde_json::Value, ToolError> {
        let path = str_arg(self.name(), &arguments, "file_path")?;
        let content = str_arg(self.name(), &arguments, "content")?;
        let (workspace, full_path) = resolve(self.name(), workspace_root, path)?;

        if !full_path.is_file() {
            return Err(ToolError::execution(self.name(), "File does not exist"));
        }

        tokio::fs::write(&full_path, content)
            .await
            .map_err(|e| ToolError::execution(self.name(), format!("Failed to write file: {e}")))?;

        Ok(serde_json::json!({
            "file_path": display(&workspace, &full_path),
            "bytes_written": content.len(),
        }))
    }
}

pub struct DeleteFileTool;

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file from the workspace."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path of the file to delete, relative to the workspace root"
                }
            },
            "required": ["file_path"]
        })
    }

    fn path_arguments(&self) -> &[&str] {
        &["file_path"]
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        workspace_root: &Path,
    ) -> Result<serde_json::Value, ToolError> {
        let path = str_arg(self.name(), &arguments, "file_path")?;
        let (workspace, full_path) = resolve(self.name(), workspace_root, path)?;

        tokio::fs::remove_file(&full_path)
            .await
            .map_err(|e| ToolError::execution(self.name(), format!("Failed to delete file: {e}")))?;

        Ok(serde_json::json!({ "file_path": display(&workspace, &full_path) }))
    }
}
