//! Read-only workspace tools: read a file, list a directory.

use async_trait::async_trait;
use contextloop_core::error::ToolError;
use contextloop_core::tool::Tool;
use std::path::Path;

use crate::{display, resolve, str_arg};

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file in the workspace."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path of the file, relative to the workspace root"
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

        let content = tokio::fs::read_to_string(&full_path)
            .await
            .map_err(|e| ToolError::execution(self.name(), format!("Failed to read file: {e}")))?;

        Ok(serde_json::json!({
            "file_path": display(&workspace, &full_path),
            "content": content,
        }))
    }
}

pub struct ListDirectoryTool;

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the entries of a workspace directory with their type and size."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "dir_path": {
                    "type": "string",
                    "description": "Directory to list, relative to the workspace root (default: root)"
                }
            }
        })
    }

    fn path_arguments(&self) -> &[&str] {
        &["dir_path"]
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        workspace_root: &Path,
    ) -> Result<serde_json::Value, ToolError> {
        let path = arguments["dir_path"].as_str().unwrap_or(".");
        let (workspace, full_path) = resolve(self.name(), workspace_root, path)?;

        let failed =
            |e: std::io::Error| ToolError::execution("list_directory", format!("Failed to list: {e}"));
        let mut entries = tokio::fs::read_dir(&full_path).await.map_err(failed)?;

        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(failed)? {
            let metadata = entry.metadata().await.map_err(failed)?;
            let entry_path = entry.path();
            items.push(serde_json::json!({
                "name": entry.file_name().to_string_lossy(),
                "path": display(&workspace, &entry_path),
                "is_directory": metadata.is_dir(),
                "size": if metadata.is_file() { metadata.len() } else { 0 },
            }));
        }
        items.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

        Ok(serde_json::json!({
            "dir_path": display(&workspace, &full_path),
            "items": items,
        }))
    }
}
