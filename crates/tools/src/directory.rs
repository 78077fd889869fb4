//! Directory tools: create and delete directories in the workspace.

use async_trait::async_trait;
use contextloop_core::error::ToolError;
use contextloop_core::tool::Tool;
use std::path::Path;

use crate::{display, resolve, str_arg};

pub struct CreateDirectoryTool;

#[async_trait]
impl Tool for CreateDirectoryTool {
    fn name(&self) -> &str {
        "create_directory"
    }

    fn description(&self) -> &str {
        "Create a directory (and any missing parents) in the workspace."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "dir_path": {
                    "type": "string",
                    "description": "Directory to create, relative to the workspace root"
                }
            },
            "required": ["dir_path"]
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
        let path = str_arg(self.name(), &arguments, "dir_path")?;
        let (workspace, full_path) = resolve(self.name(), workspace_root, path)?;

        tokio::fs::create_dir_all(&full_path).await.map_err(|e| {
            ToolError::execution(self.name(), format!("Failed to create directory: {e}"))
        })?;

        Ok(serde_json::json!({ "dir_path": display(&workspace, &full_path) }))
    }
}

/// Delete a directory and everything under it. The root itself is refused.
pub struct DeleteDirectoryTool;

#[async_trait]
impl Tool for DeleteDirectoryTool {
    fn name(&self) -> &str {
        "delete_directory"
    }

    fn description(&self) -> &str {
        "Delete a workspace directory and all of its contents."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "dir_path": {
                    "type": "string",
                    "description": "Directory to delete, relative to the workspace root"
                }
            },
            "required": ["dir_path"]
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
        let path = str_arg(self.name(), &arguments, "dir_path")?;
        let (workspace, full_path) = resolve(self.name(), workspace_root, path)?;

        if full_path == workspace.root() {
            return Err(ToolError::WorkspaceAccess {
                tool: self.name().into(),
                reason: "Refusing to delete the workspace root".into(),
            });
        }

        tokio::fs::remove_dir_all(&full_path).await.map_err(|e| {
            ToolError::execution(self.name(), format!("Failed to delete directory: {e}"))
        })?;

        Ok(serde_json::json!({ "dir_path": display(&workspace, &full_path) }))
    }
}
