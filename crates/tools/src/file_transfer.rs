//! Rename, copy and move within the workspace. Both endpoints are confined.

use async_trait::async_trait;
use contextloop_core::error::ToolError;
use contextloop_core::tool::Tool;
use std::path::{Path, PathBuf};

use crate::{display, resolve, str_arg};

/// Resolve the (source, destination) pair named by `src_key` / `dst_key`.
fn endpoints(
    tool: &str,
    arguments: &serde_json::Value,
    workspace_root: &Path,
    src_key: &str,
    dst_key: &str,
) -> Result<(contextloop_security::Workspace, PathBuf, PathBuf), ToolError> {
    let src = str_arg(tool, arguments, src_key)?;
    let dst = str_arg(tool, arguments, dst_key)?;
    let (workspace, src_path) = resolve(tool, workspace_root, src)?;
    let (_, dst_path) = resolve(tool, workspace_root, dst)?;
    Ok((workspace, src_path, dst_path))
}

fn two_paths_schema(src_key: &str, dst_key: &str, what: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            src_key: {
                "type": "string",
                "description": format!("Existing {what}, relative to the workspace root")
            },
            dst_key: {
                "type": "string",
                "description": "Destination path, relative to the workspace root"
            }
        },
        "required": [src_key, dst_key]
    })
}

async fn rename(tool: &str, src: &Path, dst: &Path) -> Result<(), ToolError> {
    if let Some(parent) = dst.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ToolError::execution(tool, format!("Failed to create directory: {e}")))?;
    }
    tokio::fs::rename(src, dst)
        .await
        .map_err(|e| ToolError::execution(tool, e.to_string()))
}

pub struct RenameFileTool;

#[async_trait]
impl Tool for RenameFileTool {
    fn name(&self) -> &str {
        "rename_file"
    }

    fn description(&self) -> &str {
        "Rename a file or directory in the workspace."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        two_paths_schema("old_path", "new_path", "file or directory")
    }

    fn path_arguments(&self) -> &[&str] {
        &["old_path", "new_path"]
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        workspace_root: &Path,
    ) -> Result<serde_json::Value, ToolError> {
        let (workspace, old, new) =
            endpoints(self.name(), &arguments, workspace_root, "old_path", "new_path")?;
        rename(self.name(), &old, &new).await?;
        Ok(serde_json::json!({
            "old_path": display(&workspace, &old),
            "new_path": display(&workspace, &new),
        }))
    }
}

/// Copy a file, or a directory recursively.
pub struct CopyFileTool;

#[async_trait]
impl Tool for CopyFileTool {
    fn name(&self) -> &str {
        "copy_file"
    }

    fn description(&self) -> &str {
        "Copy a file or directory (recursively) within the workspace."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        two_paths_schema("src_path", "dst_path", "file or directory")
    }

    fn path_arguments(&self) -> &[&str] {
        &["src_path", "dst_path"]
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        workspace_root: &Path,
    ) -> Result<serde_json::Value, ToolError> {
        let (workspace, src, dst) =
            endpoints(self.name(), &arguments, workspace_root, "src_path", "dst_path")?;

        let (from, to) = (src.clone(), dst.clone());
        let bytes = tokio::task::spawn_blocking(move || copy_recursive(&from, &to))
            .await
            .map_err(|e| ToolError::execution("copy_file", e.to_string()))?
            .map_err(|e| ToolError::execution("copy_file", format!("Failed to copy: {e}")))?;

        Ok(serde_json::json!({
            "src_path": display(&workspace, &src),
            "dst_path": display(&workspace, &dst),
            "bytes_copied": bytes,
        }))
    }
}

/// Copy `src` to `dst`, descending into directories. Symlinks are not followed.
fn copy_recursive(src: &Path, dst: &Path) -> std::io::Result<u64> {
    let metadata = std::fs::symlink_metadata(src)?;
    if metadata.is_dir() {
        std::fs::create_dir_all(dst)?;
        let mut total = 0;
        for entry in std::fs::read_dir(src)? {
            let entry = entry?;
            total += copy_recursive(&entry.path(), &dst.join(entry.file_name()))?;
        }
        Ok(total)
    } else if metadata.is_file() {
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(src, dst)
    } else {
        Ok(0)
    }
}

pub struct MoveFileTool;

#[async_trait]
impl Tool for MoveFileTool {
    fn name(&self) -> &str {
        "move_file"
    }

    fn description(&self) -> &str {
        "Move a file or directory to another location in the workspace."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        two_paths_schema("src_path", "dst_path", "file or directory")
    }

    fn path_arguments(&self) -> &[&str] {
        &["src_path", "dst_path"]
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        workspace_root: &Path,
    ) -> Result<serde_json::Value, ToolError> {
        let (workspace, src, mut dst) =
            endpoints(self.name(), &arguments, workspace_root, "src_path", "dst_path")?;

        // Moving into an existing directory keeps the file name
        if dst.is_dir()
            && let Some(name) = src.file_name()
        {
            dst = dst.join(name);
        }
        rename(self.name(), &src, &dst).await?;

        Ok(serde_json::json!({
            "src_path": display(&workspace, &src),
            "dst_path": display(&workspace, &dst),
        }))
    }
}
