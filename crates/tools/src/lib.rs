//! Built-in tool implementations for contextloop.
//!
//! Tools give the agent the ability to interact with its workspace:
//! read and write files, manage directories, run terminal commands,
//! tell the time and do math.
//!
//! Every path argument is confined to the workspace root. The dispatcher
//! checks declared path arguments before a tool runs, and each tool resolves
//! them again through [`Workspace`] to get the absolute location.

pub mod calculator;
pub mod clock;
pub mod directory;
pub mod file_read;
pub mod file_transfer;
pub mod file_write;
pub mod terminal;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use contextloop_core::error::{RegistryError, ToolError};
use contextloop_core::tool::{Tool, ToolRegistry};
use contextloop_security::Workspace;

/// Create a tool registry with all built-in tools.
pub fn default_registry() -> Result<ToolRegistry, RegistryError> {
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(file_read::ReadFileTool),
        Arc::new(file_write::CreateFileTool),
        Arc::new(file_write::UpdateFileTool),
        Arc::new(file_write::DeleteFileTool),
        Arc::new(file_read::ListDirectoryTool),
        Arc::new(directory::CreateDirectoryTool),
        Arc::new(directory::DeleteDirectoryTool),
        Arc::new(file_transfer::RenameFileTool),
        Arc::new(file_transfer::CopyFileTool),
        Arc::new(file_transfer::MoveFileTool),
        Arc::new(terminal::TerminalTool::default()),
        Arc::new(clock::CurrentTimeTool),
        Arc::new(calculator::CalculatorTool),
    ];

    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register_tool(tool)?;
    }
    Ok(registry)
}

/// Fetch a required string argument.
pub(crate) fn str_arg<'a>(
    tool: &str,
    arguments: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, ToolError> {
    arguments[key]
        .as_str()
        .ok_or_else(|| ToolError::execution(tool, format!("Missing '{key}' argument")))
}

/// Resolve a path argument inside the workspace.
pub(crate) fn resolve(
    tool: &str,
    workspace_root: &Path,
    path: &str,
) -> Result<(Workspace, PathBuf), ToolError> {
    let access = |reason: String| ToolError::WorkspaceAccess {
        tool: tool.to_string(),
        reason,
    };
    let workspace = Workspace::new(workspace_root).map_err(|e| access(e.to_string()))?;
    let resolved = workspace.resolve(path).map_err(|e| access(e.to_string()))?;
    Ok((workspace, resolved))
}

/// Display form of a resolved path, relative to the workspace root.
pub(crate) fn display(workspace: &Workspace, path: &Path) -> String {
    let relative = workspace.relative(path);
    if relative.as_os_str().is_empty() {
        ".".into()
    } else {
        relative.display().to_string()
    }
}
