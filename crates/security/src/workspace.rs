//! Path validation: filesystem sandboxing to the workspace root.
//!
//! Resolution is two-step. The requested path is first joined to the root
//! and normalized lexically, so `..` can never climb above the root. The
//! deepest existing ancestor is then canonicalized, which catches symlinks
//! that point outside.

use std::path::{Component, Path, PathBuf};

/// Error returned when path validation fails.
#[derive(Debug, thiserror::Error)]
pub enum PathValidationError {
    #[error("Path '{path}' resolves outside the workspace root")]
    OutsideWorkspace { path: String },

    #[error("Path traversal detected in '{path}'")]
    PathTraversal { path: String },

    #[error("Path '{path}' escapes the workspace through a symlink")]
    SymlinkEscape { path: String },

    #[error("Empty path")]
    EmptyPath,

    #[error("Workspace root '{root}' is unavailable: {reason}")]
    RootUnavailable { root: String, reason: String },

    #[error("Failed to canonicalize path '{path}': {reason}")]
    CanonicalizeFailed { path: String, reason: String },
}

/// A directory that tool calls are confined to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Open a workspace rooted at `root`, which must be an existing directory.
    ///
    /// A leading `~` expands to the home directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, PathValidationError> {
        let expanded = expand_tilde(root.as_ref());
        let unavailable = |reason: String| PathValidationError::RootUnavailable {
            root: expanded.display().to_string(),
            reason,
        };

        let canonical = expanded.canonicalize().map_err(|e| unavailable(e.to_string()))?;
        if !canonical.is_dir() {
            return Err(unavailable("not a directory".into()));
        }
        Ok(Self { root: canonical })
    }

    /// The canonical root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a tool-supplied path to an absolute path inside the root.
    ///
    /// Relative paths are taken relative to the root. The target does not
    /// need to exist yet (tools create files).
    pub fn resolve(&self, requested: &str) -> Result<PathBuf, PathValidationError> {
        if requested.trim().is_empty() {
            return Err(PathValidationError::EmptyPath);
        }

        let input = Path::new(requested);
        let joined = if input.is_absolute() {
            input.to_path_buf()
        } else {
            self.root.join(input)
        };

        let normalized = normalize(&joined);
        if !normalized.starts_with(&self.root) {
            let err = if input.is_absolute() {
                PathValidationError::OutsideWorkspace { path: requested.into() }
            } else {
                PathValidationError::PathTraversal { path: requested.into() }
            };
            tracing::warn!(path = %requested, root = %self.root.display(), "Path rejected");
            return Err(err);
        }

        // Canonicalize the deepest ancestor that exists and reattach the rest
        let mut existing = normalized.as_path();
        let mut tail = Vec::new();
        while !existing.exists() {
            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    tail.push(name.to_os_string());
                    existing = parent;
                }
                _ => break,
            }
        }

        let mut resolved =
            existing
                .canonicalize()
                .map_err(|e| PathValidationError::CanonicalizeFailed {
                    path: requested.into(),
                    reason: e.to_string(),
                })?;
        if !resolved.starts_with(&self.root) {
            tracing::warn!(path = %requested, "Symlink escape rejected");
            return Err(PathValidationError::SymlinkEscape { path: requested.into() });
        }
        for name in tail.into_iter().rev() {
            resolved.push(name);
        }
        Ok(resolved)
    }

    /// Render `path` relative to the root, for tool output.
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(name) => out.push(name),
        }
    }
    out
}

/// Expand ~ to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~")
        && let Some(home) = home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("USERPROFILE").map(PathBuf::from)
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("HOME").map(PathBuf::from)
    }
}
