//! Security module for contextloop: workspace containment.
//!
//! Every filesystem path a tool touches is resolved through a [`Workspace`]
//! before the tool runs. Paths that would land outside the workspace root,
//! whether via `..`, an absolute path, or a symlink, are rejected.

pub mod workspace;

pub use workspace::{PathValidationError, Workspace};
