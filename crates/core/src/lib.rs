//! # contextloop core
//!
//! Domain types, traits, and error definitions for the contextloop agent
//! runtime. This crate has no framework dependencies; it defines the model
//! the other crates implement against.
//!
//! ## Layout
//!
//! - [`message`]: messages and the invariant-keeping [`Conversation`]
//! - [`model`]: model profiles and their registry
//! - [`tool`]: the [`Tool`] handler trait, schemas and the [`ToolRegistry`]
//! - [`client`]: the [`ModelClient`] trait implemented by providers
//! - [`event`]: domain events on a broadcast bus
//! - [`error`]: the error taxonomy

pub mod client;
pub mod error;
pub mod event;
pub mod message;
pub mod model;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use client::{ModelClient, ModelReply, Usage};
pub use error::{
    ConversationError, Error, LoopError, ProviderError, RegistryError, Result, ToolError,
};
pub use event::{DomainEvent, EventBus};
pub use message::{Conversation, ConversationId, Message, MessageKind, Role, ToolCall};
pub use model::{ModelProfile, ModelProfileRegistry, parse_context_limit};
pub use tool::{
    ParameterSchema, Tool, ToolDefinition, ToolRegistry, ToolResult, ToolSchema, ToolStatus,
};
