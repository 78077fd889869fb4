//! Model client implementations for contextloop.
//!
//! All clients implement the `contextloop_core::ModelClient` trait.
//! The router selects the correct client based on configuration.

pub mod openai_compat;
pub mod router;

pub use openai_compat::OpenAiCompatClient;
pub use router::ClientRouter;
