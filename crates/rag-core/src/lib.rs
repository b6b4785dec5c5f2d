//! rag-core - Core types and traits for the chat service
//!
//! This crate provides the foundational types, collaborator traits,
//! configuration and error handling used throughout the rag-chat workspace.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::{ErrorKind, RagError, Result};
pub use traits::*;
pub use types::*;
