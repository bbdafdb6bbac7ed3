//! Agenti SDK
//!
//! Shared library providing the error taxonomy for Agenti components.
//! This crate is used by the engine and by any presentation layer built on it.

/// Error types and handling
pub mod errors;

// Re-export commonly used types
pub use errors::{AgentErrorExt, EngineError};
