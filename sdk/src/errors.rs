//! Error types and handling
//!
//! This module provides the error types used throughout the Agenti engine.
//! All errors implement the `AgentErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! # Error Taxonomy
//!
//! Most failures in the task loop are *not* errors at this level:
//! - Rejected input (empty or fence-only) is dropped silently
//! - Failed shell tasks are captured as log output
//! - Planner degradation falls back to the offline plan
//! - A corrupt memory file is quarantined and reinitialized
//!
//! What remains are configuration problems, unrecoverable persistence I/O,
//! and misuse of the loop controller.

use thiserror::Error;

/// Trait for Agenti error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait AgentErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around. Non-recoverable
    /// errors typically require manual intervention.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Examples
///
/// ```
/// use sdk::errors::{AgentErrorExt, EngineError};
///
/// let error = EngineError::LoopAlreadyRunning;
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal = EngineError::Persistence("disk full".to_string());
/// assert!(!fatal.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Persistence errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Autonomy loop errors
    #[error("Autonomy loop already running")]
    LoopAlreadyRunning,

    #[error("Autonomy loop is not running")]
    LoopNotRunning,

    #[error("Autonomy loop task failed: {0}")]
    LoopFailed(String),
}

impl AgentErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Persistence(_) => {
                "Could not write the agent memory file. Check disk space and permissions"
            }
            Self::Serialization(_) => "Agent memory could not be encoded",
            Self::LoopAlreadyRunning => "Stop the running loop first with 'agenti stop'",
            Self::LoopNotRunning => "Start a loop first with 'agenti run'",
            Self::LoopFailed(_) => "The autonomy loop stopped unexpectedly. Check the logs",
        }
    }

    fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Persistence(_) | Self::Serialization(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_is_fatal() {
        let err = EngineError::Persistence("rename failed".to_string());
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("rename failed"));
    }

    #[test]
    fn test_loop_errors_have_hints() {
        assert!(EngineError::LoopAlreadyRunning.user_hint().contains("stop"));
        assert!(EngineError::LoopNotRunning.is_recoverable());
    }
}
