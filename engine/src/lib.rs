//! Agenti Engine Library
//!
//! This library provides the core functionality of the Agenti task runner.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Task type and input classification
pub mod task;

/// Durable JSON memory store
pub mod store;

/// LLM provider abstraction layer
pub mod llm;

/// Goal planning with offline fallback
pub mod planner;

/// Queue execution for shell and LLM tasks
pub mod executor;

/// Agent facade, autonomy loops and reflection
pub mod agent;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;

/// Telemetry and logging module
pub mod telemetry;
