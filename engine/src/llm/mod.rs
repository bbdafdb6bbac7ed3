//! LLM Provider Abstraction Layer
//!
//! The planner only needs one capability from a language model: given a
//! prompt, return text. [`LLMProvider`] captures exactly that, with adapters
//! for OpenAI-compatible chat APIs and Ollama, plus an [`OfflineProvider`]
//! that is always unavailable and drives the deterministic fallback plan.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::LLMConfig;

pub mod offline;
pub mod ollama;
pub mod openai;

pub use offline::OfflineProvider;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
///
/// The planner treats every variant the same way (fall back), but the
/// distinction is kept for logs.
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Message in a chat request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender
    pub role: MessageRole,

    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// One generation call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Optional system instruction
    pub system: Option<String>,

    /// User prompt
    pub prompt: String,

    /// Model override; providers use their configured model when `None`
    pub model: Option<String>,

    /// Sampling temperature
    pub temperature: f32,

    /// Upper bound on generated tokens
    pub max_tokens: u32,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            model: None,
            temperature: 0.2,
            max_tokens: 500,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// System (if any) followed by the user prompt
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(&self.prompt));
        messages
    }
}

/// LLM Provider trait that all providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "ollama", "openai")
    fn name(&self) -> &str;

    /// Returns true if this is a local provider
    fn is_local(&self) -> bool;

    /// Generate text for the request
    ///
    /// # Returns
    /// * `Ok(String)` - The raw completion text
    /// * `Err(LLMError)` - If the request fails for any reason
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// Check if the provider is currently healthy and available
    async fn check_health(&self) -> bool {
        true
    }
}

/// Build the provider selected by `config.default_provider`.
///
/// Unknown names fall back to the offline provider; config validation
/// rejects them before this point in normal use.
pub fn build_provider(config: &LLMConfig) -> Arc<dyn LLMProvider> {
    match config.default_provider.as_str() {
        "openai" => Arc::new(openai::OpenAIProvider::from_env(config.openai.clone())),
        "ollama" => Arc::new(ollama::OllamaProvider::new(
            config.ollama.base_url.clone(),
            config.ollama.model.clone(),
        )),
        other => {
            if other != "offline" {
                tracing::warn!(provider = other, "unknown provider, planner will run offline");
            }
            Arc::new(OfflineProvider)
        }
    }
}
