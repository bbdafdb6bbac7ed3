//! Ollama LLM Provider
//!
//! Ollama runs models locally, typically at http://localhost:11434. No API
//! key is required; requests go to `/api/chat` in non-streaming mode.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{GenerationRequest, LLMError, LLMProvider, Result};

/// Ollama provider configuration
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    /// Base URL for Ollama API (typically http://localhost:11434)
    base_url: String,

    /// Model name to use (e.g., "llama3.1:8b")
    model: String,

    /// HTTP client for API requests
    client: Client,
}

impl OllamaProvider {
    /// Create a new Ollama provider
    ///
    /// # Arguments
    /// * `base_url` - Base URL for Ollama API (e.g., "http://localhost:11434")
    /// * `model` - Model name to use (e.g., "llama3.1:8b")
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            client: Client::new(),
        }
    }

    fn build_request(&self, request: &GenerationRequest) -> OllamaRequest {
        OllamaRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            messages: request
                .messages()
                .into_iter()
                .map(|msg| OllamaMessage {
                    role: msg.role.to_string(),
                    content: msg.content,
                })
                .collect(),
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        }
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = self.build_request(request);

        tracing::debug!(
            model = %body.model,
            messages = body.messages.len(),
            total_chars = body.messages.iter().map(|m| m.content.len()).sum::<usize>(),
            "ollama request"
        );

        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let start = std::time::Instant::now();
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout
                } else if e.is_connect() {
                    LLMError::ProviderUnavailable(format!(
                        "Cannot connect to Ollama at {}. Is Ollama running?",
                        self.base_url
                    ))
                } else {
                    LLMError::NetworkError(e.to_string())
                }
            })?;

        tracing::debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "ollama response received"
        );

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LLMError::ProviderUnavailable(format!(
                "Ollama API error ({}): {}",
                status, error_text
            )));
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(format!("Failed to parse Ollama response: {}", e)))?;

        Ok(ollama_response.message.content.trim().to_string())
    }
}

/// Ollama API request format
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

/// Ollama message format
#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

/// Ollama API response format
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_provider_properties() {
        let provider = OllamaProvider::new("http://localhost:11434", "llama3.1:8b");

        assert_eq!(provider.name(), "ollama");
        assert!(provider.is_local());
    }

    #[test]
    fn test_request_conversion() {
        let provider = OllamaProvider::new("http://localhost:11434", "llama3.1:8b");
        let request = GenerationRequest::new("Hello")
            .with_system("You are a planner")
            .with_sampling(0.5, 64);

        let body = provider.build_request(&request);

        assert_eq!(body.model, "llama3.1:8b");
        assert!(!body.stream);
        assert_eq!(body.messages.len(), 2);
        assert_eq!(body.messages[0].role, "system");
        assert_eq!(body.messages[1].role, "user");
        assert_eq!(body.options.num_predict, 64);
    }

    #[test]
    fn test_model_override() {
        let provider = OllamaProvider::new("http://localhost:11434", "llama3.1:8b");
        let mut request = GenerationRequest::new("Hello");
        request.model = Some("qwen2.5:7b".to_string());

        assert_eq!(provider.build_request(&request).model, "qwen2.5:7b");
    }
}
