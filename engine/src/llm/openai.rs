//! OpenAI-compatible chat completions provider.
//!
//! The API key is read once from the environment variable named in the
//! config (`OPENAI_API_KEY` by default). A missing key is reported as an
//! authentication failure on each call rather than at construction, so the
//! planner can still run on its offline plan.

use super::{GenerationRequest, LLMError, LLMProvider, Result};
use crate::config::OpenAIConfig;
use async_trait::async_trait;
use serde_json::json;

pub struct OpenAIProvider {
    config: OpenAIConfig,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: OpenAIConfig, api_key: Option<String>) -> Self {
        Self {
            config,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client: reqwest::Client::new(),
        }
    }

    /// Create a provider whose key comes from `config.api_key_env`
    pub fn from_env(config: OpenAIConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env).ok();
        Self::new(config, api_key)
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn is_local(&self) -> bool {
        false
    }

    async fn check_health(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            LLMError::AuthenticationFailed(format!("{} not set", self.config.api_key_env))
        })?;

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let api_messages: Vec<_> = request
            .messages()
            .iter()
            .map(|msg| {
                json!({
                    "role": msg.role.to_string(),
                    "content": msg.content
                })
            })
            .collect();

        let payload = json!({
            "model": request.model.as_deref().unwrap_or(&self.config.model),
            "messages": api_messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout
                } else if e.is_connect() {
                    LLMError::ProviderUnavailable(format!("cannot connect to {}", self.config.base_url))
                } else {
                    LLMError::NetworkError(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                401 | 403 => LLMError::AuthenticationFailed(text),
                429 => LLMError::RateLimitExceeded,
                code if code >= 500 => {
                    LLMError::ProviderUnavailable(format!("OpenAI API error ({}): {}", status, text))
                }
                _ => LLMError::InvalidRequest(text),
            });
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))?;

        let content = data
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .ok_or_else(|| LLMError::ParseError("No message content in response".to_string()))?;

        Ok(content.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_key_is_auth_failure() {
        let provider = OpenAIProvider::new(OpenAIConfig::default(), None);
        assert!(!provider.check_health().await);

        let err = provider
            .generate(&GenerationRequest::new("hi"))
            .await
            .unwrap_err();
        match err {
            LLMError::AuthenticationFailed(msg) => assert!(msg.contains("OPENAI_API_KEY")),
            other => panic!("expected auth failure, got {:?}", other),
        }
    }

    #[test]
    fn test_blank_key_treated_as_missing() {
        let provider = OpenAIProvider::new(OpenAIConfig::default(), Some("  ".to_string()));
        assert!(provider.api_key.is_none());
        assert!(!provider.is_local());
    }
}
