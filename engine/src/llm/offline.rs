use async_trait::async_trait;

use super::{GenerationRequest, LLMError, LLMProvider, Result};

/// Provider used when no language model is configured.
///
/// Every call fails with `ProviderUnavailable`, which routes the planner to
/// its deterministic offline plan.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineProvider;

#[async_trait]
impl LLMProvider for OfflineProvider {
    fn name(&self) -> &str {
        "offline"
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        Err(LLMError::ProviderUnavailable(
            "no language model configured".to_string(),
        ))
    }

    async fn check_health(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offline_always_unavailable() {
        let provider = OfflineProvider;
        let err = provider
            .generate(&GenerationRequest::new("anything"))
            .await
            .unwrap_err();
        assert!(matches!(err, LLMError::ProviderUnavailable(_)));
        assert!(!provider.check_health().await);
    }
}
