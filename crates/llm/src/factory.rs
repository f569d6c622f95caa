//! LLM factory
//!
//! Builds the primary extraction backend and the optional lower-latency
//! backend the response generator prefers.

use std::sync::Arc;
use std::time::Duration;

use crate::backend::{ChatBackend, LlmConfig, OpenAiCompatBackend};
use crate::LlmError;

/// Provider wiring for one backend.
#[derive(Debug, Clone)]
pub struct LlmProviderConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

impl LlmProviderConfig {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            model: model.into(),
            timeout: Duration::from_secs(8),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.api_key = (!key.is_empty()).then_some(key);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Factory for chat backends.
pub struct LlmFactory;

impl LlmFactory {
    pub fn create(config: &LlmProviderConfig) -> Result<Arc<dyn ChatBackend>, LlmError> {
        let backend = OpenAiCompatBackend::new(LlmConfig {
            model: config.model.clone(),
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            timeout: config.timeout,
            ..LlmConfig::default()
        })?;
        Ok(Arc::new(backend))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_api_key_is_none() {
        let config = LlmProviderConfig::new("http://localhost:11434/v1", "m").with_api_key("");
        assert!(config.api_key.is_none());
    }

    #[test]
    fn factory_builds_backend() {
        let config = LlmProviderConfig::new("http://localhost:11434/v1", "test-model");
        let backend = LlmFactory::create(&config).unwrap();
        assert_eq!(backend.model_name(), "test-model");
    }
}
