//! Chat-completion integration
//!
//! Features:
//! - OpenAI-compatible backend (works against Ollama's /v1 surface too)
//! - Streaming token generation over SSE
//! - Retry with exponential backoff for transient failures
//! - A factory wiring the primary and the optional low-latency provider

pub mod backend;
pub mod factory;

pub use backend::{
    ChatBackend, ChatMessage, Completion, FinishReason, LlmConfig, OpenAiCompatBackend, Role,
};
pub use factory::{LlmFactory, LlmProviderConfig};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}
