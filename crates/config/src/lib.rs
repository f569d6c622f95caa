//! Configuration for the voice back-office server
//!
//! Priority: env vars > config/{env}.yaml > config/default.yaml > defaults.

mod settings;

pub use settings::{
    load_settings, CacheConfig, DatabaseConfig, EmailConfig, LlmSettings, ObjectStoreConfig,
    ObservabilityConfig, ServerConfig, Settings, SpeechConfig,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
