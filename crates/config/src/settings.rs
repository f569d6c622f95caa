//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Main application settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub speech: SpeechConfig,

    #[serde(default)]
    pub llm: LlmSettings,

    #[serde(default)]
    pub email: EmailConfig,

    #[serde(default)]
    pub object_store: ObjectStoreConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// IANA timezone used for natural-language time parsing.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    std::env::var("SHOP_TIMEZONE").unwrap_or_else(|_| "Asia/Kolkata".to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum concurrent sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Idle-session expiry.
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
    /// Sweep interval for the idle-session cleanup task.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
    /// Bounded wait for active sessions on shutdown.
    #[serde(default = "default_drain")]
    pub drain_secs: u64,
}

fn default_port() -> u16 {
    std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_max_sessions() -> usize {
    200
}

fn default_session_timeout() -> u64 {
    3600
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_drain() -> u64 {
    20
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            max_sessions: default_max_sessions(),
            session_timeout_secs: default_session_timeout(),
            cleanup_interval_secs: default_cleanup_interval(),
            drain_secs: default_drain(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Disable to run against the in-memory data services (development).
    #[serde(default = "default_db_enabled")]
    pub enabled: bool,
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub max_connections: u32,
}

fn default_db_enabled() -> bool {
    std::env::var("DATABASE_URL").is_ok()
}

fn default_database_url() -> String {
    std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost:5432/dukaan".to_string())
}

fn default_pool_size() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: default_db_enabled(),
            url: default_database_url(),
            max_connections: default_pool_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// In-process tier.
    #[serde(default = "default_local_capacity")]
    pub local_capacity: usize,
    #[serde(default = "default_local_ttl")]
    pub local_ttl_secs: u64,
    /// Cross-process tier.
    #[serde(default = "default_remote_ttl")]
    pub remote_ttl_secs: u64,
}

fn default_cache_enabled() -> bool {
    std::env::var("REDIS_URL").is_ok()
}

fn default_redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn default_local_capacity() -> usize {
    100
}

fn default_local_ttl() -> u64 {
    300
}

fn default_remote_ttl() -> u64 {
    1800
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            redis_url: default_redis_url(),
            local_capacity: default_local_capacity(),
            local_ttl_secs: default_local_ttl(),
            remote_ttl_secs: default_remote_ttl(),
        }
    }
}

/// STT/TTS provider selection and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// "container" (compressed blocks, provider A) or "pcm" (raw 16 kHz
    /// mono, provider B).
    #[serde(default = "default_stt_provider")]
    pub stt_provider: String,
    #[serde(default)]
    pub stt_endpoint: String,
    #[serde(default = "default_stt_key")]
    pub stt_api_key: String,
    #[serde(default = "default_tts_provider")]
    pub tts_provider: String,
    #[serde(default)]
    pub tts_endpoint: String,
    #[serde(default = "default_tts_key")]
    pub tts_api_key: String,
}

fn default_stt_provider() -> String {
    std::env::var("STT_PROVIDER").unwrap_or_else(|_| "container".to_string())
}

fn default_stt_key() -> String {
    std::env::var("STT_API_KEY").unwrap_or_default()
}

fn default_tts_provider() -> String {
    std::env::var("TTS_PROVIDER").unwrap_or_else(|_| "http".to_string())
}

fn default_tts_key() -> String {
    std::env::var("TTS_API_KEY").unwrap_or_default()
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            stt_provider: default_stt_provider(),
            stt_endpoint: String::new(),
            stt_api_key: default_stt_key(),
            tts_provider: default_tts_provider(),
            tts_endpoint: String::new(),
            tts_api_key: default_tts_key(),
        }
    }
}

/// Chat-completion providers. `realtime_*` is the optional lower-latency
/// provider used by the response generator; it falls back to the primary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_llm_key")]
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub realtime_endpoint: Option<String>,
    #[serde(default)]
    pub realtime_model: Option<String>,
    #[serde(default = "default_llm_timeout")]
    pub timeout_ms: u64,
}

fn default_llm_endpoint() -> String {
    std::env::var("LLM_ENDPOINT").unwrap_or_else(|_| "http://localhost:11434/v1".to_string())
}

fn default_llm_key() -> String {
    std::env::var("LLM_API_KEY").unwrap_or_default()
}

fn default_llm_model() -> String {
    std::env::var("LLM_MODEL").unwrap_or_else(|_| "qwen3:4b-instruct-2507-q4_K_M".to_string())
}

fn default_llm_timeout() -> u64 {
    8000
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key: default_llm_key(),
            model: default_llm_model(),
            realtime_endpoint: None,
            realtime_model: None,
            timeout_ms: default_llm_timeout(),
        }
    }
}

/// SMTP sender used for deletion OTPs and the reminder e-mail channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_email_from")]
    pub from: String,
    /// Destination for deletion OTPs.
    #[serde(default = "default_admin_email")]
    pub admin_email: String,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_email_from() -> String {
    std::env::var("EMAIL_FROM").unwrap_or_else(|_| "noreply@dukaan.local".to_string())
}

fn default_admin_email() -> String {
    std::env::var("ADMIN_EMAIL").unwrap_or_default()
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: std::env::var("SMTP_HOST").unwrap_or_default(),
            smtp_port: default_smtp_port(),
            username: std::env::var("SMTP_USERNAME").unwrap_or_default(),
            password: std::env::var("SMTP_PASSWORD").unwrap_or_default(),
            from: default_email_from(),
            admin_email: default_admin_email(),
        }
    }
}

/// Blob-store credentials for call recordings (upload itself is an external
/// collaborator behind a trait).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ObjectStoreConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub bucket: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings that would otherwise fail deep inside a session.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(ConfigError::InvalidValue {
                field: "timezone".to_string(),
                message: format!("unknown IANA timezone '{}'", self.timezone),
            });
        }

        if self.server.max_sessions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.max_sessions".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.llm.timeout_ms < 500 {
            return Err(ConfigError::InvalidValue {
                field: "llm.timeout_ms".to_string(),
                message: "timeout below 500ms starves every extraction".to_string(),
            });
        }

        Ok(())
    }

    /// Parsed timezone. Falls back to Asia/Kolkata when unset; `validate`
    /// already rejected anything unparsable at startup.
    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone
            .parse()
            .unwrap_or(chrono_tz::Asia::Kolkata)
    }
}

/// Load settings from files and environment.
///
/// Priority: env vars > config/{env}.yaml > config/default.yaml > defaults.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder().add_source(File::with_name("config/default").required(false));

    if let Some(env) = env {
        builder = builder.add_source(File::with_name(&format!("config/{env}")).required(false));
    }

    let config = builder
        .add_source(Environment::with_prefix("DUKAAN").separator("__"))
        .build()?;

    let settings: Settings = config.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.tz(), chrono_tz::Asia::Kolkata);
    }

    #[test]
    fn bad_timezone_rejected() {
        let settings = Settings {
            timezone: "Mars/Olympus_Mons".to_string(),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }
}
