//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration files (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub access: AccessConfig,
    pub rate_limit: RateLimitConfig,
    pub upload: UploadConfig,
    pub vision: VisionConfig,
    pub admin: AdminConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 3001)
    pub port: u16,
    /// Public base URL the activation links point at
    /// (e.g., "https://philosopher.example.com")
    pub public_url: String,
    /// Key rate limits on the first `X-Forwarded-For` hop instead of the
    /// peer address. Only enable behind a trusted reverse proxy.
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

impl ServerConfig {
    /// Public base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.public_url.trim_end_matches('/')
    }
}

/// Store backend selector
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// JSON documents under `data_dir`
    #[default]
    Json,
    /// Redis keys `access_codes` / `applications`
    Redis,
}

/// Persistence configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Directory holding codes.json and applications.json
    pub data_dir: PathBuf,
    /// Directory uploaded screenshots are written to
    pub screenshot_dir: PathBuf,
    /// Redis connection URL, required for the redis backend
    pub redis_url: Option<String>,
    /// Maximum pooled Redis connections
    pub redis_max_connections: usize,
}

/// Access-code rules
#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    /// Display prefix of generated codes ("PHIL2024" -> "PHIL2024-XXXXXX")
    pub code_prefix: String,
    /// Minimum comment length, in characters
    pub min_comment_chars: usize,
    /// Maximum accepted comment age, in days
    pub max_comment_age_days: i64,
    /// UTC offset comment timestamps are read in
    pub timezone_offset_hours: i32,
    /// Optional HMAC key for activation tokens.
    ///
    /// When unset, tokens are plain base64url and carry no integrity.
    pub link_secret: Option<String>,
}

/// Self-service rate limiting
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Applications admitted per client per window
    pub apply_max_requests: u32,
    /// Window length in seconds
    pub apply_window_seconds: u64,
    /// Background sweep interval in seconds
    pub sweep_interval_seconds: u64,
    /// Cap on the number of clients tracked in memory
    pub max_tracked_clients: usize,
}

/// Upload limits
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Maximum screenshot size in bytes (default: 10 MiB)
    pub max_screenshot_bytes: usize,
}

/// Vision model settings (OpenAI-compatible chat completions)
#[derive(Debug, Clone, Deserialize)]
pub struct VisionConfig {
    /// API key; screenshot analysis is disabled without one
    pub api_key: Option<String>,
    /// API base URL (e.g., "https://api.openai.com/v1")
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
}

/// Admin console authentication
#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    /// Password accepted by POST /api/admin/login
    pub password: String,
    /// Session secret key (32+ bytes)
    pub session_secret: String,
    /// Session max age in seconds (default: 86400 = 24h)
    pub session_max_age: i64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (PHILOSOPHER__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3001)?
            .set_default("server.public_url", "http://localhost:3000")?
            .set_default("server.trust_forwarded_for", false)?
            .set_default("storage.backend", "json")?
            .set_default("storage.data_dir", "data")?
            .set_default("storage.screenshot_dir", "uploads/screenshots")?
            .set_default("storage.redis_max_connections", 8)?
            .set_default("access.code_prefix", "PHIL2024")?
            .set_default("access.min_comment_chars", 10)?
            .set_default("access.max_comment_age_days", 2)?
            .set_default("access.timezone_offset_hours", 8)?
            .set_default("rate_limit.apply_max_requests", 3)?
            .set_default("rate_limit.apply_window_seconds", 3600)?
            .set_default("rate_limit.sweep_interval_seconds", 3600)?
            .set_default("rate_limit.max_tracked_clients", 10000)?
            .set_default("upload.max_screenshot_bytes", 10 * 1024 * 1024)?
            .set_default("vision.base_url", "https://api.openai.com/v1")?
            .set_default("vision.model", "gpt-4o-mini")?
            .set_default("vision.max_tokens", 500)?
            .set_default("vision.timeout_seconds", 30)?
            .set_default("admin.session_max_age", 86400)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (PHILOSOPHER__*)
            .add_source(
                Environment::with_prefix("PHILOSOPHER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        use crate::error::AppError;

        const MIN_SESSION_SECRET_BYTES: usize = 32;

        if self.admin.session_secret.as_bytes().len() < MIN_SESSION_SECRET_BYTES {
            return Err(AppError::Config(format!(
                "admin.session_secret must be at least {} bytes",
                MIN_SESSION_SECRET_BYTES
            )));
        }

        if self.admin.session_max_age <= 0 {
            return Err(AppError::Config(
                "admin.session_max_age must be greater than 0".to_string(),
            ));
        }

        if self.admin.password.trim().is_empty() {
            return Err(AppError::Config("admin.password must be set".to_string()));
        }

        let prefix = self.access.code_prefix.trim();
        if prefix.is_empty() || prefix.contains(char::is_whitespace) {
            return Err(AppError::Config(
                "access.code_prefix must be a non-empty token".to_string(),
            ));
        }

        if self.access.max_comment_age_days < 0 {
            return Err(AppError::Config(
                "access.max_comment_age_days must not be negative".to_string(),
            ));
        }

        if !(-12..=14).contains(&self.access.timezone_offset_hours) {
            return Err(AppError::Config(
                "access.timezone_offset_hours must be within -12..=14".to_string(),
            ));
        }

        if self.rate_limit.apply_max_requests == 0 || self.rate_limit.apply_window_seconds == 0 {
            return Err(AppError::Config(
                "rate_limit.apply_max_requests and rate_limit.apply_window_seconds must be greater than 0"
                    .to_string(),
            ));
        }

        url::Url::parse(&self.server.public_url).map_err(|e| {
            AppError::Config(format!("server.public_url is not a valid URL: {}", e))
        })?;

        if self.storage.backend == StorageBackend::Redis
            && self
                .storage
                .redis_url
                .as_deref()
                .map(str::trim)
                .is_none_or(str::is_empty)
        {
            return Err(AppError::Config(
                "storage.redis_url is required when storage.backend=redis".to_string(),
            ));
        }

        if self.access.link_secret.is_none() {
            tracing::warn!("access.link_secret is not set; activation tokens are unsigned");
        }

        Ok(())
    }
}
