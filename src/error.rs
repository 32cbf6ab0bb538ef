//! Error types for the access gate
//!
//! Infrastructure and input failures are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.
//! Business-rule rejections are not errors; see `service::rules`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Application-wide error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Authentication required (401)
    #[error("Authentication required")]
    Unauthorized,

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Rate limit exceeded (429)
    #[error("{0}")]
    RateLimited(String),

    /// Vision API not configured (503)
    #[error("Screenshot analysis is not available")]
    VisionUnavailable,

    /// Vision API call failed or answered with something unusable (500)
    #[error("Vision error: {0}")]
    Vision(String),

    /// Store failure (500)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Filesystem error (500)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Redis command error (500)
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// JSON (de)serialization error (500)
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error (502)
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Signing error (500)
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for AppError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        AppError::Storage(format!("redis pool: {}", err))
    }
}

impl AppError {
    /// Short machine-readable label, also used as the metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::Validation(_) => "validation",
            AppError::RateLimited(_) => "rate_limited",
            AppError::VisionUnavailable => "vision_unavailable",
            AppError::Vision(_) => "vision",
            AppError::Storage(_) => "storage",
            AppError::Io(_) => "io",
            AppError::Redis(_) => "redis",
            AppError::Serialization(_) => "serialization",
            AppError::HttpClient(_) => "http_client",
            AppError::Config(_) => "config",
            AppError::Encryption(_) => "encryption",
            AppError::Internal(_) => "internal",
        }
    }

    /// HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::VisionUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,
            AppError::Vision(_)
            | AppError::Storage(_)
            | AppError::Io(_)
            | AppError::Redis(_)
            | AppError::Serialization(_)
            | AppError::Config(_)
            | AppError::Encryption(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to end users.
    ///
    /// Infrastructure failures collapse to a generic text; the detail
    /// is logged instead.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Validation(msg) | AppError::RateLimited(msg) => msg.clone(),
            AppError::Vision(msg) => format!("AI analysis failed: {}", msg),
            AppError::NotFound | AppError::Unauthorized | AppError::VisionUnavailable => {
                self.to_string()
            }
            _ => "Server error, please try again later".to_string(),
        }
    }

    /// Log server-side failures and count the error.
    ///
    /// Called for every error that reaches a client, including handlers
    /// that render their own body instead of going through `into_response`.
    pub fn record(&self) {
        let error_type = self.kind();
        if self.status_code().is_server_error() {
            tracing::error!(error = %self, error_type, "Request failed");
        }

        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL.with_label_values(&[error_type]).inc();
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Maps each error variant to appropriate HTTP status code
    /// and JSON error body.
    fn into_response(self) -> Response {
        use axum::Json;

        let status = self.status_code();
        let error_type = self.kind();
        let message = self.public_message();
        self.record();

        let error_label = match &self {
            AppError::RateLimited(_) => "Too Many Requests",
            _ => error_type,
        };

        let body = Json(serde_json::json!({
            "success": false,
            "error": error_label,
            "message": message,
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
