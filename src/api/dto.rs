//! API request and response DTOs
//!
//! JSON bodies are camelCase, matching the web client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::{AccessCode, Application, CodeStats};

// =============================================================================
// Access
// =============================================================================

/// POST /api/apply-code response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    /// Machine-readable rejection kind
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

/// POST /api/analyze-screenshot response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub success: bool,
    pub extracted_name: Option<String>,
    pub comment: Option<String>,
    pub comment_time: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifyCodeRequest {
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifyTokenRequest {
    #[serde(default)]
    pub token: Option<String>,
}

/// Owner details returned after a successful verification
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedCode {
    pub user_name: String,
    pub user_id: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<&AccessCode> for VerifiedCode {
    fn from(code: &AccessCode) -> Self {
        Self {
            user_name: code.user_name.clone(),
            user_id: code.user_id.clone(),
            expires_at: code.expires_at,
        }
    }
}

/// POST /api/verify-code and /api/verify-token response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<VerifiedCode>,
}

impl VerifyResponse {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            code: None,
            message: message.into(),
            data: None,
        }
    }
}

/// GET /api/check-access response
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckAccessResponse {
    pub has_access: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Admin
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub stats: CodeStats,
    pub recent_applications: Vec<Application>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CodeListResponse {
    pub codes: Vec<AccessCode>,
    pub total: usize,
    pub page: usize,
    pub pages: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplicationListResponse {
    pub applications: Vec<Application>,
    pub total: usize,
    pub page: usize,
    pub pages: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUserRequest {
    pub user_name: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub users: Vec<BatchUserRequest>,
    #[serde(default)]
    pub note: Option<String>,
}

/// One code created by a batch request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCode {
    pub id: String,
    pub user_name: String,
    pub user_id: String,
    pub code: String,
    pub link: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResponse {
    pub success: bool,
    pub count: usize,
    pub codes: Vec<IssuedCode>,
}
