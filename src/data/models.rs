//! Data models
//!
//! Records persisted by the code and application stores.
//! All models use ULID for IDs and chrono for timestamps; JSON layout is
//! camelCase so existing `codes.json` / `applications.json` files load as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Generate a new record ID (ULID, 26 characters)
pub fn new_id() -> String {
    ulid::Ulid::new().to_string()
}

// =============================================================================
// Access codes
// =============================================================================

/// Lifecycle state of an access code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeStatus {
    Active,
    Used,
    Expired,
}

impl CodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeStatus::Active => "active",
            CodeStatus::Used => "used",
            CodeStatus::Expired => "expired",
        }
    }
}

/// How a code came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeSource {
    Batch,
    SelfApply,
    Manual,
}

impl CodeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeSource::Batch => "batch",
            CodeSource::SelfApply => "self_apply",
            CodeSource::Manual => "manual",
        }
    }
}

/// Outbound notification state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    Pending,
    Success,
    Failed,
}

/// An issued access code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessCode {
    pub id: String,
    /// Display value, e.g. "PHIL2024-7QX2MA"
    pub code: String,
    pub status: CodeStatus,
    pub user_id: String,
    pub user_name: String,
    pub created_at: DateTime<Utc>,
    /// Set on first consumption only
    pub used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_uses: u32,
    pub current_uses: u32,
    pub source: CodeSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_status: Option<SendStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_error: Option<String>,
}

impl AccessCode {
    /// Fresh single-use, non-expiring code
    pub fn new(
        code: String,
        user_name: String,
        user_id: String,
        source: CodeSource,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id(),
            code,
            status: CodeStatus::Active,
            user_id,
            user_name,
            created_at: now,
            used_at: None,
            expires_at: None,
            max_uses: 1,
            current_uses: 0,
            source,
            note,
            sent_at: None,
            sent_status: None,
            sent_error: None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.current_uses >= self.max_uses
    }

    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }

    /// Whether the code could still be redeemed (ignoring expiry)
    pub fn is_redeemable(&self) -> bool {
        self.status == CodeStatus::Active && !self.is_exhausted()
    }

    /// Record one use. Returns false and leaves the code untouched when it
    /// is not redeemable.
    pub fn consume(&mut self, at: DateTime<Utc>) -> bool {
        if !self.is_redeemable() {
            return false;
        }

        self.current_uses += 1;
        if self.used_at.is_none() {
            self.used_at = Some(at);
        }
        if self.is_exhausted() {
            self.status = CodeStatus::Used;
        }
        true
    }

    /// Flip to expired. Returns false if it already was.
    pub fn expire(&mut self) -> bool {
        if self.status == CodeStatus::Expired {
            return false;
        }
        self.status = CodeStatus::Expired;
        true
    }
}

// =============================================================================
// Applications (audit log)
// =============================================================================

/// Outcome recorded for one verification or activation event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Rejected,
    Activated,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Activated => "activated",
        }
    }
}

/// Fields the vision model pulled out of the screenshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiVerification {
    pub extracted_name: String,
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_time: Option<String>,
    pub confidence: f64,
    pub verified_at: DateTime<Utc>,
}

/// Append-only audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: String,
    pub user_name: String,
    pub wechat_id: String,
    /// Stored screenshot file name, empty for activation events
    pub screenshot: String,
    pub status: ApplicationStatus,
    pub applied_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_verification: Option<AiVerification>,
}

impl Application {
    /// Build a record stamped at `now`; anything but `pending` counts as reviewed.
    pub fn new(
        user_name: impl Into<String>,
        wechat_id: impl Into<String>,
        screenshot: impl Into<String>,
        status: ApplicationStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id(),
            user_name: user_name.into(),
            wechat_id: wechat_id.into(),
            screenshot: screenshot.into(),
            status,
            applied_at: now,
            reviewed_at: (status != ApplicationStatus::Pending).then_some(now),
            code: None,
            reject_reason: None,
            ai_verification: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_reject_reason(mut self, reason: impl Into<String>) -> Self {
        self.reject_reason = Some(reason.into());
        self
    }

    pub fn with_verification(mut self, verification: AiVerification) -> Self {
        self.ai_verification = Some(verification);
        self
    }

    /// Comment text the record was approved or rejected for
    pub fn comment(&self) -> Option<&str> {
        self.ai_verification.as_ref().map(|v| v.comment.as_str())
    }
}
