//! Admin session tokens
//!
//! Uses HMAC-signed bearer tokens.
//! No server-side session storage needed.

use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

const ADMIN_SUBJECT: &str = "admin";

/// Admin session data carried inside the token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminSession {
    pub subject: String,
    /// When session was created
    pub created_at: DateTime<Utc>,
    /// When session expires
    pub expires_at: DateTime<Utc>,
}

impl AdminSession {
    pub fn new(now: DateTime<Utc>, max_age_seconds: i64) -> Self {
        Self {
            subject: ADMIN_SUBJECT.to_string(),
            created_at: now,
            expires_at: now + Duration::seconds(max_age_seconds),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Compare a submitted password with the configured one.
///
/// Both sides are hashed first so the comparison time does not depend on
/// where the inputs differ.
pub fn password_matches(submitted: &str, expected: &str) -> bool {
    Sha256::digest(submitted.as_bytes()) == Sha256::digest(expected.as_bytes())
}

fn mac(secret: &str) -> Result<HmacSha256, AppError> {
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| AppError::Encryption(e.to_string()))
}

/// Create a signed session token
///
/// Token format: base64(payload).base64(hmac_sha256(payload))
pub fn create_session_token(session: &AdminSession, secret: &str) -> Result<String, AppError> {
    let payload = serde_json::to_vec(session)?;
    let payload_b64 = general_purpose::URL_SAFE_NO_PAD.encode(payload);

    let mut mac = mac(secret)?;
    mac.update(payload_b64.as_bytes());
    let signature_b64 = general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{}.{}", payload_b64, signature_b64))
}

/// Verify and decode a session token
///
/// # Errors
/// `Unauthorized` if the signature is invalid, the token is malformed or
/// the session expired before `now`
pub fn verify_session_token(
    token: &str,
    secret: &str,
    now: DateTime<Utc>,
) -> Result<AdminSession, AppError> {
    let (payload_b64, signature_b64) = token.split_once('.').ok_or(AppError::Unauthorized)?;

    let signature = general_purpose::URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AppError::Unauthorized)?;
    let mut mac = mac(secret)?;
    mac.update(payload_b64.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| AppError::Unauthorized)?;

    let payload = general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AppError::Unauthorized)?;
    let session: AdminSession =
        serde_json::from_slice(&payload).map_err(|_| AppError::Unauthorized)?;

    if session.subject != ADMIN_SUBJECT || session.is_expired_at(now) {
        return Err(AppError::Unauthorized);
    }

    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 4, 0, 0).unwrap()
    }

    #[test]
    fn token_round_trips_until_expiry() {
        let session = AdminSession::new(now(), 3600);
        let token = create_session_token(&session, SECRET).unwrap();

        assert_eq!(verify_session_token(&token, SECRET, now()).unwrap(), session);
        assert!(matches!(
            verify_session_token(&token, SECRET, now() + Duration::seconds(3601)),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn wrong_secret_and_tampering_fail() {
        let token = create_session_token(&AdminSession::new(now(), 3600), SECRET).unwrap();
        assert!(verify_session_token(&token, "another-secret-another-secret!!!", now()).is_err());

        let (_, signature) = token.split_once('.').unwrap();
        let forged = general_purpose::URL_SAFE_NO_PAD.encode(
            br#"{"subject":"admin","created_at":"2026-10-18T04:00:00Z","expires_at":"2099-01-01T00:00:00Z"}"#,
        );
        assert!(verify_session_token(&format!("{}.{}", forged, signature), SECRET, now()).is_err());
        assert!(verify_session_token("no-dot", SECRET, now()).is_err());
    }

    #[test]
    fn password_comparison() {
        assert!(password_matches("hunter2", "hunter2"));
        assert!(!password_matches("hunter3", "hunter2"));
        assert!(!password_matches("", "hunter2"));
    }
}
