//! Code issuance and activation links

use std::collections::HashSet;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose};
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::clock::Clock;
use crate::data::{AccessCode, CodeSource, CodeStore};
use crate::error::{AppError, Result};
use crate::metrics::CODES_ISSUED_TOTAL;

type HmacSha256 = Hmac<Sha256>;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_SUFFIX_LEN: usize = 6;
const MAX_GENERATION_ATTEMPTS: usize = 5;

/// `PREFIX-XXXXXX` with the suffix drawn from `[A-Z0-9]`
pub fn generate_code(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..CODE_SUFFIX_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}", prefix, suffix)
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenEnvelope {
    code: String,
}

/// Builds and reads `{base}/?token=...` activation links.
///
/// Without a secret the token is base64url(`{"code": ...}`), which is an
/// encoding, not a credential. With a secret it becomes
/// `payload.base64url(hmac_sha256(payload))` and unsigned tokens are refused.
#[derive(Debug, Clone)]
pub struct ActivationLinks {
    base_url: String,
    secret: Option<String>,
}

impl ActivationLinks {
    pub fn new(base_url: &str, secret: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    pub fn link(&self, code: &str) -> Result<String> {
        Ok(format!("{}/?token={}", self.base_url, self.encode_token(code)?))
    }

    pub fn encode_token(&self, code: &str) -> Result<String> {
        let envelope = serde_json::to_vec(&TokenEnvelope {
            code: code.to_string(),
        })?;
        let payload = general_purpose::URL_SAFE_NO_PAD.encode(envelope);

        match &self.secret {
            None => Ok(payload),
            Some(secret) => {
                let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                    .map_err(|e| AppError::Encryption(e.to_string()))?;
                mac.update(payload.as_bytes());
                let signature = general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
                Ok(format!("{}.{}", payload, signature))
            }
        }
    }

    /// The code inside `token`, or `None` for anything malformed or forged
    pub fn decode_token(&self, token: &str) -> Option<String> {
        let token = token.trim();
        let payload = match &self.secret {
            None => token,
            Some(secret) => {
                let (payload, signature) = token.split_once('.')?;
                let signature = general_purpose::URL_SAFE_NO_PAD.decode(signature).ok()?;
                let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
                mac.update(payload.as_bytes());
                mac.verify_slice(&signature).ok()?;
                payload
            }
        };

        let bytes = general_purpose::URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .ok()?;
        let envelope: TokenEnvelope = serde_json::from_slice(&bytes).ok()?;
        let code = envelope.code.trim();
        (!code.is_empty()).then(|| code.to_string())
    }
}

/// Requested owner of a batch code
#[derive(Debug, Clone)]
pub struct BatchUser {
    pub user_name: String,
    pub user_id: String,
}

/// Mints codes and writes them to the code store
pub struct CodeIssuer {
    codes: Arc<dyn CodeStore>,
    clock: Arc<dyn Clock>,
    prefix: String,
}

impl CodeIssuer {
    pub fn new(codes: Arc<dyn CodeStore>, clock: Arc<dyn Clock>, prefix: &str) -> Self {
        Self {
            codes,
            clock,
            prefix: prefix.trim().to_string(),
        }
    }

    /// Create and persist one new active code
    pub async fn issue(
        &self,
        user_name: &str,
        user_id: &str,
        source: CodeSource,
        note: Option<String>,
    ) -> Result<AccessCode> {
        let value = self.unused_code(&HashSet::new()).await?;
        let code = AccessCode::new(
            value,
            user_name.to_string(),
            user_id.to_string(),
            source,
            note,
            self.clock.now(),
        );
        self.codes.insert(code.clone()).await?;

        CODES_ISSUED_TOTAL
            .with_label_values(&[source.as_str()])
            .inc();
        tracing::info!(code = %code.code, user_name, source = source.as_str(), "Access code issued");
        Ok(code)
    }

    /// Create codes for several users in a single store write
    pub async fn issue_batch(
        &self,
        users: &[BatchUser],
        note: Option<String>,
    ) -> Result<Vec<AccessCode>> {
        let now = self.clock.now();
        let mut taken = HashSet::new();
        let mut minted = Vec::with_capacity(users.len());

        for user in users {
            let value = self.unused_code(&taken).await?;
            taken.insert(value.clone());
            minted.push(AccessCode::new(
                value,
                user.user_name.clone(),
                user.user_id.clone(),
                CodeSource::Batch,
                note.clone(),
                now,
            ));
        }

        self.codes.insert_many(minted.clone()).await?;

        CODES_ISSUED_TOTAL
            .with_label_values(&[CodeSource::Batch.as_str()])
            .inc_by(minted.len() as u64);
        tracing::info!(count = minted.len(), "Batch access codes issued");
        Ok(minted)
    }

    /// A fresh code value not present in the store nor in `taken`
    async fn unused_code(&self, taken: &HashSet<String>) -> Result<String> {
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let candidate = generate_code(&self.prefix);
            if taken.contains(&candidate) {
                continue;
            }
            if self.codes.find_by_code(&candidate).await?.is_none() {
                return Ok(candidate);
            }
            tracing::warn!(code = %candidate, "Generated code collided, retrying");
        }

        Err(AppError::Internal(anyhow::anyhow!(
            "could not generate an unused access code after {} attempts",
            MAX_GENERATION_ATTEMPTS
        )))
    }
}
