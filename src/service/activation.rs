//! Code verification and redemption
//!
//! One lookup serves two purposes. Activation redeems the code and fails
//! once it is used up; an access check only asks whether the code still
//! gates the features, which a used code does.

use std::sync::Arc;

use super::codes::ActivationLinks;
use crate::clock::Clock;
use crate::data::{
    AccessCode, Application, ApplicationStatus, ApplicationStore, CodeMutation, CodeStatus,
    CodeStore,
};
use crate::error::Result;
use crate::metrics::ACTIVATIONS_TOTAL;

pub const MSG_VERIFIED: &str = "code verified";
pub const MSG_ACTIVATED: &str = "code activated";
pub const MSG_NOT_FOUND: &str = "code does not exist";
pub const MSG_EXPIRED: &str = "code has expired";
pub const MSG_ALREADY_USED: &str = "code has already been used";
pub const MSG_INVALID_LINK: &str = "invalid link";

/// Why a code is being looked up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// Redeem the code
    Activation,
    /// Permission check, never consumes
    Access,
}

/// Result of a verification; soft failures are not errors
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub valid: bool,
    pub message: &'static str,
    pub code: Option<AccessCode>,
}

impl Verification {
    fn valid(code: AccessCode, message: &'static str) -> Self {
        Self {
            valid: true,
            message,
            code: Some(code),
        }
    }

    fn invalid(message: &'static str) -> Self {
        Self {
            valid: false,
            message,
            code: None,
        }
    }
}

/// Verifies codes and activation tokens
pub struct ActivationService {
    codes: Arc<dyn CodeStore>,
    applications: Arc<dyn ApplicationStore>,
    links: ActivationLinks,
    clock: Arc<dyn Clock>,
}

impl ActivationService {
    pub fn new(
        codes: Arc<dyn CodeStore>,
        applications: Arc<dyn ApplicationStore>,
        links: ActivationLinks,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            codes,
            applications,
            links,
            clock,
        }
    }

    pub fn links(&self) -> &ActivationLinks {
        &self.links
    }

    /// Look up `code` without redeeming it.
    ///
    /// A code found past its expiry is flipped to expired on the way.
    pub async fn check(&self, code: &str, purpose: Purpose) -> Result<Verification> {
        let code = code.trim();
        let Some(record) = self.codes.find_by_code(code).await? else {
            return Ok(Verification::invalid(MSG_NOT_FOUND));
        };

        if record.status == CodeStatus::Expired {
            return Ok(Verification::invalid(MSG_EXPIRED));
        }
        if purpose == Purpose::Activation
            && record.status == CodeStatus::Used
            && record.is_exhausted()
        {
            return Ok(Verification::invalid(MSG_ALREADY_USED));
        }
        // Used is terminal: access stays granted and expiry no longer applies.
        if purpose == Purpose::Access && record.status == CodeStatus::Used {
            return Ok(Verification::valid(record, MSG_VERIFIED));
        }
        if record.is_past_expiry(self.clock.now()) {
            self.codes.update(code, CodeMutation::Expire).await?;
            tracing::info!(code, "Access code expired");
            return Ok(Verification::invalid(MSG_EXPIRED));
        }

        Ok(Verification::valid(record, MSG_VERIFIED))
    }

    /// Verify and consume `code`, recording an activation on success
    pub async fn redeem(&self, code: &str) -> Result<Verification> {
        let result = self.redeem_inner(code.trim(), MSG_VERIFIED).await;
        Self::observe(&result);
        result
    }

    /// Decode an activation token and redeem the code inside
    pub async fn redeem_token(&self, token: &str) -> Result<Verification> {
        let result = match self.links.decode_token(token) {
            Some(code) => self.redeem_inner(&code, MSG_ACTIVATED).await,
            None => {
                tracing::debug!("Activation token could not be decoded");
                Ok(Verification::invalid(MSG_INVALID_LINK))
            }
        };
        Self::observe(&result);
        result
    }

    /// Whether `code` grants access; never consumes it
    pub async fn has_access(&self, code: &str) -> Result<Option<AccessCode>> {
        let verification = self.check(code, Purpose::Access).await?;
        Ok(verification.valid.then_some(verification.code).flatten())
    }

    async fn redeem_inner(&self, code: &str, message: &'static str) -> Result<Verification> {
        let checked = self.check(code, Purpose::Activation).await?;
        if !checked.valid {
            return Ok(checked);
        }

        let now = self.clock.now();
        // The check above can race with another redemption; the store
        // only applies the consume while the code is still redeemable.
        let consumed = self.codes.update(code, CodeMutation::Consume { at: now }).await?;
        let Some(mutated) = consumed else {
            return Ok(Verification::invalid(MSG_NOT_FOUND));
        };
        if !mutated.applied {
            return Ok(Verification::invalid(MSG_ALREADY_USED));
        }

        let record = Application::new(
            mutated.code.user_name.clone(),
            mutated.code.user_id.clone(),
            "",
            ApplicationStatus::Activated,
            now,
        )
        .with_code(&mutated.code.code);
        self.applications.append(record).await?;

        tracing::info!(
            code = %mutated.code.code,
            user_name = %mutated.code.user_name,
            uses = mutated.code.current_uses,
            "Access code redeemed"
        );
        Ok(Verification::valid(mutated.code, message))
    }

    fn observe(result: &Result<Verification>) {
        let label = match result {
            Ok(v) if v.valid => "activated",
            Ok(v) => match v.message {
                MSG_NOT_FOUND => "not_found",
                MSG_EXPIRED => "expired",
                MSG_ALREADY_USED => "already_used",
                _ => "invalid_token",
            },
            Err(_) => "error",
        };
        ACTIVATIONS_TOTAL.with_label_values(&[label]).inc();
    }
}
