//! Service layer
//!
//! Contains business logic separated from HTTP handlers.
//! Services orchestrate the stores, the verifier and code issuance.

mod activation;
mod apply;
mod codes;
mod rules;

pub use activation::{
    ActivationService, MSG_ACTIVATED, MSG_ALREADY_USED, MSG_EXPIRED, MSG_INVALID_LINK,
    MSG_NOT_FOUND, MSG_VERIFIED, Purpose, Verification,
};
pub use apply::{ApplyInput, ApplyOutcome, ApplyService};
pub use codes::{ActivationLinks, BatchUser, CodeIssuer, generate_code};
pub use rules::{ApplyRules, Claim, RejectKind, Rejection, Verdict};
