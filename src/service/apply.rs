//! Self-service code applications
//!
//! Runs the anti-abuse rules, issues or re-issues a code and records
//! exactly one application per attempt.

use std::sync::Arc;

use tokio::sync::Mutex;

use super::codes::CodeIssuer;
use super::rules::{ApplyRules, Claim, Rejection, Verdict};
use crate::clock::Clock;
use crate::data::{
    AccessCode, AiVerification, Application, ApplicationStatus, ApplicationStore, CodeSource,
};
use crate::error::Result;
use crate::metrics::APPLICATIONS_TOTAL;

const SELF_APPLY_NOTE: &str = "self-service";

/// One application attempt
#[derive(Debug, Clone)]
pub struct ApplyInput {
    pub claim: Claim,
    /// Stored screenshot file name
    pub screenshot: String,
    /// Confidence reported by the analysis step, if the client forwarded it
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Issued(AccessCode),
    /// The applicant's earlier, still unredeemed code
    Reissued(AccessCode),
    Rejected(Rejection),
}

impl ApplyOutcome {
    fn label(&self) -> &'static str {
        match self {
            ApplyOutcome::Issued(_) => "issued",
            ApplyOutcome::Reissued(_) => "reissued",
            ApplyOutcome::Rejected(rejection) => rejection.kind.as_str(),
        }
    }
}

/// Application pipeline service
pub struct ApplyService {
    rules: ApplyRules,
    issuer: Arc<CodeIssuer>,
    applications: Arc<dyn ApplicationStore>,
    clock: Arc<dyn Clock>,
    /// Serializes rule evaluation and issuance within this process
    gate: Mutex<()>,
}

impl ApplyService {
    pub fn new(
        rules: ApplyRules,
        issuer: Arc<CodeIssuer>,
        applications: Arc<dyn ApplicationStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rules,
            issuer,
            applications,
            clock,
            gate: Mutex::new(()),
        }
    }

    /// Evaluate an application and record its outcome
    pub async fn apply(&self, input: ApplyInput) -> Result<ApplyOutcome> {
        let _guard = self.gate.lock().await;

        let claim = &input.claim;
        let outcome = match self.rules.evaluate(claim).await? {
            Verdict::Reject(rejection) => {
                tracing::info!(
                    user_name = %claim.user_name,
                    reason = %rejection.reason,
                    "Application rejected"
                );
                let record = self
                    .record(&input, ApplicationStatus::Rejected)
                    .with_reject_reason(&rejection.reason);
                self.applications.append(record).await?;
                ApplyOutcome::Rejected(rejection)
            }
            Verdict::Reissue(code) => {
                tracing::info!(
                    user_name = %claim.user_name,
                    code = %code.code,
                    "Re-issuing unredeemed code"
                );
                let record = self
                    .record(&input, ApplicationStatus::Approved)
                    .with_code(&code.code);
                self.applications.append(record).await?;
                ApplyOutcome::Reissued(code)
            }
            Verdict::Issue => {
                let code = self
                    .issuer
                    .issue(
                        &claim.user_name,
                        &claim.user_name,
                        CodeSource::SelfApply,
                        Some(SELF_APPLY_NOTE.to_string()),
                    )
                    .await?;
                let record = self
                    .record(&input, ApplicationStatus::Approved)
                    .with_code(&code.code);
                self.applications.append(record).await?;
                ApplyOutcome::Issued(code)
            }
        };

        APPLICATIONS_TOTAL
            .with_label_values(&[outcome.label()])
            .inc();
        Ok(outcome)
    }

    fn record(&self, input: &ApplyInput, status: ApplicationStatus) -> Application {
        let now = self.clock.now();
        let claim = &input.claim;
        Application::new(
            claim.user_name.clone(),
            claim.user_name.clone(),
            input.screenshot.clone(),
            status,
            now,
        )
        .with_verification(AiVerification {
            extracted_name: claim.extracted_name.clone(),
            comment: claim.comment.clone(),
            comment_time: claim.comment_time.clone(),
            confidence: input.confidence.unwrap_or(1.0),
            verified_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::data::{ApplicationQuery, CodeQuery, CodeStore, JsonFileStore};
    use crate::service::rules::RejectKind;
    use crate::verify::CommentTimeValidator;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    const COMMENT: &str = "this app is great, really insightful!!";

    async fn service(dir: &TempDir) -> (Arc<JsonFileStore>, Arc<ApplyService>) {
        let store = Arc::new(JsonFileStore::open(dir.path()).await.unwrap());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 18, 4, 0, 0).unwrap(),
        ));
        let validator = CommentTimeValidator::new(8, clock.clone()).unwrap();
        let rules = ApplyRules::new(store.clone(), store.clone(), validator, clock.clone(), 10, 2);
        let issuer = Arc::new(CodeIssuer::new(store.clone(), clock.clone(), "PHIL2024"));
        let service = ApplyService::new(rules, issuer, store.clone(), clock);
        (store, Arc::new(service))
    }

    fn input(user: &str, extracted: &str, comment: &str) -> ApplyInput {
        ApplyInput {
            claim: Claim {
                user_name: user.to_string(),
                extracted_name: extracted.to_string(),
                comment: comment.to_string(),
                comment_time: Some("今天 10:00".to_string()),
            },
            screenshot: "screenshot_1-abc.png".to_string(),
            confidence: Some(0.9),
        }
    }

    #[tokio::test]
    async fn repeat_application_returns_same_code() {
        let dir = TempDir::new().unwrap();
        let (store, service) = service(&dir).await;

        let first = match service.apply(input("zhang", "zhangsan", COMMENT)).await.unwrap() {
            ApplyOutcome::Issued(code) => code,
            other => panic!("expected issue, got {:?}", other),
        };
        let second = match service.apply(input("zhang", "zhangsan", COMMENT)).await.unwrap() {
            ApplyOutcome::Reissued(code) => code,
            other => panic!("expected reissue, got {:?}", other),
        };
        assert_eq!(first.code, second.code);

        let codes = CodeStore::list(store.as_ref(), &CodeQuery::default()).await.unwrap();
        assert_eq!(codes.total, 1);
        assert_eq!(codes.items[0].note.as_deref(), Some(SELF_APPLY_NOTE));

        let approved = ApplicationStore::list(
            store.as_ref(),
            &ApplicationQuery {
                status: Some(ApplicationStatus::Approved),
                ..ApplicationQuery::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(approved.total, 2);
        assert!(approved.items.iter().all(|a| a.code.as_deref() == Some(first.code.as_str())));
        let verification = approved.items[0].ai_verification.as_ref().unwrap();
        assert_eq!(verification.confidence, 0.9);
        assert_eq!(verification.extracted_name, "zhangsan");
    }

    #[tokio::test]
    async fn rejection_is_recorded_with_reason() {
        let dir = TempDir::new().unwrap();
        let (store, service) = service(&dir).await;

        let outcome = service.apply(input("zhang", "zhang", "hi")).await.unwrap();
        assert!(matches!(
            &outcome,
            ApplyOutcome::Rejected(r) if r.kind == RejectKind::CommentTooShort
        ));

        let log = ApplicationStore::list(store.as_ref(), &ApplicationQuery::default())
            .await
            .unwrap();
        assert_eq!(log.total, 1);
        assert_eq!(log.items[0].status, ApplicationStatus::Rejected);
        assert_eq!(
            log.items[0].reject_reason.as_deref(),
            Some("comment content under 10 characters")
        );
        assert!(log.items[0].code.is_none());
    }

    #[tokio::test]
    async fn concurrent_identical_applications_mint_one_code() {
        let dir = TempDir::new().unwrap();
        let (store, service) = service(&dir).await;

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.apply(input("zhang", "zhang", COMMENT)).await })
            })
            .collect();

        let mut issued = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                ApplyOutcome::Issued(_) => issued += 1,
                ApplyOutcome::Reissued(_) => {}
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        assert_eq!(issued, 1);

        let codes = CodeStore::list(store.as_ref(), &CodeQuery::default()).await.unwrap();
        assert_eq!(codes.total, 1);
    }
}
