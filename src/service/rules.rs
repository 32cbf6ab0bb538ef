//! Anti-abuse rules for self-service applications
//!
//! Checks run in a fixed order and stop at the first failure:
//! comment recency, comment theft, comment reuse (or re-issue),
//! comment length, then name match.

use std::sync::Arc;

use axum::http::StatusCode;

use crate::clock::Clock;
use crate::data::{AccessCode, ApplicationStore, CodeStore};
use crate::error::Result;
use crate::verify::{CommentTimeValidator, Recency, names_match};

/// What the applicant claims, with fields read off the screenshot
#[derive(Debug, Clone)]
pub struct Claim {
    pub user_name: String,
    pub extracted_name: String,
    pub comment: String,
    pub comment_time: Option<String>,
}

/// Which check turned an application down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectKind {
    StaleComment,
    FutureComment,
    CommentTaken,
    CommentReused,
    CommentTooShort,
    NameMismatch,
}

impl RejectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectKind::StaleComment => "stale_comment",
            RejectKind::FutureComment => "future_comment",
            RejectKind::CommentTaken => "comment_taken",
            RejectKind::CommentReused => "comment_reused",
            RejectKind::CommentTooShort => "comment_too_short",
            RejectKind::NameMismatch => "name_mismatch",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RejectKind::CommentTaken | RejectKind::CommentReused => StatusCode::CONFLICT,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// A business-rule rejection with its user-facing reason
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub kind: RejectKind,
    pub reason: String,
}

impl Rejection {
    fn new(kind: RejectKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }
}

/// Result of running the rules
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// All checks passed; mint a new code
    Issue,
    /// Same user and comment already hold an unredeemed code
    Reissue(AccessCode),
    Reject(Rejection),
}

/// Ordered anti-abuse checks against the application log
pub struct ApplyRules {
    codes: Arc<dyn CodeStore>,
    applications: Arc<dyn ApplicationStore>,
    time_validator: CommentTimeValidator,
    clock: Arc<dyn Clock>,
    min_comment_chars: usize,
    max_comment_age_days: i64,
}

impl ApplyRules {
    pub fn new(
        codes: Arc<dyn CodeStore>,
        applications: Arc<dyn ApplicationStore>,
        time_validator: CommentTimeValidator,
        clock: Arc<dyn Clock>,
        min_comment_chars: usize,
        max_comment_age_days: i64,
    ) -> Self {
        Self {
            codes,
            applications,
            time_validator,
            clock,
            min_comment_chars,
            max_comment_age_days,
        }
    }

    pub async fn evaluate(&self, claim: &Claim) -> Result<Verdict> {
        if let Some(rejection) = self.check_recency(claim.comment_time.as_deref()) {
            return Ok(Verdict::Reject(rejection));
        }

        if let Some(other) = self
            .applications
            .find_approved_by_comment_elsewhere(&claim.user_name, &claim.comment)
            .await?
        {
            tracing::warn!(
                user_name = %claim.user_name,
                owner = %other.user_name,
                "Comment already approved for another user"
            );
            return Ok(Verdict::Reject(Rejection::new(
                RejectKind::CommentTaken,
                "comment used by another user",
            )));
        }

        if let Some(previous) = self
            .applications
            .find_approved_by_comment(&claim.user_name, &claim.comment)
            .await?
        {
            if let Some(code) = self.redeemable_code(previous.code.as_deref()).await? {
                return Ok(Verdict::Reissue(code));
            }
            return Ok(Verdict::Reject(Rejection::new(
                RejectKind::CommentReused,
                "comment already used, please use a new comment",
            )));
        }

        if claim.comment.chars().count() < self.min_comment_chars {
            return Ok(Verdict::Reject(Rejection::new(
                RejectKind::CommentTooShort,
                format!("comment content under {} characters", self.min_comment_chars),
            )));
        }

        if !names_match(&claim.user_name, &claim.extracted_name) {
            return Ok(Verdict::Reject(Rejection::new(
                RejectKind::NameMismatch,
                format!(
                    "name mismatch: entered user name ({}) does not match the name in the screenshot ({})",
                    claim.user_name, claim.extracted_name
                ),
            )));
        }

        Ok(Verdict::Issue)
    }

    fn check_recency(&self, comment_time: Option<&str>) -> Option<Rejection> {
        let expression = comment_time.map(str::trim).filter(|t| !t.is_empty())?;

        match self.time_validator.check(expression, self.max_comment_age_days) {
            Recency::Unknown => {
                tracing::debug!(
                    comment_time = expression,
                    "Comment time not understood, skipping recency"
                );
                None
            }
            Recency::Recent(_) => None,
            Recency::Stale { age, .. } => Some(Rejection::new(
                RejectKind::StaleComment,
                format!(
                    "comment was posted {}, only comments from the last {} days are accepted",
                    age, self.max_comment_age_days
                ),
            )),
            Recency::Future(at) => Some(Rejection::new(
                RejectKind::FutureComment,
                format!(
                    "comment time {} is in the future",
                    at.format("%Y-%m-%d %H:%M")
                ),
            )),
        }
    }

    /// The previously issued code, if it can still be redeemed
    async fn redeemable_code(&self, code: Option<&str>) -> Result<Option<AccessCode>> {
        let Some(code) = code else {
            return Ok(None);
        };
        let now = self.clock.now();
        Ok(self
            .codes
            .find_by_code(code)
            .await?
            .filter(|c| c.is_redeemable() && !c.is_past_expiry(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::data::{
        AiVerification, Application, ApplicationStatus, CodeMutation, CodeSource, JsonFileStore,
    };
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    const COMMENT: &str = "this app is great, really insightful!!";

    struct Fixture {
        _dir: TempDir,
        store: Arc<JsonFileStore>,
        rules: ApplyRules,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JsonFileStore::open(dir.path()).await.unwrap());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 18, 4, 0, 0).unwrap(),
        ));
        let validator = CommentTimeValidator::new(8, clock.clone()).unwrap();
        let rules = ApplyRules::new(store.clone(), store.clone(), validator, clock, 10, 2);
        Fixture {
            _dir: dir,
            store,
            rules,
        }
    }

    fn claim(user: &str, extracted: &str, comment: &str, time: Option<&str>) -> Claim {
        Claim {
            user_name: user.to_string(),
            extracted_name: extracted.to_string(),
            comment: comment.to_string(),
            comment_time: time.map(str::to_string),
        }
    }

    async fn approve(store: &JsonFileStore, user: &str, comment: &str) -> AccessCode {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 3, 0, 0).unwrap();
        let code = AccessCode::new(
            "PHIL2024-AAAAAA".to_string(),
            user.to_string(),
            user.to_string(),
            CodeSource::SelfApply,
            None,
            now,
        );
        CodeStore::insert(store, code.clone()).await.unwrap();
        let record = Application::new(user, user, "s.png", ApplicationStatus::Approved, now)
            .with_code(&code.code)
            .with_verification(AiVerification {
                extracted_name: user.to_string(),
                comment: comment.to_string(),
                comment_time: None,
                confidence: 1.0,
                verified_at: now,
            });
        store.append(record).await.unwrap();
        code
    }

    fn rejected(verdict: Verdict) -> Rejection {
        match verdict {
            Verdict::Reject(rejection) => rejection,
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn fresh_valid_claim_is_issued() {
        let f = fixture().await;
        let verdict = f
            .rules
            .evaluate(&claim("zhang", "zhangsan", COMMENT, Some("今天 10:00")))
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::Issue);
    }

    #[tokio::test]
    async fn stale_and_future_times_are_rejected_first() {
        let f = fixture().await;

        let stale = rejected(
            f.rules
                .evaluate(&claim("zhang", "lisi", "hi", Some("5天前")))
                .await
                .unwrap(),
        );
        assert_eq!(stale.kind, RejectKind::StaleComment);
        assert!(stale.reason.contains("5 days ago"));
        assert_eq!(stale.status(), StatusCode::BAD_REQUEST);

        let future = rejected(
            f.rules
                .evaluate(&claim("zhang", "zhang", COMMENT, Some("今天 23:00")))
                .await
                .unwrap(),
        );
        assert_eq!(future.kind, RejectKind::FutureComment);
    }

    #[tokio::test]
    async fn unreadable_time_skips_recency() {
        let f = fixture().await;
        let verdict = f
            .rules
            .evaluate(&claim("zhang", "zhang", COMMENT, Some("a while back")))
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::Issue);
    }

    #[tokio::test]
    async fn comment_of_another_user_is_theft() {
        let f = fixture().await;
        approve(&f.store, "alice", COMMENT).await;

        let rejection = rejected(
            f.rules
                .evaluate(&claim("bob", "bob", COMMENT, None))
                .await
                .unwrap(),
        );
        assert_eq!(rejection.kind, RejectKind::CommentTaken);
        assert_eq!(rejection.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn same_user_and_comment_reissues_until_redeemed() {
        let f = fixture().await;
        let code = approve(&f.store, "zhang", COMMENT).await;

        let verdict = f
            .rules
            .evaluate(&claim("zhang", "zhang", COMMENT, None))
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::Reissue(code.clone()));

        f.store
            .update(
                &code.code,
                CodeMutation::Consume {
                    at: Utc.with_ymd_and_hms(2026, 10, 18, 3, 30, 0).unwrap(),
                },
            )
            .await
            .unwrap();

        let rejection = rejected(
            f.rules
                .evaluate(&claim("zhang", "zhang", COMMENT, None))
                .await
                .unwrap(),
        );
        assert_eq!(rejection.kind, RejectKind::CommentReused);
    }

    #[tokio::test]
    async fn short_comment_then_name_mismatch() {
        let f = fixture().await;

        let short = rejected(
            f.rules
                .evaluate(&claim("zhang", "lisi", "hi", None))
                .await
                .unwrap(),
        );
        assert_eq!(short.kind, RejectKind::CommentTooShort);
        assert_eq!(short.reason, "comment content under 10 characters");

        let mismatch = rejected(
            f.rules
                .evaluate(&claim("Alice", "Bob", COMMENT, None))
                .await
                .unwrap(),
        );
        assert_eq!(mismatch.kind, RejectKind::NameMismatch);
        assert!(mismatch.reason.contains("Alice") && mismatch.reason.contains("Bob"));
    }

    #[tokio::test]
    async fn length_counts_characters_not_bytes() {
        let f = fixture().await;
        // 10 characters, 30 bytes
        let verdict = f
            .rules
            .evaluate(&claim("zhang", "zhang", "这个应用真的很有意思", None))
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::Issue);

        let short = rejected(
            f.rules
                .evaluate(&claim("zhang", "zhang", "这个应用很有意思", None))
                .await
                .unwrap(),
        );
        assert_eq!(short.kind, RejectKind::CommentTooShort);
    }
}
