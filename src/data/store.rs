//! Store interfaces
//!
//! Both backends hold each collection as one document that is read in
//! full, changed in memory and written back. The in-memory half of that
//! cycle lives here so the JSON file and Redis backends share it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::models::{AccessCode, Application, ApplicationStatus, CodeSource, CodeStatus};
use crate::error::Result;

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 500;

/// Persistent table of issued codes
#[async_trait]
pub trait CodeStore: Send + Sync {
    /// Add one code
    async fn insert(&self, code: AccessCode) -> Result<()> {
        self.insert_many(vec![code]).await
    }

    /// Add several codes in one write
    async fn insert_many(&self, codes: Vec<AccessCode>) -> Result<()>;

    async fn find_by_code(&self, code: &str) -> Result<Option<AccessCode>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<AccessCode>>;

    /// Apply `mutation` to the code atomically with respect to other
    /// writers. `None` when the code does not exist.
    async fn update(&self, code: &str, mutation: CodeMutation) -> Result<Option<Mutated>>;

    async fn list(&self, query: &CodeQuery) -> Result<Page<AccessCode>>;

    async fn stats(&self) -> Result<CodeStats>;
}

/// Append-only log of verification and activation events
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn append(&self, application: Application) -> Result<()>;

    /// Approved record for exactly this user and comment text
    async fn find_approved_by_comment(
        &self,
        user_name: &str,
        comment: &str,
    ) -> Result<Option<Application>>;

    /// Approved record with this comment text that belongs to someone else
    async fn find_approved_by_comment_elsewhere(
        &self,
        user_name: &str,
        comment: &str,
    ) -> Result<Option<Application>>;

    async fn list(&self, query: &ApplicationQuery) -> Result<Page<Application>>;

    /// Newest first
    async fn recent(&self, limit: usize) -> Result<Vec<Application>>;
}

/// State change a store applies to a single code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeMutation {
    /// Record one redemption; only applies while the code is redeemable
    Consume { at: DateTime<Utc> },
    /// Lazily mark as expired
    Expire,
}

impl CodeMutation {
    fn apply(&self, code: &mut AccessCode) -> bool {
        match self {
            CodeMutation::Consume { at } => code.consume(*at),
            CodeMutation::Expire => code.expire(),
        }
    }
}

/// Result of [`CodeStore::update`]
#[derive(Debug, Clone)]
pub struct Mutated {
    /// Code as stored after the call
    pub code: AccessCode,
    /// Whether the mutation changed anything
    pub applied: bool,
}

/// One page of a newest-first listing
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub pages: usize,
}

/// Filters for listing codes
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CodeQuery {
    pub status: Option<CodeStatus>,
    pub source: Option<CodeSource>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

/// Filters for listing applications
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplicationQuery {
    pub status: Option<ApplicationStatus>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

/// Counters kept alongside the codes collection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeStats {
    pub total: usize,
    pub active: usize,
    pub used: usize,
    pub expired: usize,
    pub batch: usize,
    pub self_apply: usize,
}

impl CodeStats {
    pub fn tally(codes: &[AccessCode]) -> Self {
        let mut stats = Self {
            total: codes.len(),
            ..Self::default()
        };
        for code in codes {
            match code.status {
                CodeStatus::Active => stats.active += 1,
                CodeStatus::Used => stats.used += 1,
                CodeStatus::Expired => stats.expired += 1,
            }
            match code.source {
                CodeSource::Batch => stats.batch += 1,
                CodeSource::SelfApply => stats.self_apply += 1,
                CodeSource::Manual => {}
            }
        }
        stats
    }
}

/// Apply `mutation` to the matching code inside a loaded collection.
pub(crate) fn mutate_code(
    codes: &mut [AccessCode],
    code: &str,
    mutation: CodeMutation,
) -> Option<Mutated> {
    let record = codes.iter_mut().find(|c| c.code == code)?;
    let applied = mutation.apply(record);
    Some(Mutated {
        code: record.clone(),
        applied,
    })
}

pub(crate) fn query_codes(mut codes: Vec<AccessCode>, query: &CodeQuery) -> Page<AccessCode> {
    codes.retain(|c| {
        query.status.is_none_or(|s| c.status == s) && query.source.is_none_or(|s| c.source == s)
    });
    codes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    paginate(codes, query.page, query.limit)
}

pub(crate) fn query_applications(
    mut applications: Vec<Application>,
    query: &ApplicationQuery,
) -> Page<Application> {
    if let Some(status) = query.status {
        applications.retain(|a| a.status == status);
    }
    applications.sort_by(|a, b| b.applied_at.cmp(&a.applied_at));
    paginate(applications, query.page, query.limit)
}

pub(crate) fn recent_applications(
    mut applications: Vec<Application>,
    limit: usize,
) -> Vec<Application> {
    applications.sort_by(|a, b| b.applied_at.cmp(&a.applied_at));
    applications.truncate(limit);
    applications
}

pub(crate) fn approved_by_comment<'a>(
    applications: &'a [Application],
    user_name: &str,
    comment: &str,
) -> Option<&'a Application> {
    applications.iter().find(|a| {
        a.status == ApplicationStatus::Approved
            && a.user_name == user_name
            && a.comment() == Some(comment)
    })
}

pub(crate) fn approved_by_comment_elsewhere<'a>(
    applications: &'a [Application],
    user_name: &str,
    comment: &str,
) -> Option<&'a Application> {
    applications.iter().find(|a| {
        a.status == ApplicationStatus::Approved
            && a.user_name != user_name
            && a.comment() == Some(comment)
    })
}

fn paginate<T>(items: Vec<T>, page: Option<usize>, limit: Option<usize>) -> Page<T> {
    let page = page.unwrap_or(1).max(1);
    let limit = limit
        .filter(|l| *l > 0)
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .min(MAX_PAGE_SIZE);
    let total = items.len();
    let pages = total.div_ceil(limit);
    let items = items
        .into_iter()
        .skip((page - 1).saturating_mul(limit))
        .take(limit)
        .collect();

    Page {
        items,
        total,
        page,
        pages,
    }
}
