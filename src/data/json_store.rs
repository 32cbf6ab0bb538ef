//! JSON file store
//!
//! `codes.json` holds `{codes, stats}` and `applications.json` holds
//! `{applications}`. Every mutation loads the whole document, changes it
//! and replaces the file via write-to-temp + rename. One async mutex per
//! document serializes writers within the process.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::Mutex;

use super::models::{AccessCode, Application};
use super::store::{
    self, ApplicationQuery, ApplicationStore, CodeMutation, CodeQuery, CodeStats, CodeStore,
    Mutated, Page,
};
use crate::error::Result;

const CODES_FILE: &str = "codes.json";
const APPLICATIONS_FILE: &str = "applications.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CodesDocument {
    #[serde(default)]
    codes: Vec<AccessCode>,
    #[serde(default)]
    stats: CodeStats,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ApplicationsDocument {
    #[serde(default)]
    applications: Vec<Application>,
}

/// File-backed code and application store
pub struct JsonFileStore {
    codes_path: PathBuf,
    applications_path: PathBuf,
    codes_lock: Mutex<()>,
    applications_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open (and create if needed) the data directory
    pub async fn open(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;

        tracing::info!(path = %data_dir.display(), "JSON store opened");

        Ok(Self {
            codes_path: data_dir.join(CODES_FILE),
            applications_path: data_dir.join(APPLICATIONS_FILE),
            codes_lock: Mutex::new(()),
            applications_lock: Mutex::new(()),
        })
    }

    async fn load_codes(&self) -> Result<CodesDocument> {
        read_document(&self.codes_path).await
    }

    async fn load_applications(&self) -> Result<ApplicationsDocument> {
        read_document(&self.applications_path).await
    }

    async fn save_codes(&self, mut document: CodesDocument) -> Result<()> {
        document.stats = CodeStats::tally(&document.codes);
        write_document(&self.codes_path, &document).await
    }
}

async fn read_document<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(T::default()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

async fn write_document<T: Serialize>(path: &Path, document: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(document)?;
    let tmp = path.with_extension(format!("json.{}.tmp", ulid::Ulid::new()));

    let written = match tokio::fs::write(&tmp, &bytes).await {
        Ok(()) => tokio::fs::rename(&tmp, path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

#[async_trait]
impl CodeStore for JsonFileStore {
    async fn insert_many(&self, codes: Vec<AccessCode>) -> Result<()> {
        if codes.is_empty() {
            return Ok(());
        }

        let _guard = self.codes_lock.lock().await;
        let mut document = self.load_codes().await?;
        document.codes.extend(codes);
        self.save_codes(document).await
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<AccessCode>> {
        let document = self.load_codes().await?;
        Ok(document.codes.into_iter().find(|c| c.code == code))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<AccessCode>> {
        let document = self.load_codes().await?;
        Ok(document.codes.into_iter().find(|c| c.id == id))
    }

    async fn update(&self, code: &str, mutation: CodeMutation) -> Result<Option<Mutated>> {
        let _guard = self.codes_lock.lock().await;
        let mut document = self.load_codes().await?;

        let mutated = store::mutate_code(&mut document.codes, code, mutation);
        if mutated.as_ref().is_some_and(|m| m.applied) {
            self.save_codes(document).await?;
        }
        Ok(mutated)
    }

    async fn list(&self, query: &CodeQuery) -> Result<Page<AccessCode>> {
        let document = self.load_codes().await?;
        Ok(store::query_codes(document.codes, query))
    }

    async fn stats(&self) -> Result<CodeStats> {
        let document = self.load_codes().await?;
        Ok(CodeStats::tally(&document.codes))
    }
}

#[async_trait]
impl ApplicationStore for JsonFileStore {
    async fn append(&self, application: Application) -> Result<()> {
        let _guard = self.applications_lock.lock().await;
        let mut document = self.load_applications().await?;
        document.applications.push(application);
        write_document(&self.applications_path, &document).await
    }

    async fn find_approved_by_comment(
        &self,
        user_name: &str,
        comment: &str,
    ) -> Result<Option<Application>> {
        let document = self.load_applications().await?;
        Ok(store::approved_by_comment(&document.applications, user_name, comment).cloned())
    }

    async fn find_approved_by_comment_elsewhere(
        &self,
        user_name: &str,
        comment: &str,
    ) -> Result<Option<Application>> {
        let document = self.load_applications().await?;
        Ok(
            store::approved_by_comment_elsewhere(&document.applications, user_name, comment)
                .cloned(),
        )
    }

    async fn list(&self, query: &ApplicationQuery) -> Result<Page<Application>> {
        let document = self.load_applications().await?;
        Ok(store::query_applications(document.applications, query))
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Application>> {
        let document = self.load_applications().await?;
        Ok(store::recent_applications(document.applications, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::models::{ApplicationStatus, CodeSource, CodeStatus};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn sample_code(code: &str) -> AccessCode {
        AccessCode::new(
            code.to_string(),
            "zhang".to_string(),
            "zhang".to_string(),
            CodeSource::SelfApply,
            Some("self-service".to_string()),
            Utc.with_ymd_and_hms(2026, 10, 18, 2, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn failed_rename_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        // A non-empty directory where the document should go makes the
        // rename fail after the temp file was written.
        let target = dir.path().join(CODES_FILE);
        tokio::fs::create_dir(&target).await.unwrap();
        tokio::fs::write(target.join("occupied"), b"x").await.unwrap();

        let result = write_document(&target, &CodesDocument::default()).await;
        assert!(result.is_err());

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            let name = entry.file_name().to_string_lossy().into_owned();
            assert!(!name.ends_with(".tmp"), "leftover {name}");
        }
    }

    #[tokio::test]
    async fn missing_files_read_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();

        assert!(store.find_by_code("PHIL2024-AAAAAA").await.unwrap().is_none());
        assert_eq!(CodeStore::list(&store, &CodeQuery::default()).await.unwrap().total, 0);
        assert!(store.recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn codes_document_keeps_stats_in_sync() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        store.insert(sample_code("PHIL2024-AAAAAA")).await.unwrap();
        store.insert(sample_code("PHIL2024-BBBBBB")).await.unwrap();

        let at = Utc.with_ymd_and_hms(2026, 10, 18, 3, 0, 0).unwrap();
        let mutated = store
            .update("PHIL2024-AAAAAA", CodeMutation::Consume { at })
            .await
            .unwrap()
            .unwrap();
        assert!(mutated.applied);
        assert_eq!(mutated.code.status, CodeStatus::Used);

        let raw = std::fs::read_to_string(dir.path().join(CODES_FILE)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["stats"]["total"], 2);
        assert_eq!(json["stats"]["used"], 1);
        assert_eq!(json["stats"]["selfApply"], 2);
        assert_eq!(json["codes"][0]["usedAt"], "2026-10-18T03:00:00Z");
    }

    #[tokio::test]
    async fn concurrent_consumption_applies_once() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JsonFileStore::open(dir.path()).await.unwrap());
        store.insert(sample_code("PHIL2024-RACE00")).await.unwrap();

        let at = Utc.with_ymd_and_hms(2026, 10, 18, 3, 0, 0).unwrap();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update("PHIL2024-RACE00", CodeMutation::Consume { at })
                    .await
                    .unwrap()
                    .unwrap()
                    .applied
            }));
        }

        let mut applied = 0;
        for handle in handles {
            if handle.await.unwrap() {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);

        let stored = store.find_by_code("PHIL2024-RACE00").await.unwrap().unwrap();
        assert_eq!(stored.current_uses, 1);
    }

    #[tokio::test]
    async fn applications_round_trip_through_disk() {
        let dir = TempDir::new().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 2, 0, 0).unwrap();
        {
            let store = JsonFileStore::open(dir.path()).await.unwrap();
            store
                .append(
                    Application::new("li", "li", "", ApplicationStatus::Rejected, now)
                        .with_reject_reason("comment content under 10 characters"),
                )
                .await
                .unwrap();
        }

        let reopened = JsonFileStore::open(dir.path()).await.unwrap();
        let page = ApplicationStore::list(
            &reopened,
            &ApplicationQuery {
                status: Some(ApplicationStatus::Rejected),
                ..ApplicationQuery::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(
            page.items[0].reject_reason.as_deref(),
            Some("comment content under 10 characters")
        );
    }
}
