//! Redis store
//!
//! Same document layout as the JSON files, one key per collection:
//! `access_codes` (array), `access_codes_stats` and `applications` (array).
//! Writes are optimistic: WATCH the key, read, change, then
//! MULTI/EXEC; a nil EXEC reply means another writer got there first
//! and the whole cycle is retried.

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use redis::aio::ConnectionLike;
use serde::{Serialize, de::DeserializeOwned};

use super::models::{AccessCode, Application};
use super::store::{
    self, ApplicationQuery, ApplicationStore, CodeMutation, CodeQuery, CodeStats, CodeStore,
    Mutated, Page,
};
use crate::error::{AppError, Result};
use crate::metrics::STORE_CONFLICTS_TOTAL;

const CODES_KEY: &str = "access_codes";
const STATS_KEY: &str = "access_codes_stats";
const APPLICATIONS_KEY: &str = "applications";

const MAX_CAS_ATTEMPTS: usize = 16;

/// Redis-backed code and application store
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("status", &self.pool.status())
            .finish()
    }
}

impl RedisStore {
    /// Create the connection pool and check the server answers
    pub async fn connect(url: &str, max_connections: usize) -> Result<Self> {
        let pool = Config::from_url(url)
            .builder()
            .map_err(|e| AppError::Storage(format!("failed to create redis pool: {}", e)))?
            .max_size(max_connections.max(1))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| AppError::Storage(format!("failed to create redis pool: {}", e)))?;

        let store = Self { pool };
        let mut conn = store.pool.get().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;

        // Redact credentials from URL for logging
        let safe_url = url.split('@').next_back().unwrap_or(url);
        tracing::info!(url = %safe_url, max_connections, "Redis store connected");

        Ok(store)
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = conn.get(key).await?;
        decode(raw)
    }

    /// Optimistic read-modify-write of the collection at `key`.
    ///
    /// `change` returns its result and whether the collection must be
    /// written back. `extra` derives additional keys written in the same
    /// transaction.
    async fn modify<T, R, F>(
        &self,
        key: &str,
        change: F,
        extra: fn(&[T]) -> Result<Vec<(&'static str, String)>>,
    ) -> Result<R>
    where
        T: Serialize + DeserializeOwned + Send,
        R: Send,
        F: FnMut(&mut Vec<T>) -> (R, bool) + Send,
    {
        let mut conn = self.pool.get().await?;
        modify_on(&mut conn, key, change, extra).await
    }
}

/// CAS loop on one connection. A failed cycle always clears its WATCH
/// so the connection goes back to the pool clean.
async fn modify_on<C, T, R, F>(
    conn: &mut C,
    key: &str,
    mut change: F,
    extra: fn(&[T]) -> Result<Vec<(&'static str, String)>>,
) -> Result<R>
where
    C: ConnectionLike + Send,
    T: Serialize + DeserializeOwned + Send,
    R: Send,
    F: FnMut(&mut Vec<T>) -> (R, bool) + Send,
{
    for attempt in 1..=MAX_CAS_ATTEMPTS {
        redis::cmd("WATCH").arg(key).query_async::<()>(&mut *conn).await?;

        match cas_cycle(&mut *conn, key, &mut change, extra).await {
            Ok(Some(outcome)) => return Ok(outcome),
            Ok(None) => {
                STORE_CONFLICTS_TOTAL.inc();
                tracing::debug!(key, attempt, "Redis transaction conflicted, retrying");
            }
            Err(error) => {
                if let Err(unwatch) = redis::cmd("UNWATCH").query_async::<()>(&mut *conn).await {
                    tracing::warn!(error = %unwatch, key, "Failed to clear WATCH");
                }
                return Err(error);
            }
        }
    }

    Err(AppError::Storage(format!(
        "gave up writing {} after {} conflicting attempts",
        key, MAX_CAS_ATTEMPTS
    )))
}

/// One WATCHed cycle; `None` when EXEC was aborted by another writer
async fn cas_cycle<C, T, R, F>(
    conn: &mut C,
    key: &str,
    change: &mut F,
    extra: fn(&[T]) -> Result<Vec<(&'static str, String)>>,
) -> Result<Option<R>>
where
    C: ConnectionLike + Send,
    T: Serialize + DeserializeOwned + Send,
    R: Send,
    F: FnMut(&mut Vec<T>) -> (R, bool) + Send,
{
    let raw: Option<String> = conn.get(key).await?;
    let mut items: Vec<T> = decode(raw)?;
    let (outcome, dirty) = change(&mut items);

    if !dirty {
        redis::cmd("UNWATCH").query_async::<()>(&mut *conn).await?;
        return Ok(Some(outcome));
    }

    let mut pipe = redis::pipe();
    pipe.atomic()
        .set(key, serde_json::to_string(&items)?)
        .ignore();
    for (extra_key, value) in extra(&items)? {
        pipe.set(extra_key, value).ignore();
    }

    let committed: Option<redis::Value> = pipe.query_async(&mut *conn).await?;
    Ok(committed.map(|_| outcome))
}

fn decode<T: DeserializeOwned>(raw: Option<String>) -> Result<Vec<T>> {
    match raw {
        Some(json) if !json.trim().is_empty() => Ok(serde_json::from_str(&json)?),
        _ => Ok(Vec::new()),
    }
}

fn codes_stats(codes: &[AccessCode]) -> Result<Vec<(&'static str, String)>> {
    Ok(vec![(STATS_KEY, serde_json::to_string(&CodeStats::tally(codes))?)])
}

fn nothing_extra(_: &[Application]) -> Result<Vec<(&'static str, String)>> {
    Ok(Vec::new())
}

#[async_trait]
impl CodeStore for RedisStore {
    async fn insert_many(&self, codes: Vec<AccessCode>) -> Result<()> {
        if codes.is_empty() {
            return Ok(());
        }

        self.modify(
            CODES_KEY,
            |stored: &mut Vec<AccessCode>| {
                stored.extend(codes.iter().cloned());
                ((), true)
            },
            codes_stats,
        )
        .await
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<AccessCode>> {
        let codes: Vec<AccessCode> = self.read(CODES_KEY).await?;
        Ok(codes.into_iter().find(|c| c.code == code))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<AccessCode>> {
        let codes: Vec<AccessCode> = self.read(CODES_KEY).await?;
        Ok(codes.into_iter().find(|c| c.id == id))
    }

    async fn update(&self, code: &str, mutation: CodeMutation) -> Result<Option<Mutated>> {
        self.modify(
            CODES_KEY,
            |stored: &mut Vec<AccessCode>| {
                let mutated = store::mutate_code(stored, code, mutation);
                let dirty = mutated.as_ref().is_some_and(|m| m.applied);
                (mutated, dirty)
            },
            codes_stats,
        )
        .await
    }

    async fn list(&self, query: &CodeQuery) -> Result<Page<AccessCode>> {
        let codes: Vec<AccessCode> = self.read(CODES_KEY).await?;
        Ok(store::query_codes(codes, query))
    }

    async fn stats(&self) -> Result<CodeStats> {
        let codes: Vec<AccessCode> = self.read(CODES_KEY).await?;
        Ok(CodeStats::tally(&codes))
    }
}

#[async_trait]
impl ApplicationStore for RedisStore {
    async fn append(&self, application: Application) -> Result<()> {
        self.modify(
            APPLICATIONS_KEY,
            |stored: &mut Vec<Application>| {
                stored.push(application.clone());
                ((), true)
            },
            nothing_extra,
        )
        .await
    }

    async fn find_approved_by_comment(
        &self,
        user_name: &str,
        comment: &str,
    ) -> Result<Option<Application>> {
        let applications: Vec<Application> = self.read(APPLICATIONS_KEY).await?;
        Ok(store::approved_by_comment(&applications, user_name, comment).cloned())
    }

    async fn find_approved_by_comment_elsewhere(
        &self,
        user_name: &str,
        comment: &str,
    ) -> Result<Option<Application>> {
        let applications: Vec<Application> = self.read(APPLICATIONS_KEY).await?;
        Ok(store::approved_by_comment_elsewhere(&applications, user_name, comment).cloned())
    }

    async fn list(&self, query: &ApplicationQuery) -> Result<Page<Application>> {
        let applications: Vec<Application> = self.read(APPLICATIONS_KEY).await?;
        Ok(store::query_applications(applications, query))
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Application>> {
        let applications: Vec<Application> = self.read(APPLICATIONS_KEY).await?;
        Ok(store::recent_applications(applications, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_or_blank_keys_decode_as_empty() {
        assert!(decode::<AccessCode>(None).unwrap().is_empty());
        assert!(decode::<AccessCode>(Some("  ".to_string())).unwrap().is_empty());
        assert!(decode::<AccessCode>(Some("[]".to_string())).unwrap().is_empty());
        assert!(decode::<AccessCode>(Some("{oops".to_string())).is_err());
    }

    /// Connection that answers GET with `get_reply` (or an I/O error) and
    /// everything else with OK, recording command names.
    struct ScriptedConnection {
        get_reply: Option<redis::Value>,
        commands: Vec<String>,
    }

    impl ScriptedConnection {
        fn new(get_reply: Option<redis::Value>) -> Self {
            Self {
                get_reply,
                commands: Vec::new(),
            }
        }
    }

    impl ConnectionLike for ScriptedConnection {
        fn req_packed_command<'a>(
            &'a mut self,
            cmd: &'a redis::Cmd,
        ) -> redis::RedisFuture<'a, redis::Value> {
            let name = match cmd.args_iter().next() {
                Some(redis::Arg::Simple(bytes)) => String::from_utf8_lossy(bytes).to_uppercase(),
                _ => String::new(),
            };
            self.commands.push(name.clone());
            let reply = match name.as_str() {
                "GET" => self.get_reply.clone().ok_or_else(|| {
                    redis::RedisError::from((redis::ErrorKind::IoError, "connection reset"))
                }),
                _ => Ok(redis::Value::Okay),
            };
            Box::pin(async move { reply })
        }

        fn req_packed_commands<'a>(
            &'a mut self,
            _cmd: &'a redis::Pipeline,
            _offset: usize,
            _count: usize,
        ) -> redis::RedisFuture<'a, Vec<redis::Value>> {
            self.commands.push("EXEC".to_string());
            Box::pin(async { Ok(Vec::new()) })
        }

        fn get_db(&self) -> i64 {
            0
        }
    }

    fn touch(codes: &mut Vec<AccessCode>) -> (usize, bool) {
        (codes.len(), true)
    }

    #[tokio::test]
    async fn failed_read_clears_watch() {
        let mut conn = ScriptedConnection::new(None);

        let result = modify_on(&mut conn, CODES_KEY, touch, codes_stats).await;

        assert!(result.is_err());
        assert_eq!(conn.commands, ["WATCH", "GET", "UNWATCH"]);
    }

    #[tokio::test]
    async fn undecodable_collection_clears_watch() {
        let mut conn =
            ScriptedConnection::new(Some(redis::Value::BulkString(b"{oops".to_vec())));

        let result = modify_on(&mut conn, CODES_KEY, touch, codes_stats).await;

        assert!(matches!(result, Err(AppError::Serialization(_))));
        assert_eq!(conn.commands, ["WATCH", "GET", "UNWATCH"]);
    }

    #[tokio::test]
    async fn clean_read_unwatches_without_writing() {
        let mut conn = ScriptedConnection::new(Some(redis::Value::Nil));

        let read_only = |codes: &mut Vec<AccessCode>| (codes.len(), false);
        let seen = modify_on(&mut conn, CODES_KEY, read_only, codes_stats)
            .await
            .unwrap();

        assert_eq!(seen, 0);
        assert_eq!(conn.commands, ["WATCH", "GET", "UNWATCH"]);
    }

    #[test]
    fn stats_are_written_next_to_codes() {
        let writes = codes_stats(&[]).unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, STATS_KEY);
        assert!(writes[0].1.contains("\"selfApply\":0"));
    }
}
