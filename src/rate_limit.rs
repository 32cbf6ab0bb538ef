//! Per-client rate limiting
//!
//! Sliding-window log: each client keeps the timestamps of its admitted
//! requests inside the window. Process-local, like the rest of the
//! in-memory state.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::clock::Clock;
use crate::error::AppError;

const DEFAULT_MAX_TRACKED_KEYS: usize = 10_000;

/// Timestamps of admitted requests, oldest first
#[derive(Debug, Clone, Default)]
struct Window {
    hits: VecDeque<DateTime<Utc>>,
}

impl Window {
    /// Drop hits that fell out of the window
    fn prune(&mut self, now: DateTime<Utc>, window: Duration) {
        while self.hits.front().is_some_and(|t| now - *t >= window) {
            self.hits.pop_front();
        }
    }

    fn newest(&self) -> Option<DateTime<Utc>> {
        self.hits.back().copied()
    }
}

/// Sliding-window rate limiter keyed by client address
pub struct RateLimiter {
    /// Windows: client key -> admitted timestamps
    entries: Arc<RwLock<HashMap<String, Window>>>,
    /// Maximum requests per window
    max_requests: u32,
    /// Window duration
    window: Duration,
    /// Maximum number of tracked keys in memory
    max_tracked_keys: usize,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create new rate limiter
    pub fn new(max_requests: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self::with_max_tracked_keys(max_requests, window, DEFAULT_MAX_TRACKED_KEYS, clock)
    }

    /// Create new rate limiter with explicit in-memory key cap.
    pub fn with_max_tracked_keys(
        max_requests: u32,
        window: Duration,
        max_tracked_keys: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            max_requests,
            window,
            max_tracked_keys: max_tracked_keys.max(1),
            clock,
        }
    }

    fn prune_locked(
        entries: &mut HashMap<String, Window>,
        now: DateTime<Utc>,
        window: Duration,
    ) -> usize {
        let before = entries.len();
        entries.retain(|_, w| {
            w.prune(now, window);
            !w.hits.is_empty()
        });
        before - entries.len()
    }

    fn evict_oldest_locked(entries: &mut HashMap<String, Window>) -> bool {
        let Some(oldest_key) = entries
            .iter()
            .min_by_key(|(_, w)| w.newest())
            .map(|(key, _)| key.clone())
        else {
            return false;
        };
        entries.remove(&oldest_key);
        true
    }

    /// Admit a request from `key` if it is under the limit.
    ///
    /// Admitted requests are recorded; rejected ones leave no trace.
    pub async fn admit(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;

        if !entries.contains_key(key) && entries.len() >= self.max_tracked_keys {
            Self::prune_locked(&mut entries, now, self.window);
            if entries.len() >= self.max_tracked_keys {
                let _ = Self::evict_oldest_locked(&mut entries);
            }
        }

        let window = entries.entry(key.to_string()).or_default();
        window.prune(now, self.window);

        if window.hits.len() >= self.max_requests as usize {
            false
        } else {
            window.hits.push_back(now);
            true
        }
    }

    /// [`admit`](Self::admit) as a `Result`, with a user-facing message
    pub async fn check(&self, key: &str) -> Result<(), AppError> {
        if self.admit(key).await {
            Ok(())
        } else {
            Err(AppError::RateLimited(format!(
                "Too many requests, please try again in {} minutes",
                self.window.num_minutes().max(1)
            )))
        }
    }

    /// Requests counted against `key` in the current window
    pub async fn get_count(&self, key: &str) -> usize {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        entries
            .get(key)
            .map(|w| w.hits.iter().filter(|t| now - **t < self.window).count())
            .unwrap_or(0)
    }

    /// Prune old entries
    ///
    /// Called periodically by the background sweep.
    pub async fn prune(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let removed = Self::prune_locked(&mut entries, now, self.window);

        if removed > 0 {
            tracing::debug!("Pruned {} idle rate limit windows", removed);
        }
        removed
    }

    /// Number of clients currently holding a window
    pub async fn tracked_clients(&self) -> usize {
        self.entries.read().await.len()
    }
}
