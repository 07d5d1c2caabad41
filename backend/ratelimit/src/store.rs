use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

/// Counter state of one bucket after a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketState {
    /// Events recorded in the current window, including denied ones.
    pub count: u32,
    pub window_start_ms: i64,
    pub window_ms: u64,
}

impl BucketState {
    fn fresh(now_ms: i64, window_ms: u64) -> Self {
        Self {
            count: 0,
            window_start_ms: now_ms,
            window_ms,
        }
    }

    pub fn reset_at_ms(&self) -> i64 {
        self.window_start_ms.saturating_add(self.window_ms as i64)
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.window_start_ms) >= self.window_ms as i64
    }
}

/// Storage for bucket counters.
///
/// `hit` must be atomic per key: concurrent hits on one bucket must each see
/// a distinct count. Backends shared between processes give consistent
/// admission across every gateway instance using them.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Record one event for `key` at `now_ms`.
    ///
    /// Starts a new window (count 1) when the bucket is unknown or its window
    /// elapsed; otherwise increments the count.
    async fn hit(&self, key: &str, window_ms: u64, now_ms: i64) -> Result<BucketState>;

    /// Drop every bucket whose window elapsed. Returns how many were removed.
    async fn purge_expired(&self, now_ms: i64) -> Result<usize>;

    /// Number of buckets currently held.
    async fn len(&self) -> Result<usize>;
}

/// Process-local counters behind a mutex.
#[derive(Default)]
pub struct InMemoryCounterStore {
    buckets: Mutex<HashMap<String, BucketState>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn hit(&self, key: &str, window_ms: u64, now_ms: i64) -> Result<BucketState> {
        let mut buckets = self.buckets.lock().await;
        let state = buckets
            .entry(key.to_string())
            .or_insert_with(|| BucketState::fresh(now_ms, window_ms));

        if state.window_ms != window_ms || state.is_expired(now_ms) {
            *state = BucketState::fresh(now_ms, window_ms);
        }
        state.count = state.count.saturating_add(1);
        Ok(*state)
    }

    async fn purge_expired(&self, now_ms: i64) -> Result<usize> {
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|_, state| !state.is_expired(now_ms));
        let removed = before - buckets.len();
        if removed > 0 {
            debug!(removed, remaining = buckets.len(), "Purged expired rate limit buckets");
        }
        Ok(removed)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.buckets.lock().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hits_accumulate_within_window() {
        let store = InMemoryCounterStore::new();
        assert_eq!(store.hit("k", 1_000, 0).await.unwrap().count, 1);
        assert_eq!(store.hit("k", 1_000, 500).await.unwrap().count, 2);
        let state = store.hit("k", 1_000, 999).await.unwrap();
        assert_eq!(state.count, 3);
        assert_eq!(state.reset_at_ms(), 1_000);
    }

    #[tokio::test]
    async fn window_restarts_once_elapsed() {
        let store = InMemoryCounterStore::new();
        store.hit("k", 1_000, 0).await.unwrap();
        store.hit("k", 1_000, 10).await.unwrap();
        let state = store.hit("k", 1_000, 1_000).await.unwrap();
        assert_eq!(state.count, 1);
        assert_eq!(state.window_start_ms, 1_000);
    }

    #[tokio::test]
    async fn purge_keeps_live_buckets() {
        let store = InMemoryCounterStore::new();
        store.hit("old", 1_000, 0).await.unwrap();
        store.hit("new", 1_000, 900).await.unwrap();
        assert_eq!(store.purge_expired(1_200).await.unwrap(), 1);
        assert_eq!(store.len().await.unwrap(), 1);
    }
}
