//! Fixed-window rate limiter.
//!
//! A bucket's window opens on the first hit after the previous window
//! elapsed and lasts `windowMs`. Within a window the `limit`-th hit is still
//! allowed and every later one is denied until `now - windowStart >=
//! windowMs`, at which point the next hit opens a fresh window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::policy::RateLimitPolicy;
use crate::request::RequestKey;
use crate::store::{CounterStore, InMemoryCounterStore};

/// Per-call options for [`RateLimiter::evaluate`].
#[derive(Debug, Clone, Default)]
pub struct EvaluateOptions {
    /// Explicit bucket id. Takes precedence over the request-derived key.
    pub bucket_id: Option<String>,
}

impl EvaluateOptions {
    pub fn bucket(id: impl Into<String>) -> Self {
        Self {
            bucket_id: Some(id.into()),
        }
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub bucket: String,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    /// The counter store failed; `allowed` reflects the fail-open setting
    /// rather than a real count.
    pub degraded: bool,
}

impl RateLimitDecision {
    /// Whole seconds until the window resets, rounded up, at least 1.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let ms = (self.reset_at - now).num_milliseconds().max(0) as u64;
        ms.div_ceil(1_000).max(1)
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    fail_open: bool,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryCounterStore::new()))
    }
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            fail_open: true,
        }
    }

    /// Admit (`true`, the default) or reject (`false`) calls while the
    /// counter store is failing.
    pub fn with_fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Count this call against its bucket and decide whether it is allowed.
    pub async fn evaluate<R>(
        &self,
        request: &R,
        policy: &RateLimitPolicy,
        options: &EvaluateOptions,
    ) -> RateLimitDecision
    where
        R: RequestKey + ?Sized,
    {
        self.evaluate_at(request, policy, options, Utc::now().timestamp_millis())
            .await
    }

    /// [`evaluate`](Self::evaluate) at an explicit time in Unix milliseconds.
    pub async fn evaluate_at<R>(
        &self,
        request: &R,
        policy: &RateLimitPolicy,
        options: &EvaluateOptions,
        now_ms: i64,
    ) -> RateLimitDecision
    where
        R: RequestKey + ?Sized,
    {
        let bucket = options
            .bucket_id
            .clone()
            .unwrap_or_else(|| request.bucket_key());
        let limit = policy.limit();

        match self.store.hit(&bucket, policy.window_ms(), now_ms).await {
            Ok(state) => {
                let allowed = state.count <= limit;
                let decision = RateLimitDecision {
                    allowed,
                    remaining: limit.saturating_sub(state.count),
                    reset_at: to_utc(state.reset_at_ms()),
                    bucket,
                    limit,
                    degraded: false,
                };
                if allowed {
                    debug!(
                        bucket = %decision.bucket,
                        count = state.count,
                        limit,
                        "Rate limit OK"
                    );
                } else {
                    warn!(
                        bucket = %decision.bucket,
                        count = state.count,
                        limit,
                        "Rate limit exceeded"
                    );
                }
                decision
            }
            Err(e) => {
                error!(
                    bucket = %bucket,
                    store = self.store.name(),
                    fail_open = self.fail_open,
                    error = %e,
                    "Rate limit counter store failed"
                );
                RateLimitDecision {
                    allowed: self.fail_open,
                    remaining: if self.fail_open { limit } else { 0 },
                    reset_at: to_utc(now_ms.saturating_add(policy.window_ms() as i64)),
                    bucket,
                    limit,
                    degraded: true,
                }
            }
        }
    }
}

fn to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Periodically evict buckets whose window elapsed.
///
/// Runs until the returned handle is aborted.
pub fn spawn_sweeper(limiter: RateLimiter, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let now = Utc::now().timestamp_millis();
            if let Err(e) = limiter.store.purge_expired(now).await {
                warn!(store = limiter.store.name(), error = %e, "Rate limit sweep failed");
            }
        }
    })
}
