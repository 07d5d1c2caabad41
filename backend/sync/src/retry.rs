//! Retry engine: exponential backoff with jitter for failed progress writes.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total delivery attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds.
    pub base_delay_ms: u64,
    /// Multiplier for each subsequent wait.
    pub backoff_factor: f64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Add ±25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            backoff_factor: 2.0,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Compute the delay after failed attempt `attempt_number` (1-indexed).
    pub fn delay_for(&self, attempt_number: u32) -> Duration {
        if attempt_number == 0 {
            return Duration::ZERO;
        }
        let delay_ms = self.base_delay_ms as f64
            * self.backoff_factor.powi((attempt_number - 1) as i32);
        let delay_ms = delay_ms.min(self.max_delay_ms as f64) as u64;

        let delay_ms = if self.jitter {
            let jitter = (delay_ms / 4) as i64;
            let offset = if jitter > 0 {
                rand::thread_rng().gen_range(-jitter..=jitter)
            } else {
                0
            };
            (delay_ms as i64 + offset).max(0) as u64
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms)
    }

    pub fn should_retry(&self, attempt_number: u32) -> bool {
        attempt_number < self.max_attempts
    }
}

/// Retry bookkeeping for one write's delivery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryState {
    pub attempt: u32,
    pub last_error: Option<String>,
    pub exhausted: bool,
}

impl RetryState {
    /// Record a failed attempt.
    ///
    /// Returns the delay to wait before the next attempt, or `None` once the
    /// policy is exhausted.
    pub fn record_failure(&mut self, policy: &RetryPolicy, error: &str) -> Option<Duration> {
        self.attempt += 1;
        self.last_error = Some(error.to_string());

        if policy.should_retry(self.attempt) {
            let delay = policy.delay_for(self.attempt);
            warn!(
                attempt = self.attempt,
                max = policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error,
                "Progress write failed, will retry"
            );
            Some(delay)
        } else {
            self.exhausted = true;
            warn!(attempt = self.attempt, error, "Progress write retry policy exhausted");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_grows() {
        let policy = RetryPolicy { jitter: false, ..Default::default() };
        let d1 = policy.delay_for(1).as_millis();
        let d2 = policy.delay_for(2).as_millis();
        let d3 = policy.delay_for(3).as_millis();
        assert!(d2 > d1, "delay should grow: {d1} < {d2}");
        assert!(d3 > d2, "delay should grow: {d2} < {d3}");
    }

    #[test]
    fn respects_max_delay() {
        let policy = RetryPolicy {
            max_delay_ms: 5_000,
            jitter: false,
            ..Default::default()
        };
        let d10 = policy.delay_for(10).as_millis();
        assert!(d10 <= 5_000, "delay capped at max: {d10}");
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let policy = RetryPolicy {
            base_delay_ms: 1_000,
            jitter: true,
            ..Default::default()
        };
        for _ in 0..50 {
            let d = policy.delay_for(1).as_millis();
            assert!((750..=1_250).contains(&d), "jittered delay out of range: {d}");
        }
    }

    #[test]
    fn state_exhausts_after_max_attempts() {
        let policy = RetryPolicy { max_attempts: 2, jitter: false, ..Default::default() };
        let mut state = RetryState::default();
        assert!(state.record_failure(&policy, "timeout").is_some());
        assert!(state.record_failure(&policy, "timeout").is_none());
        assert!(state.exhausted);
        assert_eq!(state.attempt, 2);
        assert_eq!(state.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn none_policy_gives_single_attempt() {
        let mut state = RetryState::default();
        assert!(state.record_failure(&RetryPolicy::none(), "boom").is_none());
    }
}
