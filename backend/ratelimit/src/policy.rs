//! Rate limit policies: `{limit, windowMs}` records validated at construction.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the policy used when a route asks for one that is not configured.
pub const DEFAULT_POLICY: &str = "default";

/// Windows are added to millisecond timestamps as `i64`.
pub const MAX_WINDOW_MS: u64 = i64::MAX as u64;

/// Built-in fallback: 100 requests per minute.
const FALLBACK_LIMIT: u32 = 100;
const FALLBACK_WINDOW_MS: u64 = 60_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("invalid rate limit policy '{name}': {reason}")]
    InvalidPolicy { name: String, reason: String },
}

/// Max `limit` events per `window` for one bucket.
///
/// Only constructible through [`RateLimitPolicy::new`] (or deserialization,
/// which goes through it), so a zero limit or zero window is rejected while
/// the service is being configured rather than on a live request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPolicy", into = "RawPolicy")]
pub struct RateLimitPolicy {
    limit: u32,
    window: Duration,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPolicy {
    limit: u32,
    window_ms: u64,
}

impl TryFrom<RawPolicy> for RateLimitPolicy {
    type Error = RateLimitError;

    fn try_from(raw: RawPolicy) -> Result<Self, Self::Error> {
        RateLimitPolicy::new(raw.limit, raw.window_ms)
    }
}

impl From<RateLimitPolicy> for RawPolicy {
    fn from(policy: RateLimitPolicy) -> Self {
        RawPolicy {
            limit: policy.limit,
            window_ms: policy.window_ms(),
        }
    }
}

impl RateLimitPolicy {
    pub fn new(limit: u32, window_ms: u64) -> Result<Self, RateLimitError> {
        Self::named("<inline>", limit, window_ms)
    }

    /// Like [`new`](Self::new), with the policy name carried into the error.
    pub fn named(name: &str, limit: u32, window_ms: u64) -> Result<Self, RateLimitError> {
        if limit == 0 {
            return Err(RateLimitError::InvalidPolicy {
                name: name.to_string(),
                reason: "limit must be > 0".to_string(),
            });
        }
        if window_ms == 0 {
            return Err(RateLimitError::InvalidPolicy {
                name: name.to_string(),
                reason: "windowMs must be > 0".to_string(),
            });
        }
        if window_ms > MAX_WINDOW_MS {
            return Err(RateLimitError::InvalidPolicy {
                name: name.to_string(),
                reason: format!("windowMs must be <= {MAX_WINDOW_MS}"),
            });
        }
        Ok(Self {
            limit,
            window: Duration::from_millis(window_ms),
        })
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn window_ms(&self) -> u64 {
        self.window.as_millis() as u64
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            limit: FALLBACK_LIMIT,
            window: Duration::from_millis(FALLBACK_WINDOW_MS),
        }
    }
}

/// Named policies for route classes (`progressWrite`, `progressRead`, ...).
#[derive(Debug, Clone, Default)]
pub struct RateLimitPolicies {
    default: RateLimitPolicy,
    named: HashMap<String, RateLimitPolicy>,
}

impl RateLimitPolicies {
    /// Build the table from `(name, limit, window_ms)` entries.
    ///
    /// Fails on the first malformed entry. An entry named `default` replaces
    /// the built-in fallback.
    pub fn from_entries<'a, I>(entries: I) -> Result<Self, RateLimitError>
    where
        I: IntoIterator<Item = (&'a str, u32, u64)>,
    {
        let mut table = Self::default();
        for (name, limit, window_ms) in entries {
            let policy = RateLimitPolicy::named(name, limit, window_ms)?;
            if name == DEFAULT_POLICY {
                table.default = policy;
            } else {
                table.named.insert(name.to_string(), policy);
            }
        }
        Ok(table)
    }

    pub fn insert(&mut self, name: impl Into<String>, policy: RateLimitPolicy) {
        let name = name.into();
        if name == DEFAULT_POLICY {
            self.default = policy;
        } else {
            self.named.insert(name, policy);
        }
    }

    /// Policy for `name`, falling back to the default policy.
    pub fn get(&self, name: &str) -> &RateLimitPolicy {
        self.named.get(name).unwrap_or(&self.default)
    }

    pub fn default_policy(&self) -> &RateLimitPolicy {
        &self.default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_limit_and_window() {
        assert!(matches!(
            RateLimitPolicy::new(0, 1_000),
            Err(RateLimitError::InvalidPolicy { .. })
        ));
        assert!(matches!(
            RateLimitPolicy::new(5, 0),
            Err(RateLimitError::InvalidPolicy { .. })
        ));
        assert!(matches!(
            RateLimitPolicy::new(5, u64::MAX),
            Err(RateLimitError::InvalidPolicy { .. })
        ));
        assert!(RateLimitPolicy::new(5, MAX_WINDOW_MS).is_ok());
        let ok = RateLimitPolicy::new(5, 1_500).unwrap();
        assert_eq!(ok.limit(), 5);
        assert_eq!(ok.window_ms(), 1_500);
    }

    #[test]
    fn deserialization_validates() {
        let policy: RateLimitPolicy =
            serde_json::from_str(r#"{"limit": 3, "windowMs": 10000}"#).unwrap();
        assert_eq!(policy.limit(), 3);
        assert_eq!(policy.window(), Duration::from_secs(10));

        let bad = serde_json::from_str::<RateLimitPolicy>(r#"{"limit": 0, "windowMs": 10000}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn unknown_names_fall_back_to_default() {
        let table = RateLimitPolicies::from_entries([
            ("default", 50, 60_000),
            ("progressWrite", 10, 1_000),
        ])
        .unwrap();
        assert_eq!(table.get("progressWrite").limit(), 10);
        assert_eq!(table.get("aiGenerate").limit(), 50);
    }

    #[test]
    fn table_reports_the_bad_entry() {
        let err = RateLimitPolicies::from_entries([("progressRead", 10, 0)]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid rate limit policy 'progressRead': windowMs must be > 0"
        );
    }
}
