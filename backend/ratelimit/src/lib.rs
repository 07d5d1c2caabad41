//! Request admission control for VibeStudy API routes.
//!
//! A [`RateLimiter`] counts events per bucket key in fixed windows and
//! answers allow/deny for each call. Counters live behind the
//! [`CounterStore`] trait so a single process can use the in-memory map while
//! several gateway processes share a SQLite file.

pub mod limiter;
pub mod policy;
pub mod request;
pub mod sqlite_store;
pub mod store;

pub use limiter::{spawn_sweeper, EvaluateOptions, RateLimitDecision, RateLimiter};
pub use policy::{MAX_WINDOW_MS, RateLimitError, RateLimitPolicies, RateLimitPolicy};
pub use request::{ClientRequest, RequestKey};
pub use sqlite_store::SqliteCounterStore;
pub use store::{BucketState, CounterStore, InMemoryCounterStore};
