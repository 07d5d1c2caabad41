//! Cross-device learner progress synchronization.
//!
//! UI actions call the [`SyncManager`]'s `sync_*` operations. Each resolves
//! the signed-in learner, stamps the mutation with a [`WriteVersion`] and
//! hands it to a background worker that upserts it into a
//! [`ProgressStore`], retrying transient failures with backoff.
//!
//! [`WriteVersion`]: vibestudy_core::WriteVersion
//! [`ProgressStore`]: vibestudy_core::ProgressStore

pub mod manager;
pub mod memory_store;
pub mod remote;
pub mod resolver;
pub mod retry;
pub mod sqlite_store;
mod worker;

pub use manager::{SyncConfig, SyncManager, SyncOutcome, SyncStatsSnapshot, SyncTicket};
pub use memory_store::InMemoryProgressStore;
pub use remote::RemoteProgressStore;
pub use resolver::{SessionUserResolver, StaticUserResolver};
pub use retry::{RetryPolicy, RetryState};
pub use sqlite_store::SqliteProgressStore;
