use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{Day, DayProgress, ProgressWrite, User, UserId, WriteAck};

/// Resolves the learner the current process is acting for.
///
/// `None` means local-only mode: nobody is signed in and progress stays on
/// the device. That is an expected state, not an error.
#[async_trait]
pub trait UserResolver: Send + Sync {
    async fn current_user(&self) -> Option<User>;
}

/// Remote persistence for learner progress.
///
/// Writes are upserts keyed by `(user_id, day, field)`. Implementations must
/// compare [`WriteVersion`](crate::WriteVersion)s and keep the newer one, so a
/// write that arrives late never overwrites a later-issued value.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Backend name used in logs (e.g. "sqlite", "remote").
    fn name(&self) -> &str;

    /// Apply a write if it is newer than what the store holds for its key.
    async fn upsert(&self, write: &ProgressWrite) -> Result<WriteAck, StoreError>;

    /// Read everything stored for one learner and day.
    async fn load_day(&self, user_id: &UserId, day: Day) -> Result<DayProgress, StoreError>;
}
