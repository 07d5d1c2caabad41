use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use vibestudy_core::{
    Day, DayProgress, FieldKey, FieldSlot, ProgressStore, ProgressWrite, StoreError, SyncField,
    UserId, WriteAck, WriteVersion,
};

#[derive(Debug, Clone)]
struct StoredField {
    field: SyncField,
    version: WriteVersion,
    stored_at: DateTime<Utc>,
}

/// Progress store kept in process memory. Useful for tests and for running
/// the manager without any backend.
#[derive(Debug, Default)]
pub struct InMemoryProgressStore {
    fields: RwLock<HashMap<FieldKey, StoredField>>,
    upserts: AtomicUsize,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of upsert calls received, applied or not.
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert(&self, write: &ProgressWrite) -> Result<WriteAck, StoreError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let key = write.key();
        let mut fields = self.fields.write().await;

        if let Some(existing) = fields.get(&key) {
            let keep_existing = match key.slot {
                // The first completion stands.
                FieldSlot::DayCompletion => true,
                _ => existing.version >= write.version,
            };
            if keep_existing {
                return Ok(WriteAck::Stale);
            }
        }

        fields.insert(
            key,
            StoredField {
                field: write.field.clone(),
                version: write.version,
                stored_at: Utc::now(),
            },
        );
        Ok(WriteAck::Applied)
    }

    async fn load_day(&self, user_id: &UserId, day: Day) -> Result<DayProgress, StoreError> {
        let fields = self.fields.read().await;
        let mut progress = DayProgress::empty(day);
        for (key, stored) in fields.iter() {
            if &key.user_id == user_id && key.day == day {
                progress.absorb(&stored.field, stored.stored_at);
            }
        }
        Ok(progress)
    }
}
