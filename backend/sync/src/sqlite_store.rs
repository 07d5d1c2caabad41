//! SQLite-backed durable progress store.
//!
//! One row per `(user_id, day, field)`. The upsert's `WHERE` clause compares
//! write versions inside the statement, so a late-arriving older write is
//! dropped by SQLite itself and reported as [`WriteAck::Stale`].

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use vibestudy_core::{
    Day, DayProgress, FieldSlot, ProgressStore, ProgressWrite, StoreError, SyncField, UserId,
    WriteAck,
};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS progress_fields (
    user_id      TEXT NOT NULL,
    day          INTEGER NOT NULL,
    field        TEXT NOT NULL,
    value_json   TEXT NOT NULL,
    issued_at_ms INTEGER NOT NULL,
    seq          INTEGER NOT NULL,
    updated_at   TEXT NOT NULL,
    PRIMARY KEY (user_id, day, field)
);
CREATE INDEX IF NOT EXISTS idx_progress_user_day ON progress_fields(user_id, day);";

const UPSERT_SQL: &str = "INSERT INTO progress_fields
    (user_id, day, field, value_json, issued_at_ms, seq, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT(user_id, day, field) DO UPDATE SET
    value_json = excluded.value_json,
    issued_at_ms = excluded.issued_at_ms,
    seq = excluded.seq,
    updated_at = excluded.updated_at
WHERE (excluded.issued_at_ms, excluded.seq)
    > (progress_fields.issued_at_ms, progress_fields.seq)";

const COMPLETE_DAY_SQL: &str = "INSERT INTO progress_fields
    (user_id, day, field, value_json, issued_at_ms, seq, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT(user_id, day, field) DO NOTHING";

pub struct SqliteProgressStore {
    conn: Mutex<Connection>,
}

impl SqliteProgressStore {
    /// Create or open the progress database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .context("Failed to open SQLite progress database")?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("Failed to set SQLite busy timeout")?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .context("Failed to enable WAL journal")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize progress schema")?;

        info!(path = %path.as_ref().display(), "SqliteProgressStore opened");
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an in-memory database (for tests).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

/// Busy/locked/IO conditions may clear on retry; anything else will not.
fn classify(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(
                e.code,
                ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::DiskFull
                    | ErrorCode::CannotOpen
            ) =>
        {
            StoreError::transient(err.to_string())
        }
        _ => StoreError::permanent(err.to_string()),
    }
}

#[async_trait]
impl ProgressStore for SqliteProgressStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn upsert(&self, write: &ProgressWrite) -> Result<WriteAck, StoreError> {
        let value_json = serde_json::to_string(&write.field)
            .map_err(|e| StoreError::permanent(format!("unserializable field: {e}")))?;
        let slot = write.field.slot();
        let sql = match slot {
            FieldSlot::DayCompletion => COMPLETE_DAY_SQL,
            _ => UPSERT_SQL,
        };

        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                sql,
                params![
                    write.user_id.as_str(),
                    write.day.0,
                    slot.to_string(),
                    value_json,
                    write.version.issued_at_ms,
                    write.version.seq as i64,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(classify)?;

        let ack = if changed > 0 { WriteAck::Applied } else { WriteAck::Stale };
        debug!(
            user_id = %write.user_id,
            day = write.day.0,
            field = %slot,
            ?ack,
            "Progress upsert"
        );
        Ok(ack)
    }

    async fn load_day(&self, user_id: &UserId, day: Day) -> Result<DayProgress, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT field, value_json, updated_at FROM progress_fields
                 WHERE user_id = ?1 AND day = ?2",
            )
            .map_err(classify)?;

        let rows: Vec<(String, String, String)> = stmt
            .query_map(params![user_id.as_str(), day.0], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .map_err(classify)?
            .filter_map(|r| r.ok())
            .collect();

        let mut progress = DayProgress::empty(day);
        for (field, value_json, updated_at) in rows {
            let parsed: Option<(SyncField, DateTime<Utc>)> = serde_json::from_str(&value_json)
                .ok()
                .zip(
                    DateTime::parse_from_rfc3339(&updated_at)
                        .ok()
                        .map(|t| t.with_timezone(&Utc)),
                );
            match parsed {
                Some((value, stored_at)) => progress.absorb(&value, stored_at),
                None => warn!(user_id = %user_id, day = day.0, field, "Skipping unreadable progress row"),
            }
        }
        Ok(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vibestudy_core::WriteVersion;

    fn write(field: SyncField, issued_at_ms: i64, seq: u64) -> ProgressWrite {
        ProgressWrite {
            user_id: "learner".into(),
            day: Day(7),
            field,
            version: WriteVersion::new(issued_at_ms, seq),
        }
    }

    #[tokio::test]
    async fn newer_version_wins_regardless_of_arrival() {
        let store = SqliteProgressStore::in_memory().expect("in-memory db");
        let a = write(SyncField::Code { code: "print('a')".into() }, 1_000, 1);
        let b = write(SyncField::Code { code: "print('b')".into() }, 1_000, 2);

        // B lands first, A arrives late.
        assert_eq!(store.upsert(&b).await.unwrap(), WriteAck::Applied);
        assert_eq!(store.upsert(&a).await.unwrap(), WriteAck::Stale);

        let day = store.load_day(&"learner".into(), Day(7)).await.unwrap();
        assert_eq!(day.code.as_deref(), Some("print('b')"));
    }

    #[tokio::test]
    async fn completing_twice_is_idempotent() {
        let store = SqliteProgressStore::in_memory().unwrap();
        store.upsert(&write(SyncField::DayCompletion, 10, 1)).await.unwrap();
        let once = store.load_day(&"learner".into(), Day(7)).await.unwrap();

        let again = store.upsert(&write(SyncField::DayCompletion, 20, 2)).await.unwrap();
        assert_eq!(again, WriteAck::Stale);
        let twice = store.load_day(&"learner".into(), Day(7)).await.unwrap();
        assert_eq!(once, twice);
        assert!(twice.completed);
    }

    #[tokio::test]
    async fn tasks_are_tracked_per_id() {
        let store = SqliteProgressStore::in_memory().unwrap();
        let done = |id: &str, completed, seq| {
            write(
                SyncField::TaskCompletion { task_id: id.into(), completed },
                100,
                seq,
            )
        };
        store.upsert(&done("t1", true, 1)).await.unwrap();
        store.upsert(&done("t2", true, 2)).await.unwrap();
        store.upsert(&done("t1", false, 3)).await.unwrap();

        let day = store.load_day(&"learner".into(), Day(7)).await.unwrap();
        assert_eq!(day.tasks.get("t1"), Some(&false));
        assert_eq!(day.tasks.get("t2"), Some(&true));
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.db");
        {
            let store = SqliteProgressStore::open(&path).unwrap();
            store
                .upsert(&write(SyncField::RecapAnswer { answer: "closures".into() }, 1, 1))
                .await
                .unwrap();
        }
        let store = SqliteProgressStore::open(&path).unwrap();
        let day = store.load_day(&"learner".into(), Day(7)).await.unwrap();
        assert_eq!(day.recap_answer.as_deref(), Some("closures"));
    }
}
