//! SQLite-backed counter store.
//!
//! Every gateway process that opens the same database file shares the same
//! buckets. Each hit is one `INSERT .. ON CONFLICT .. RETURNING` statement, so
//! the read-modify-write happens inside SQLite's write lock and two processes
//! can never both observe the same count.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::store::{BucketState, CounterStore};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS rate_buckets (
    bucket          TEXT PRIMARY KEY,
    count           INTEGER NOT NULL,
    window_start_ms INTEGER NOT NULL,
    window_ms       INTEGER NOT NULL
);";

const HIT_SQL: &str = "INSERT INTO rate_buckets (bucket, count, window_start_ms, window_ms)
VALUES (?1, 1, ?2, ?3)
ON CONFLICT(bucket) DO UPDATE SET
    count = CASE
        WHEN ?2 - rate_buckets.window_start_ms >= rate_buckets.window_ms
          OR rate_buckets.window_ms != ?3 THEN 1
        ELSE rate_buckets.count + 1
    END,
    window_start_ms = CASE
        WHEN ?2 - rate_buckets.window_start_ms >= rate_buckets.window_ms
          OR rate_buckets.window_ms != ?3 THEN ?2
        ELSE rate_buckets.window_start_ms
    END,
    window_ms = ?3
RETURNING count, window_start_ms, window_ms";

pub struct SqliteCounterStore {
    conn: Mutex<Connection>,
}

impl SqliteCounterStore {
    /// Create or open the counter database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .context("Failed to open SQLite rate limit database")?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("Failed to set SQLite busy timeout")?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .context("Failed to enable WAL journal")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize rate_buckets schema")?;

        info!(path = %path.as_ref().display(), "SqliteCounterStore opened");
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an in-memory database (for tests).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

#[async_trait]
impl CounterStore for SqliteCounterStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn hit(&self, key: &str, window_ms: u64, now_ms: i64) -> Result<BucketState> {
        let conn = self.conn.lock().await;
        let (count, window_start_ms, window_ms): (i64, i64, i64) = conn
            .query_row(HIT_SQL, params![key, now_ms, window_ms as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .with_context(|| format!("Failed to record hit for bucket {key}"))?;

        Ok(BucketState {
            count: u32::try_from(count).unwrap_or(u32::MAX),
            window_start_ms,
            window_ms: window_ms.max(0) as u64,
        })
    }

    async fn purge_expired(&self, now_ms: i64) -> Result<usize> {
        let conn = self.conn.lock().await;
        let removed = conn
            .execute(
                "DELETE FROM rate_buckets WHERE ?1 - window_start_ms >= window_ms",
                params![now_ms],
            )
            .context("Failed to purge expired buckets")?;
        if removed > 0 {
            debug!(removed, "Purged expired rate limit buckets");
        }
        Ok(removed)
    }

    async fn len(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM rate_buckets", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }
}
