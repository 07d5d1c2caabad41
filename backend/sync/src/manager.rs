//! Sync Manager: the UI-facing entry point for progress persistence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use vibestudy_core::{
    now_ms, Day, ProgressStore, ProgressWrite, SyncField, UserResolver, WriteVersion,
};

use crate::retry::RetryPolicy;
use crate::worker::{Command, SyncWorker};

/// Default sync queue capacity.
const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Writes that may wait in the queue before `sync_*` calls wait for room.
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retry: RetryPolicy::default(),
        }
    }
}

/// Terminal state of one sync operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SyncOutcome {
    /// The store now holds this value.
    Applied,
    /// The store already held a later-issued value; nothing changed.
    Stale,
    /// A later write for the same field replaced this one before dispatch.
    Superseded,
    /// No signed-in user; nothing was sent.
    Skipped,
    /// Delivery failed permanently or retries ran out.
    Failed { attempts: u32, error: String },
}

impl SyncOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, SyncOutcome::Failed { .. })
    }
}

/// Completion signal for one sync operation.
///
/// Dropping the ticket does not cancel the write.
#[derive(Debug)]
pub struct SyncTicket {
    inner: TicketState,
}

#[derive(Debug)]
enum TicketState {
    Ready(SyncOutcome),
    Pending(oneshot::Receiver<SyncOutcome>),
}

impl SyncTicket {
    fn ready(outcome: SyncOutcome) -> Self {
        Self {
            inner: TicketState::Ready(outcome),
        }
    }

    fn pending(rx: oneshot::Receiver<SyncOutcome>) -> Self {
        Self {
            inner: TicketState::Pending(rx),
        }
    }

    /// Wait for the write to reach a terminal state.
    pub async fn wait(self) -> SyncOutcome {
        match self.inner {
            TicketState::Ready(outcome) => outcome,
            TicketState::Pending(rx) => rx.await.unwrap_or_else(|_| SyncOutcome::Failed {
                attempts: 0,
                error: "sync worker stopped before the write finished".to_string(),
            }),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct SyncStats {
    enqueued: AtomicU64,
    applied: AtomicU64,
    stale: AtomicU64,
    superseded: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
}

impl SyncStats {
    pub(crate) fn record(&self, outcome: &SyncOutcome) {
        let counter = match outcome {
            SyncOutcome::Applied => &self.applied,
            SyncOutcome::Stale => &self.stale,
            SyncOutcome::Superseded => &self.superseded,
            SyncOutcome::Skipped => &self.skipped,
            SyncOutcome::Failed { .. } => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SyncStatsSnapshot {
        SyncStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatsSnapshot {
    pub enqueued: u64,
    pub applied: u64,
    pub stale: u64,
    pub superseded: u64,
    pub skipped: u64,
    pub failed: u64,
    pub retries: u64,
}

/// Serializes learner-progress mutations into remote upserts.
///
/// Must be created inside a tokio runtime: construction spawns the worker.
pub struct SyncManager {
    tx: mpsc::Sender<Command>,
    resolver: Arc<dyn UserResolver>,
    seq: AtomicU64,
    stats: Arc<SyncStats>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SyncManager {
    pub fn new(
        store: Arc<dyn ProgressStore>,
        resolver: Arc<dyn UserResolver>,
        config: SyncConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let stats = Arc::new(SyncStats::default());
        info!(
            store = store.name(),
            queue_capacity = config.queue_capacity,
            max_attempts = config.retry.max_attempts,
            "Sync manager initialized"
        );
        let worker = SyncWorker::spawn(store, config.retry, Arc::clone(&stats), rx);
        Self {
            tx,
            resolver,
            seq: AtomicU64::new(0),
            stats,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Upsert the completion flag of one task under `day`.
    pub async fn sync_task_completion(
        &self,
        day: u32,
        task_id: impl Into<String>,
        is_completed: bool,
    ) -> SyncTicket {
        let field = SyncField::TaskCompletion {
            task_id: task_id.into(),
            completed: is_completed,
        };
        self.submit(Day(day), field).await
    }

    /// Overwrite the stored code snapshot for `day`.
    pub async fn sync_code(&self, day: u32, code: impl Into<String>) -> SyncTicket {
        self.submit(Day(day), SyncField::Code { code: code.into() }).await
    }

    /// Overwrite the stored notes for `day`.
    pub async fn sync_notes(&self, day: u32, notes: impl Into<String>) -> SyncTicket {
        self.submit(Day(day), SyncField::Notes { notes: notes.into() }).await
    }

    /// Overwrite the stored recap answer for `day`.
    pub async fn sync_recap_answer(
        &self,
        day: u32,
        answer: impl Into<String>,
    ) -> SyncTicket {
        self.submit(Day(day), SyncField::RecapAnswer { answer: answer.into() }).await
    }

    /// Mark `day` complete. Completing an already completed day changes nothing.
    pub async fn sync_day_completion(&self, day: u32) -> SyncTicket {
        self.submit(Day(day), SyncField::DayCompletion).await
    }

    /// Issue a write from synchronous code without waiting for it.
    ///
    /// The write is versioned here, before the submit task is spawned, so
    /// two deferred writes to the same field keep the order of the calls
    /// however their tasks get scheduled.
    pub fn defer(self: &Arc<Self>, day: u32, field: SyncField) {
        let manager = Arc::clone(self);
        let day = Day(day);
        let version = self.next_version();
        tokio::spawn(async move {
            let _ = manager.submit_versioned(day, field, version).await;
        });
    }

    fn next_version(&self) -> WriteVersion {
        WriteVersion::new(now_ms(), self.seq.fetch_add(1, Ordering::SeqCst))
    }

    async fn submit(&self, day: Day, field: SyncField) -> SyncTicket {
        let version = self.next_version();
        self.submit_versioned(day, field, version).await
    }

    async fn submit_versioned(
        &self,
        day: Day,
        field: SyncField,
        version: WriteVersion,
    ) -> SyncTicket {
        let Some(user) = self.resolver.current_user().await else {
            debug!(day = day.0, field = %field.slot(), "No signed-in user, keeping progress local");
            self.stats.record(&SyncOutcome::Skipped);
            return SyncTicket::ready(SyncOutcome::Skipped);
        };

        let write = ProgressWrite {
            user_id: user.id,
            day,
            field,
            version,
        };
        let key = write.key();
        let (done_tx, done_rx) = oneshot::channel();

        if self.tx.send(Command::Write { write, done: done_tx }).await.is_err() {
            error!(key = %key, "Sync worker is gone, write not queued");
            let outcome = SyncOutcome::Failed {
                attempts: 0,
                error: "sync manager is shut down".to_string(),
            };
            self.stats.record(&outcome);
            return SyncTicket::ready(outcome);
        }

        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "Progress write queued");
        SyncTicket::pending(done_rx)
    }

    /// Wait until every write queued so far reached a terminal state.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush { done: done_tx }).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Stop accepting writes, deliver everything already queued and join the
    /// worker.
    pub async fn shutdown(self) {
        let SyncManager { tx, worker, .. } = self;
        drop(tx);
        if let Some(handle) = worker.into_inner() {
            if let Err(e) = handle.await {
                error!(error = %e, "Sync worker task panicked");
            }
        }
    }

    pub fn stats(&self) -> SyncStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use vibestudy_core::{DayProgress, StoreError, User, UserId, WriteAck};

    use crate::memory_store::InMemoryProgressStore;
    use crate::resolver::{SessionUserResolver, StaticUserResolver};

    fn fast_retry(max_attempts: u32) -> SyncConfig {
        SyncConfig {
            queue_capacity: 16,
            retry: RetryPolicy {
                max_attempts,
                base_delay_ms: 1,
                backoff_factor: 1.0,
                max_delay_ms: 5,
                jitter: false,
            },
        }
    }

    fn signed_in() -> Arc<dyn UserResolver> {
        Arc::new(StaticUserResolver::new(Some(User::new("learner-1"))))
    }

    #[tokio::test]
    async fn no_user_is_a_silent_noop() {
        let store = Arc::new(InMemoryProgressStore::new());
        let manager = SyncManager::new(
            store.clone(),
            Arc::new(StaticUserResolver::anonymous()),
            SyncConfig::default(),
        );

        assert_eq!(manager.sync_code(5, "print(1)").await.wait().await, SyncOutcome::Skipped);
        assert_eq!(manager.sync_notes(5, "n").await.wait().await, SyncOutcome::Skipped);
        assert_eq!(
            manager.sync_task_completion(5, "t1", true).await.wait().await,
            SyncOutcome::Skipped
        );
        assert_eq!(manager.sync_recap_answer(5, "a").await.wait().await, SyncOutcome::Skipped);
        assert_eq!(manager.sync_day_completion(5).await.wait().await, SyncOutcome::Skipped);

        manager.flush().await;
        assert_eq!(store.upsert_count(), 0);
        assert_eq!(manager.stats().skipped, 5);
    }

    #[tokio::test]
    async fn writes_reach_the_store() {
        let store = Arc::new(InMemoryProgressStore::new());
        let manager = SyncManager::new(store.clone(), signed_in(), SyncConfig::default());

        manager.sync_code(2, "let x = 1;").await;
        manager.sync_notes(2, "shadowing").await;
        manager.sync_task_completion(2, "t1", true).await;
        manager.sync_recap_answer(2, "immutability").await;
        let done = manager.sync_day_completion(2).await;
        assert_eq!(done.wait().await, SyncOutcome::Applied);
        manager.flush().await;

        let day = store.load_day(&"learner-1".into(), Day(2)).await.unwrap();
        assert_eq!(day.code.as_deref(), Some("let x = 1;"));
        assert_eq!(day.notes.as_deref(), Some("shadowing"));
        assert_eq!(day.tasks.get("t1"), Some(&true));
        assert_eq!(day.recap_answer.as_deref(), Some("immutability"));
        assert!(day.completed);
    }

    #[tokio::test]
    async fn completing_a_day_twice_is_idempotent() {
        let store = Arc::new(InMemoryProgressStore::new());
        let manager = SyncManager::new(store.clone(), signed_in(), SyncConfig::default());

        assert_eq!(manager.sync_day_completion(9).await.wait().await, SyncOutcome::Applied);
        let once = store.load_day(&"learner-1".into(), Day(9)).await.unwrap();

        let second = manager.sync_day_completion(9).await.wait().await;
        assert_eq!(second, SyncOutcome::Stale);
        let twice = store.load_day(&"learner-1".into(), Day(9)).await.unwrap();
        assert_eq!(once, twice);
    }

    /// Store whose upserts take a scripted amount of time, so completion
    /// order can be forced to differ from issue order.
    struct SlowStore {
        inner: InMemoryProgressStore,
        delays: std::sync::Mutex<VecDeque<Duration>>,
    }

    #[async_trait]
    impl ProgressStore for SlowStore {
        fn name(&self) -> &str {
            "slow"
        }
        async fn upsert(&self, write: &ProgressWrite) -> Result<WriteAck, StoreError> {
            let delay = self.delays.lock().unwrap().pop_front().unwrap_or_default();
            tokio::time::sleep(delay).await;
            self.inner.upsert(write).await
        }
        async fn load_day(&self, user_id: &UserId, day: Day) -> Result<DayProgress, StoreError> {
            self.inner.load_day(user_id, day).await
        }
    }

    #[tokio::test]
    async fn later_write_wins_even_if_earlier_finishes_last() {
        let store = Arc::new(SlowStore {
            inner: InMemoryProgressStore::new(),
            delays: std::sync::Mutex::new(VecDeque::from([Duration::from_millis(80)])),
        });
        let manager = SyncManager::new(store.clone(), signed_in(), SyncConfig::default());

        let a = manager.sync_code(1, "A").await;
        let b = manager.sync_code(1, "B").await;
        let c = manager.sync_code(1, "C").await;

        assert_eq!(a.wait().await, SyncOutcome::Applied);
        assert_eq!(b.wait().await, SyncOutcome::Superseded);
        assert_eq!(c.wait().await, SyncOutcome::Applied);

        let day = store.load_day(&"learner-1".into(), Day(1)).await.unwrap();
        assert_eq!(day.code.as_deref(), Some("C"));
        assert_eq!(store.inner.upsert_count(), 2);
    }

    #[tokio::test]
    async fn different_fields_do_not_wait_for_each_other() {
        let store = Arc::new(SlowStore {
            inner: InMemoryProgressStore::new(),
            delays: std::sync::Mutex::new(VecDeque::from([Duration::from_millis(200)])),
        });
        let manager = SyncManager::new(store.clone(), signed_in(), SyncConfig::default());

        let slow_code = manager.sync_code(1, "slow").await;
        let notes = manager.sync_notes(1, "fast").await;
        let notes_outcome = tokio::time::timeout(Duration::from_millis(150), notes.wait())
            .await
            .expect("notes should not queue behind code");
        assert_eq!(notes_outcome, SyncOutcome::Applied);
        assert_eq!(slow_code.wait().await, SyncOutcome::Applied);
    }

    /// Fails a scripted number of times before delegating.
    struct FlakyStore {
        inner: InMemoryProgressStore,
        failures_left: AtomicUsize,
        permanent: bool,
    }

    #[async_trait]
    impl ProgressStore for FlakyStore {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn upsert(&self, write: &ProgressWrite) -> Result<WriteAck, StoreError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(if self.permanent {
                    StoreError::permanent("401 unauthorized")
                } else {
                    StoreError::transient("connection reset")
                });
            }
            self.inner.upsert(write).await
        }
        async fn load_day(&self, user_id: &UserId, day: Day) -> Result<DayProgress, StoreError> {
            self.inner.load_day(user_id, day).await
        }
    }

    fn flaky(failures: usize, permanent: bool) -> Arc<FlakyStore> {
        Arc::new(FlakyStore {
            inner: InMemoryProgressStore::new(),
            failures_left: AtomicUsize::new(failures),
            permanent,
        })
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let store = flaky(2, false);
        let manager = SyncManager::new(store.clone(), signed_in(), fast_retry(3));

        let outcome = manager.sync_notes(4, "traits").await.wait().await;
        assert_eq!(outcome, SyncOutcome::Applied);
        assert_eq!(manager.stats().retries, 2);

        let day = store.load_day(&"learner-1".into(), Day(4)).await.unwrap();
        assert_eq!(day.notes.as_deref(), Some("traits"));
    }

    #[tokio::test]
    async fn exhausted_retries_report_failure() {
        let store = flaky(10, false);
        let manager = SyncManager::new(store.clone(), signed_in(), fast_retry(3));

        match manager.sync_notes(4, "lost").await.wait().await {
            SyncOutcome::Failed { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(manager.stats().failed, 1);
    }

    #[tokio::test]
    async fn parked_write_cuts_retry_backoff_short() {
        let store = flaky(1, false);
        let mut config = fast_retry(5);
        config.retry.base_delay_ms = 30_000;
        config.retry.max_delay_ms = 30_000;
        let manager = SyncManager::new(store.clone(), signed_in(), config);

        let first = manager.sync_notes(4, "draft").await;
        let second = manager.sync_notes(4, "final").await;

        let (first, second) = tokio::time::timeout(Duration::from_secs(2), async {
            (first.wait().await, second.wait().await)
        })
        .await
        .expect("parked write should not wait out the backoff");
        assert_eq!(first, SyncOutcome::Superseded);
        assert_eq!(second, SyncOutcome::Applied);
        assert_eq!(manager.stats().retries, 0);

        let day = store.load_day(&"learner-1".into(), Day(4)).await.unwrap();
        assert_eq!(day.notes.as_deref(), Some("final"));
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let store = flaky(1, true);
        let manager = SyncManager::new(store.clone(), signed_in(), fast_retry(5));

        let outcome = manager.sync_code(4, "x").await.wait().await;
        assert!(outcome.is_failure());
        assert_eq!(manager.stats().retries, 0);
        assert_eq!(store.failures_left.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn session_changes_apply_to_later_writes() {
        let store = Arc::new(InMemoryProgressStore::new());
        let session = Arc::new(SessionUserResolver::new());
        let manager = SyncManager::new(store.clone(), session.clone(), SyncConfig::default());

        assert_eq!(manager.sync_code(1, "offline").await.wait().await, SyncOutcome::Skipped);
        session.sign_in(User::new("learner-2")).await;
        assert_eq!(manager.sync_code(1, "online").await.wait().await, SyncOutcome::Applied);

        let day = store.load_day(&"learner-2".into(), Day(1)).await.unwrap();
        assert_eq!(day.code.as_deref(), Some("online"));
    }

    #[tokio::test]
    async fn deferred_writes_land_after_flush() {
        let store = Arc::new(InMemoryProgressStore::new());
        let manager = Arc::new(SyncManager::new(store.clone(), signed_in(), SyncConfig::default()));

        manager.defer(6, SyncField::RecapAnswer { answer: "lifetimes".into() });
        // The deferred submit runs on its own task; wait until it was queued.
        while manager.stats().enqueued == 0 {
            tokio::task::yield_now().await;
        }
        manager.flush().await;

        let day = store.load_day(&"learner-1".into(), Day(6)).await.unwrap();
        assert_eq!(day.recap_answer.as_deref(), Some("lifetimes"));
    }

    /// Resolves the user slowly on the first call only.
    struct StallingResolver {
        stalled: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl UserResolver for StallingResolver {
        async fn current_user(&self) -> Option<User> {
            if !self.stalled.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Some(User::new("learner-1"))
        }
    }

    #[tokio::test]
    async fn deferred_writes_keep_call_order() {
        let store = Arc::new(InMemoryProgressStore::new());
        let resolver = Arc::new(StallingResolver {
            stalled: std::sync::atomic::AtomicBool::new(false),
        });
        let manager = Arc::new(SyncManager::new(store.clone(), resolver, SyncConfig::default()));

        // The first call's task stalls in user resolution, so the second
        // reaches the worker first.
        manager.defer(1, SyncField::Code { code: "A".into() });
        manager.defer(1, SyncField::Code { code: "B".into() });
        while manager.stats().enqueued < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        manager.flush().await;

        let day = store.load_day(&"learner-1".into(), Day(1)).await.unwrap();
        assert_eq!(day.code.as_deref(), Some("B"));
        let stats = manager.stats();
        assert_eq!(stats.applied, 1);
        assert_eq!(stats.stale + stats.superseded, 1);
    }

    #[tokio::test]
    async fn shutdown_drains_queued_writes() {
        let store = Arc::new(InMemoryProgressStore::new());
        let manager = SyncManager::new(store.clone(), signed_in(), SyncConfig::default());

        let ticket = manager.sync_task_completion(3, "t7", true).await;
        manager.shutdown().await;

        assert_eq!(ticket.wait().await, SyncOutcome::Applied);
        let day = store.load_day(&"learner-1".into(), Day(3)).await.unwrap();
        assert_eq!(day.tasks.get("t7"), Some(&true));
    }
}
