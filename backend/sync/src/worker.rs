//! Background sync worker.
//!
//! Owns all per-key state, so no locks are needed around it. Each key has at
//! most one write in flight and at most one parked behind it; a newer write
//! for a busy key replaces the parked one. Delivery runs on its own task and
//! reports back over the completion channel. Parking a write stops the
//! in-flight write from retrying: once its current attempt fails it resolves
//! as superseded and the parked write goes out.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, error, info};

use vibestudy_core::{FieldKey, ProgressStore, ProgressWrite, WriteAck, WriteVersion};

use crate::manager::{SyncOutcome, SyncStats};
use crate::retry::{RetryPolicy, RetryState};

pub(crate) enum Command {
    Write {
        write: ProgressWrite,
        done: oneshot::Sender<SyncOutcome>,
    },
    Flush {
        done: oneshot::Sender<()>,
    },
}

struct Queued {
    write: ProgressWrite,
    done: oneshot::Sender<SyncOutcome>,
}

/// A key with a write in flight.
struct Slot {
    in_flight: WriteVersion,
    parked: Option<Queued>,
    preempt: Arc<Notify>,
}

struct Completion {
    key: FieldKey,
    outcome: SyncOutcome,
    done: oneshot::Sender<SyncOutcome>,
}

pub(crate) struct SyncWorker {
    store: Arc<dyn ProgressStore>,
    retry: RetryPolicy,
    stats: Arc<SyncStats>,
    slots: HashMap<FieldKey, Slot>,
    flush_waiters: Vec<oneshot::Sender<()>>,
    completion_tx: mpsc::UnboundedSender<Completion>,
}

impl SyncWorker {
    pub(crate) fn spawn(
        store: Arc<dyn ProgressStore>,
        retry: RetryPolicy,
        stats: Arc<SyncStats>,
        rx: mpsc::Receiver<Command>,
    ) -> tokio::task::JoinHandle<()> {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let worker = SyncWorker {
            store,
            retry,
            stats,
            slots: HashMap::new(),
            flush_waiters: Vec::new(),
            completion_tx,
        };
        tokio::spawn(worker.run(rx, completion_rx))
    }

    async fn run(
        mut self,
        mut rx: mpsc::Receiver<Command>,
        mut completion_rx: mpsc::UnboundedReceiver<Completion>,
    ) {
        info!(store = self.store.name(), "Sync worker started");
        let mut accepting = true;

        loop {
            if !accepting && self.slots.is_empty() {
                break;
            }
            tokio::select! {
                cmd = rx.recv(), if accepting => match cmd {
                    Some(Command::Write { write, done }) => self.accept(write, done),
                    Some(Command::Flush { done }) => self.flush_waiters.push(done),
                    None => {
                        debug!(in_flight = self.slots.len(), "Sync queue closed, draining");
                        accepting = false;
                    }
                },
                Some(completion) = completion_rx.recv() => self.complete(completion),
            }
            if self.slots.is_empty() {
                for waiter in self.flush_waiters.drain(..) {
                    let _ = waiter.send(());
                }
            }
        }

        info!("Sync worker stopped");
    }

    fn accept(&mut self, write: ProgressWrite, done: oneshot::Sender<SyncOutcome>) {
        let key = write.key();
        let Some(slot) = self.slots.get_mut(&key) else {
            self.dispatch(key, Queued { write, done });
            return;
        };

        // Issued before the write already on its way: it can never win.
        if write.version <= slot.in_flight {
            debug!(key = %key, "Dropping write older than in-flight write");
            self.stats.record(&SyncOutcome::Superseded);
            let _ = done.send(SyncOutcome::Superseded);
            return;
        }

        let incoming = Queued { write, done };
        let loser = match slot.parked.take() {
            Some(parked) if parked.write.version > incoming.write.version => {
                slot.parked = Some(parked);
                incoming
            }
            Some(parked) => {
                slot.parked = Some(incoming);
                parked
            }
            None => {
                slot.parked = Some(incoming);
                slot.preempt.notify_one();
                return;
            }
        };
        debug!(key = %key, "Coalesced parked write");
        self.stats.record(&SyncOutcome::Superseded);
        let _ = loser.done.send(SyncOutcome::Superseded);
    }

    fn dispatch(&mut self, key: FieldKey, queued: Queued) {
        let preempt = Arc::new(Notify::new());
        self.slots.insert(
            key.clone(),
            Slot {
                in_flight: queued.write.version,
                parked: None,
                preempt: Arc::clone(&preempt),
            },
        );

        let store = Arc::clone(&self.store);
        let retry = self.retry.clone();
        let stats = Arc::clone(&self.stats);
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let outcome = deliver(store.as_ref(), &queued.write, &retry, &stats, &preempt).await;
            let _ = completion_tx.send(Completion {
                key,
                outcome,
                done: queued.done,
            });
        });
    }

    fn complete(&mut self, completion: Completion) {
        let Completion { key, outcome, done } = completion;
        self.stats.record(&outcome);
        let _ = done.send(outcome);

        let parked = self.slots.get_mut(&key).and_then(|slot| slot.parked.take());
        match parked {
            Some(next) => self.dispatch(key, next),
            None => {
                self.slots.remove(&key);
            }
        }
    }
}

/// Upsert one write, retrying transient failures per `policy` until
/// `preempt` fires.
async fn deliver(
    store: &dyn ProgressStore,
    write: &ProgressWrite,
    policy: &RetryPolicy,
    stats: &SyncStats,
    preempt: &Notify,
) -> SyncOutcome {
    let mut state = RetryState::default();
    loop {
        match store.upsert(write).await {
            Ok(WriteAck::Applied) => {
                debug!(key = %write.key(), attempts = state.attempt + 1, "Progress write applied");
                return SyncOutcome::Applied;
            }
            Ok(WriteAck::Stale) => {
                debug!(key = %write.key(), "Store holds a newer value");
                return SyncOutcome::Stale;
            }
            Err(e) if e.is_transient() => match state.record_failure(policy, &e.to_string()) {
                Some(delay) => {
                    tokio::select! {
                        _ = preempt.notified() => {
                            debug!(key = %write.key(), error = %e, "Newer write parked, dropping retry");
                            return SyncOutcome::Superseded;
                        }
                        _ = tokio::time::sleep(delay) => stats.record_retry(),
                    }
                }
                None => {
                    error!(
                        key = %write.key(),
                        store = store.name(),
                        attempts = state.attempt,
                        error = %e,
                        "Dropping progress write after exhausting retries"
                    );
                    return SyncOutcome::Failed {
                        attempts: state.attempt,
                        error: e.to_string(),
                    };
                }
            },
            Err(e) => {
                error!(
                    key = %write.key(),
                    store = store.name(),
                    error = %e,
                    "Progress write rejected"
                );
                return SyncOutcome::Failed {
                    attempts: state.attempt + 1,
                    error: e.to_string(),
                };
            }
        }
    }
}
