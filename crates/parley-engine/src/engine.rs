//! The Engine: owner of the durable stores and the apply/ignore decision.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::mpsc;

use parley_core::Message;
use parley_store::{HistoryStack, StateCell, StoreError, SyncQueue};

use crate::error::{EngineError, Result};
use crate::manager::Manager;

/// Queue database filename inside the data directory.
pub const QUEUE_FILENAME: &str = "queue.db";

/// History database filename inside the data directory.
pub const HISTORY_FILENAME: &str = "history.db";

/// State database filename inside the data directory.
pub const STATE_FILENAME: &str = "state.db";

/// A snapshot of the engine's internals, taken under the engine lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Status {
    /// Messages waiting for remote acknowledgment.
    pub queue_size: u64,
    /// Applied messages retained for conflict arbitration.
    pub history_size: u64,
    /// The cumulative state counter.
    pub state: u64,
}

struct Stores {
    queue: SyncQueue,
    history: HistoryStack,
    state: StateCell,
}

/// The synchronization orchestrator.
///
/// Owns the outbound queue, the history stack, and the state counter as a
/// single logical unit: every public mutating operation holds one lock for
/// its full duration, so at most one apply decision is in flight
/// system-wide. There is deliberately no rollback across the three stores;
/// if a later step fails after an earlier one succeeded, the only safe
/// response is a full shutdown, and that is what happens.
pub struct Engine {
    manager: Arc<dyn Manager>,
    stores: Mutex<Stores>,
    shutdown_tx: mpsc::Sender<EngineError>,
}

impl Engine {
    /// Open (or create) the three stores inside `data_dir`.
    ///
    /// `shutdown_tx` is the process-wide shutdown channel; any fatal
    /// condition inside the engine or a component lands there.
    pub fn open(
        manager: Arc<dyn Manager>,
        data_dir: impl AsRef<Path>,
        shutdown_tx: mpsc::Sender<EngineError>,
    ) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)
            .map_err(|e| EngineError::Store(format!("creating {}: {e}", data_dir.display())))?;

        let queue = SyncQueue::open(data_dir.join(QUEUE_FILENAME))?;
        let history = HistoryStack::open(data_dir.join(HISTORY_FILENAME))?;
        let state = StateCell::open(data_dir.join(STATE_FILENAME))?;

        Ok(Self {
            manager,
            stores: Mutex::new(Stores {
                queue,
                history,
                state,
            }),
            shutdown_tx,
        })
    }

    /// Open with in-memory stores. Useful for testing.
    pub fn open_memory(
        manager: Arc<dyn Manager>,
        shutdown_tx: mpsc::Sender<EngineError>,
    ) -> Result<Self> {
        Ok(Self {
            manager,
            stores: Mutex::new(Stores {
                queue: SyncQueue::open_memory()?,
                history: HistoryStack::open_memory()?,
                state: StateCell::open_memory()?,
            }),
            shutdown_tx,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Stores>> {
        self.stores
            .lock()
            .map_err(|_| EngineError::Store("engine lock poisoned".into()))
    }

    /// Convert a store failure into a fatal condition: log it, push it onto
    /// the shutdown channel, and hand the error back to the caller.
    fn fatal<T>(&self, result: std::result::Result<T, StoreError>) -> Result<T> {
        result.map_err(|store_err| {
            let err = EngineError::from(store_err);
            tracing::warn!(error = %err, "store mutation failed, shutting down");
            self.shutdown(err.clone());
            err
        })
    }

    /// Accept a newly created local message: apply it through the manager,
    /// advance the state counter (stamping `msg.state_at`), queue it for
    /// remote sync, and record it in history.
    ///
    /// Any failure at any step is fatal. The steps are not transactional
    /// across the three stores; a partial failure leaves them inconsistent,
    /// which is exactly why the process blows itself up rather than
    /// continue.
    pub fn handle_new_message(&self, msg: &mut Message) -> Result<()> {
        let stores = self.lock()?;

        tracing::debug!(id = %msg.id, "processing a new local message");
        if let Err(manager_err) = self.manager.process(msg, false) {
            let err = EngineError::from(manager_err);
            tracing::warn!(error = %err, "manager failed to process a local message");
            self.shutdown(err.clone());
            return Err(err);
        }

        self.fatal(stores.state.update(msg))?;
        self.fatal(stores.queue.enqueue(msg))?;
        self.fatal(stores.history.push(msg))?;

        Ok(())
    }

    /// Accept a message from a remote peer, deciding whether it should be
    /// applied here.
    ///
    /// If our state counter equals the message's `state_at`, the remote's
    /// view was identical to ours when it produced the message and no
    /// conflict is possible: apply automatically. Otherwise the peers have
    /// diverged and the manager arbitrates, reading our history through a
    /// locked iterator.
    ///
    /// The state counter advances whether or not the message is applied
    /// (we *observed* it either way); history records only messages we
    /// actually applied, because it exists to explain things we did, not
    /// things we skipped.
    pub fn handle_remote_message(&self, msg: &mut Message) -> Result<()> {
        let stores = self.lock()?;

        tracing::debug!(id = %msg.id, "handling a remote message");
        let current = self.fatal(stores.state.current())?;

        let should_apply = if current == msg.state_at {
            tracing::debug!("local and remote state agree, applying");
            true
        } else {
            let mut history = self.fatal(stores.history.iter())?;
            let verdict = self.manager.should_process(msg, &mut history);
            tracing::debug!(verdict, "states diverged, manager arbitrated");
            verdict
        };

        if should_apply {
            if let Err(manager_err) = self.manager.process(msg, true) {
                let err = EngineError::from(manager_err);
                tracing::warn!(error = %err, "manager failed to process a remote message");
                self.shutdown(err.clone());
                return Err(err);
            }
        }

        self.fatal(stores.state.update(msg))?;

        if should_apply {
            self.fatal(stores.history.push(msg))?;
        }

        Ok(())
    }

    /// Compare a remote peer's reported state counter with our own.
    ///
    /// Equal counters prove convergence: nothing is left to arbitrate, so
    /// any retained history is cleared. Returns `true` when the peers have
    /// diverged.
    pub fn check_remote_state(&self, remote_state: u64) -> Result<bool> {
        let stores = self.lock()?;

        let current = self.fatal(stores.state.current())?;
        if remote_state != current {
            return Ok(true);
        }

        if self.fatal(stores.history.size())? > 0 {
            tracing::info!("peers are aligned, clearing history");
            self.fatal(stores.history.clear())?;
        }

        Ok(false)
    }

    /// Look at the next outbound message without removing it.
    ///
    /// A read failure here is reported to the caller, not escalated: the
    /// stores were not mutated, so the peer can simply be told something is
    /// wrong.
    pub fn peek_outbound(&self) -> Result<Option<Message>> {
        let stores = self.lock()?;
        stores.queue.peek().map_err(EngineError::from)
    }

    /// Remove the head of the outbound queue after the remote peer
    /// acknowledged it.
    ///
    /// The caller decides what a failure means; by the time an
    /// acknowledgment arrives, the remote has already applied the message,
    /// so a dequeue failure leaves the peers unrecoverably diverged.
    pub fn ack_outbound(&self) -> Result<Option<Message>> {
        let stores = self.lock()?;
        stores.queue.dequeue().map_err(EngineError::from)
    }

    /// Snapshot of the engine's internals.
    pub fn status(&self) -> Result<Status> {
        let stores = self.lock()?;
        Ok(Status {
            queue_size: stores.queue.size()?,
            history_size: stores.history.size()?,
            state: stores.state.current()?,
        })
    }

    /// Trigger a process-wide shutdown with the given error.
    ///
    /// Components use this when they hit an unrecoverable condition; the
    /// node's `listen` loop picks the error up, stops every component, and
    /// returns it. Only the first error wins; later ones are dropped.
    pub fn shutdown(&self, err: EngineError) {
        tracing::warn!(error = %err, "engine shutting down");
        let _ = self.shutdown_tx.try_send(err);
    }
}
