//! Fixtures for setting up engines and scripted managers in tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use parley_core::{Message, MessageId};
use parley_engine::{Engine, EngineError, Manager};
use parley_store::HistoryIter;
use tokio::sync::mpsc;

/// A manager that applies everything and records what it saw.
///
/// `verdict` controls the arbitration answer when peers have diverged;
/// `fail_process` makes every apply report an unrecoverable error.
pub struct ScriptedManager {
    /// Payloads handed to `process`, in call order.
    pub applied: Mutex<Vec<Vec<u8>>>,
    /// Number of `should_process` calls.
    pub arbitrations: AtomicUsize,
    /// Answer returned by `should_process`.
    pub verdict: bool,
    /// Whether `process` fails.
    pub fail_process: bool,
}

impl ScriptedManager {
    /// A manager that applies everything.
    pub fn permissive() -> Arc<Self> {
        Arc::new(Self {
            applied: Mutex::new(Vec::new()),
            arbitrations: AtomicUsize::new(0),
            verdict: true,
            fail_process: false,
        })
    }

    /// A manager that refuses diverged messages.
    pub fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            applied: Mutex::new(Vec::new()),
            arbitrations: AtomicUsize::new(0),
            verdict: false,
            fail_process: false,
        })
    }

    /// A manager whose `process` always fails.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            applied: Mutex::new(Vec::new()),
            arbitrations: AtomicUsize::new(0),
            verdict: true,
            fail_process: true,
        })
    }

    /// Payloads applied so far.
    pub fn applied_payloads(&self) -> Vec<Vec<u8>> {
        self.applied.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Manager for ScriptedManager {
    fn process(&self, msg: &Message, _from_remote: bool) -> anyhow::Result<()> {
        if self.fail_process {
            anyhow::bail!("scripted failure");
        }
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(msg.payload.to_vec());
        Ok(())
    }

    fn should_process(&self, _msg: &Message, _history: &mut HistoryIter<'_>) -> bool {
        self.arbitrations.fetch_add(1, Ordering::SeqCst);
        self.verdict
    }
}

/// An engine plus its shutdown channel and the manager driving it.
pub struct TestEngine {
    pub engine: Arc<Engine>,
    pub manager: Arc<ScriptedManager>,
    pub shutdown_rx: mpsc::Receiver<EngineError>,
    /// Keeps the data directory alive for on-disk engines.
    _tempdir: Option<tempfile::TempDir>,
}

impl TestEngine {
    /// An in-memory engine with a permissive manager.
    pub fn in_memory() -> Self {
        Self::with_manager(ScriptedManager::permissive())
    }

    /// An in-memory engine with the given manager.
    pub fn with_manager(manager: Arc<ScriptedManager>) -> Self {
        let (tx, shutdown_rx) = mpsc::channel(1);
        let engine = Engine::open_memory(Arc::clone(&manager) as Arc<dyn Manager>, tx)
            .unwrap_or_else(|e| panic!("opening in-memory engine: {e}"));
        Self {
            engine: Arc::new(engine),
            manager,
            shutdown_rx,
            _tempdir: None,
        }
    }

    /// An on-disk engine in a fresh temp directory, with a permissive
    /// manager.
    pub fn on_disk() -> Self {
        let manager = ScriptedManager::permissive();
        let tempdir = tempfile::tempdir().unwrap_or_else(|e| panic!("creating tempdir: {e}"));
        let (tx, shutdown_rx) = mpsc::channel(1);
        let engine = Engine::open(
            Arc::clone(&manager) as Arc<dyn Manager>,
            tempdir.path(),
            tx,
        )
        .unwrap_or_else(|e| panic!("opening on-disk engine: {e}"));
        Self {
            engine: Arc::new(engine),
            manager,
            shutdown_rx,
            _tempdir: Some(tempdir),
        }
    }
}

/// A message with a chosen id, for tests that care about the state sum.
pub fn message_with_id(id: u64, payload: &[u8]) -> Message {
    let mut msg = Message::new(payload.to_vec());
    msg.id = MessageId(id);
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_manager_records_applies() {
        let fixture = TestEngine::in_memory();

        let mut msg = message_with_id(4, b"first");
        fixture.engine.handle_new_message(&mut msg).unwrap();

        assert_eq!(fixture.manager.applied_payloads(), vec![b"first".to_vec()]);
        assert_eq!(fixture.engine.status().unwrap().state, 4);
    }

    #[test]
    fn test_on_disk_engine_round_trips() {
        let fixture = TestEngine::on_disk();

        let mut msg = message_with_id(9, b"durable");
        fixture.engine.handle_new_message(&mut msg).unwrap();
        assert_eq!(fixture.engine.status().unwrap().queue_size, 1);
    }
}
