//! Long-running worker components and their shared lifecycle scaffold.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::engine::Engine;
use crate::error::Result;

/// A long-running part of the node with a managed lifecycle.
///
/// The [`Node`](crate::Node) starts every component once, asks each to stop
/// during shutdown, and then waits for all of them to finish.
#[async_trait]
pub trait Component: Send {
    /// Begin running. Must return promptly, spawning any background work.
    async fn start(&mut self, engine: Arc<Engine>) -> Result<()>;

    /// Request a stop. Idempotent; only the first call's `code` is kept.
    fn stop(&self, code: i32);

    /// Wait until the component has fully stopped. May be called by any
    /// number of waiters, before or after the stop completes.
    async fn wait_for_stop(&self);
}

/// One iteration of a component's loop.
///
/// Ticks always run to completion; the runner observes a stop request
/// only between iterations, never mid-operation. Implementations must
/// therefore keep each tick bounded (transport operations carry their own
/// deadlines) so a stop is honored promptly.
#[async_trait]
pub trait Worker: Send + 'static {
    /// Run one iteration. Returning an error is fatal for the whole node.
    async fn tick(&mut self) -> Result<()>;

    /// Release resources before the loop exits. Runs exactly once, whether
    /// the loop ended by request or by a failed tick.
    async fn cleanup(&mut self);
}

/// Drives a [`Worker`] in a spawned task until asked to stop or the worker
/// fails.
///
/// The scaffold holds the lifecycle plumbing (stop signal, done signal,
/// failure escalation) so workers only contain their loop body.
pub struct ComponentRunner {
    stop_tx: watch::Sender<Option<i32>>,
    done_rx: watch::Receiver<bool>,
}

impl ComponentRunner {
    /// Spawn `worker`'s loop on the tokio runtime.
    ///
    /// The stop signal is checked only at the top of each iteration: an
    /// in-flight tick always finishes, so a worker is never abandoned
    /// halfway through a store mutation or a partially written frame. A
    /// failed tick pushes the error onto the engine's shutdown channel and
    /// ends the loop.
    pub fn spawn<W: Worker>(engine: Arc<Engine>, mut worker: W) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(None::<i32>);
        let (done_tx, done_rx) = watch::channel(false);

        tokio::spawn(async move {
            loop {
                if let Some(code) = *stop_rx.borrow_and_update() {
                    tracing::debug!(code, "worker stopping by request");
                    break;
                }

                if let Err(err) = worker.tick().await {
                    tracing::warn!(error = %err, "worker tick failed");
                    engine.shutdown(err);
                    break;
                }
            }

            worker.cleanup().await;
            let _ = done_tx.send(true);
        });

        Self { stop_tx, done_rx }
    }

    /// Request a stop. Idempotent; only the first caller's code sticks.
    pub fn stop(&self, code: i32) {
        self.stop_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(code);
                true
            } else {
                false
            }
        });
    }

    /// Wait for the worker's loop to finish and its cleanup to run.
    pub async fn wait_for_stop(&self) {
        let mut done = self.done_rx.clone();
        // Only fails if the task panicked and dropped the sender; treat
        // that as stopped.
        let _ = done.wait_for(|finished| *finished).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::manager::Manager;
    use parley_core::Message;
    use parley_store::HistoryIter;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct NoopManager;

    impl Manager for NoopManager {
        fn process(&self, _msg: &Message, _from_remote: bool) -> anyhow::Result<()> {
            Ok(())
        }
        fn should_process(&self, _msg: &Message, _history: &mut HistoryIter<'_>) -> bool {
            true
        }
    }

    fn test_engine() -> (Arc<Engine>, mpsc::Receiver<EngineError>) {
        let (tx, rx) = mpsc::channel(1);
        let engine = Engine::open_memory(Arc::new(NoopManager), tx).unwrap();
        (Arc::new(engine), rx)
    }

    struct CountingWorker {
        ticks: Arc<AtomicUsize>,
        cleaned: Arc<AtomicUsize>,
        fail_on: Option<usize>,
    }

    #[async_trait]
    impl Worker for CountingWorker {
        async fn tick(&mut self) -> Result<()> {
            let n = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on == Some(n) {
                return Err(EngineError::Component("manufactured".into()));
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
            Ok(())
        }

        async fn cleanup(&mut self) {
            self.cleaned.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_runner_ticks_until_stopped() {
        let (engine, _rx) = test_engine();
        let ticks = Arc::new(AtomicUsize::new(0));
        let cleaned = Arc::new(AtomicUsize::new(0));

        let runner = ComponentRunner::spawn(
            engine,
            CountingWorker {
                ticks: Arc::clone(&ticks),
                cleaned: Arc::clone(&cleaned),
                fail_on: None,
            },
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        runner.stop(0);
        runner.wait_for_stop().await;

        assert!(ticks.load(Ordering::SeqCst) > 1);
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_runner_stop_is_idempotent() {
        let (engine, _rx) = test_engine();
        let ticks = Arc::new(AtomicUsize::new(0));
        let cleaned = Arc::new(AtomicUsize::new(0));

        let runner = ComponentRunner::spawn(
            engine,
            CountingWorker {
                ticks,
                cleaned: Arc::clone(&cleaned),
                fail_on: None,
            },
        );

        runner.stop(0);
        runner.stop(1);
        runner.wait_for_stop().await;
        // Waiting twice is fine too.
        runner.wait_for_stop().await;

        assert_eq!(cleaned.load(Ordering::SeqCst), 1);
    }

    struct SlowWorker {
        started: Arc<AtomicUsize>,
        completed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Worker for SlowWorker {
        async fn tick(&mut self) -> Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn cleanup(&mut self) {}
    }

    #[tokio::test]
    async fn test_stop_never_interrupts_a_tick() {
        let (engine, _rx) = test_engine();
        let started = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));

        let runner = ComponentRunner::spawn(
            engine,
            SlowWorker {
                started: Arc::clone(&started),
                completed: Arc::clone(&completed),
            },
        );

        // Stop while a tick is in flight.
        tokio::time::sleep(Duration::from_millis(10)).await;
        runner.stop(0);
        runner.wait_for_stop().await;

        // Every tick that began also finished.
        assert!(started.load(Ordering::SeqCst) >= 1);
        assert_eq!(
            started.load(Ordering::SeqCst),
            completed.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn test_failed_tick_escalates_to_shutdown() {
        let (engine, mut rx) = test_engine();
        let ticks = Arc::new(AtomicUsize::new(0));
        let cleaned = Arc::new(AtomicUsize::new(0));

        let runner = ComponentRunner::spawn(
            engine,
            CountingWorker {
                ticks: Arc::clone(&ticks),
                cleaned: Arc::clone(&cleaned),
                fail_on: Some(3),
            },
        );

        let err = rx.recv().await.unwrap();
        assert!(matches!(err, EngineError::Component(_)));

        runner.wait_for_stop().await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);
    }
}
