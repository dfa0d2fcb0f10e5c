//! The Node: one process's engine plus its components, as a unit.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::component::Component;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::manager::Manager;

/// Ties an [`Engine`] and its [`Component`]s into one lifecycle.
///
/// Construction opens the stores; [`start`](Node::start) brings the
/// components up; [`listen`](Node::listen) parks until either Ctrl-C or an
/// internal fatal error, then stops everything in order.
pub struct Node {
    engine: Arc<Engine>,
    components: Vec<Box<dyn Component>>,
    shutdown_rx: mpsc::Receiver<EngineError>,
}

impl Node {
    /// Open a node whose stores live under `data_dir`.
    pub fn open(manager: Arc<dyn Manager>, data_dir: impl AsRef<Path>) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let engine = Engine::open(manager, data_dir, shutdown_tx)?;
        Ok(Self {
            engine: Arc::new(engine),
            components: Vec::new(),
            shutdown_rx,
        })
    }

    /// Open a node with in-memory stores. Useful for testing.
    pub fn open_memory(manager: Arc<dyn Manager>) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let engine = Engine::open_memory(manager, shutdown_tx)?;
        Ok(Self {
            engine: Arc::new(engine),
            components: Vec::new(),
            shutdown_rx,
        })
    }

    /// Handle to the node's engine, for submitting local messages and
    /// reading status.
    pub fn engine(&self) -> Arc<Engine> {
        Arc::clone(&self.engine)
    }

    /// Register a component. Components start in registration order and
    /// stop together.
    pub fn add_component(&mut self, component: Box<dyn Component>) {
        self.components.push(component);
    }

    /// Start every registered component, in order. The first failure
    /// aborts the startup; already-started components are stopped again.
    pub async fn start(&mut self) -> Result<()> {
        for (idx, component) in self.components.iter_mut().enumerate() {
            if let Err(err) = component.start(Arc::clone(&self.engine)).await {
                tracing::warn!(component = idx, error = %err, "component failed to start");
                self.stop().await;
                return Err(err);
            }
        }
        tracing::info!(components = self.components.len(), "node started");
        Ok(())
    }

    /// Park until Ctrl-C or an internal fatal error, then stop every
    /// component. Returns `Ok(())` for a requested shutdown and the fatal
    /// error otherwise.
    pub async fn listen(&mut self) -> Result<()> {
        let outcome = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, shutting down");
                Ok(())
            }
            err = self.shutdown_rx.recv() => {
                // The senders live as long as the engine, so recv only
                // returns None if the engine is gone; either way we stop.
                match err {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            }
        };

        self.stop().await;
        outcome
    }

    /// Ask every component to stop, then wait for all of them.
    pub async fn stop(&mut self) {
        for component in &self.components {
            component.stop(0);
        }
        for component in &self.components {
            component.wait_for_stop().await;
        }
        tracing::info!("node stopped");
    }

    /// Convenience wrapper: [`start`](Node::start) then
    /// [`listen`](Node::listen).
    pub async fn start_and_listen(&mut self) -> Result<()> {
        self.start().await?;
        self.listen().await
    }
}
