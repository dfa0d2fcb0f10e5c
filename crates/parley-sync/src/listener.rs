//! The listener worker: answers a remote requestor's pull requests.

use std::sync::Arc;

use async_trait::async_trait;
use parley_engine::{Component, ComponentRunner, Engine, EngineError, Worker};

use crate::error::SyncError;
use crate::transport::Transport;
use crate::wire::{ErrorReason, Reply, Request};

/// Where the listener's loop currently is.
///
/// The state enum is the whole story: RECEIVE waits for a request and
/// computes the answer, SEND delivers it. A reply that fails to send is
/// retried from SEND without recomputing it, so the requestor never sees
/// an answer change between retries.
enum ListenerState {
    Receive,
    Send(Reply),
}

struct ListenerWorker {
    engine: Arc<Engine>,
    transport: Box<dyn Transport>,
    state: ListenerState,
}

impl ListenerWorker {
    /// Compute the reply to a `send` request from the queue head.
    fn answer_send(&self) -> Reply {
        match self.engine.peek_outbound() {
            Ok(Some(msg)) => {
                tracing::debug!(id = %msg.id, "offering queued message to peer");
                Reply::from_message(&msg)
            }
            Ok(None) => match self.engine.status() {
                Ok(status) => {
                    tracing::debug!(state = status.state, "queue empty, reporting state");
                    Reply::Empty(status.state)
                }
                Err(err) => {
                    tracing::warn!(error = %err, "could not read state for an empty reply");
                    Reply::Error(ErrorReason::QueueRead)
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "could not peek the outbound queue");
                Reply::Error(ErrorReason::QueueRead)
            }
        }
    }

    /// Handle an `ok` acknowledgment: drop the queue head.
    ///
    /// By the time `ok` arrives the peer has already applied the message,
    /// so failing to dequeue leaves the two sides permanently diverged.
    /// The peer is told (best effort) and the node shuts down.
    async fn answer_ok(&mut self) -> Result<Reply, EngineError> {
        match self.engine.ack_outbound() {
            Ok(Some(msg)) => {
                tracing::debug!(id = %msg.id, "peer applied message, dequeued");
                Ok(Reply::Deleted)
            }
            Ok(None) => {
                let _ = self
                    .transport
                    .send(&Reply::Error(ErrorReason::Dequeue).encode())
                    .await;
                Err(EngineError::Component(
                    "peer acknowledged a message but the queue is empty".into(),
                ))
            }
            Err(err) => {
                let _ = self
                    .transport
                    .send(&Reply::Error(ErrorReason::Dequeue).encode())
                    .await;
                Err(err)
            }
        }
    }
}

#[async_trait]
impl Worker for ListenerWorker {
    async fn tick(&mut self) -> Result<(), EngineError> {
        match &self.state {
            ListenerState::Receive => {
                let frame = match self.transport.recv().await {
                    Ok(frame) => frame,
                    Err(SyncError::Timeout) => return Ok(()),
                    Err(err) => {
                        tracing::warn!(error = %err, "listener receive failed, reconnecting");
                        if let Err(err) = self.transport.reconnect().await {
                            tracing::warn!(error = %err, "reconnect failed");
                        }
                        return Ok(());
                    }
                };

                let reply = match Request::parse(&frame) {
                    Some(Request::Send) => self.answer_send(),
                    Some(Request::Ok) => self.answer_ok().await?,
                    None => {
                        tracing::warn!("peer sent an unrecognized request");
                        Reply::Unknown
                    }
                };
                self.state = ListenerState::Send(reply);
            }
            ListenerState::Send(reply) => {
                match self.transport.send(&reply.encode()).await {
                    Ok(()) => self.state = ListenerState::Receive,
                    // Stay in SEND so the same reply goes out next tick.
                    Err(SyncError::Timeout) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "listener send failed, reconnecting");
                        if let Err(err) = self.transport.reconnect().await {
                            tracing::warn!(error = %err, "reconnect failed");
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn cleanup(&mut self) {
        tracing::debug!("listener stopped");
    }
}

/// Serves this node's outbound queue to one remote requestor.
///
/// One requestor at a time: the reply to a `send` is recomputed only
/// after it was delivered, so interleaved requestors would receive each
/// other's answers.
pub struct PollListener {
    transport: Option<Box<dyn Transport>>,
    runner: Option<ComponentRunner>,
}

impl PollListener {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Some(Box::new(transport)),
            runner: None,
        }
    }
}

#[async_trait]
impl Component for PollListener {
    async fn start(&mut self, engine: Arc<Engine>) -> Result<(), EngineError> {
        let transport = self
            .transport
            .take()
            .ok_or_else(|| EngineError::Component("listener already started".into()))?;
        self.runner = Some(ComponentRunner::spawn(
            engine.clone(),
            ListenerWorker {
                engine,
                transport,
                state: ListenerState::Receive,
            },
        ));
        Ok(())
    }

    fn stop(&self, code: i32) {
        if let Some(runner) = &self.runner {
            runner.stop(code);
        }
    }

    async fn wait_for_stop(&self) {
        if let Some(runner) = &self.runner {
            runner.wait_for_stop().await;
        }
    }
}
