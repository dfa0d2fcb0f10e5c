//! The requestor worker: pulls a remote listener's queue into this node.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parley_core::Message;
use parley_engine::{Component, ComponentRunner, Engine, EngineError, Worker};

use crate::error::SyncError;
use crate::transport::Transport;
use crate::wire::{ErrorReason, Reply, Request};

/// Consecutive receive timeouts tolerated before re-issuing the request.
const MAX_RECV_TIMEOUTS: u32 = 10;

/// How long to idle after learning the remote queue is empty.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Where the requestor's loop currently is.
///
/// REQUEST asks for the next message, RECEIVE waits for the answer and
/// reacts to it, SEND_OK acknowledges an applied message. The
/// acknowledgment is its own state so a send failure retries the `ok`
/// rather than re-requesting: the message is already applied here, and
/// asking again would pull a duplicate.
enum RequestorState {
    Request,
    Receive { timeouts: u32 },
    SendOk,
}

struct RequestorWorker {
    engine: Arc<Engine>,
    transport: Box<dyn Transport>,
    state: RequestorState,
    poll_interval: Duration,
}

impl RequestorWorker {
    /// React to the listener's answer, returning the next state.
    async fn on_reply(&mut self, reply: Reply) -> Result<RequestorState, EngineError> {
        match reply {
            Reply::Msg(body) => {
                let mut msg = match Message::decode(&body) {
                    Ok(msg) => msg,
                    Err(err) => {
                        tracing::warn!(error = %err, "peer sent an undecodable message");
                        return Ok(RequestorState::Request);
                    }
                };
                tracing::debug!(id = %msg.id, "pulled a message from peer");
                // A fatal store failure inside the engine already triggered
                // a shutdown; anything else just means the message was not
                // taken, and the listener still holds it for a retry.
                if let Err(err) = self.engine.handle_remote_message(&mut msg) {
                    tracing::warn!(error = %err, "remote message was not applied");
                    return Ok(RequestorState::Request);
                }
                Ok(RequestorState::SendOk)
            }
            Reply::Empty(remote_state) => {
                let diverged = self.engine.check_remote_state(remote_state)?;
                if diverged {
                    tracing::info!(remote_state, "peer state differs from ours");
                }
                // Nothing to pull; back off before asking again.
                tokio::time::sleep(self.poll_interval).await;
                Ok(RequestorState::Request)
            }
            Reply::Deleted => {
                tracing::debug!("peer confirmed the acknowledged message is gone");
                Ok(RequestorState::Request)
            }
            Reply::Error(ErrorReason::Dequeue) => {
                // We applied a message the listener could not delete. The
                // listener will offer it again to the next requestor, so
                // the peers are permanently diverged.
                Err(EngineError::RemoteDequeue)
            }
            Reply::Error(reason) => {
                tracing::warn!(?reason, "peer reported a recoverable failure");
                Ok(RequestorState::Request)
            }
            Reply::Unknown => {
                tracing::warn!("peer did not understand our request");
                Ok(RequestorState::Request)
            }
        }
    }
}

#[async_trait]
impl Worker for RequestorWorker {
    async fn tick(&mut self) -> Result<(), EngineError> {
        match self.state {
            RequestorState::Request => match self.transport.send(&Request::Send.encode()).await {
                Ok(()) => self.state = RequestorState::Receive { timeouts: 0 },
                Err(err) => {
                    tracing::warn!(error = %err, "request send failed, reconnecting");
                    if let Err(err) = self.transport.reconnect().await {
                        tracing::warn!(error = %err, "reconnect failed");
                        tokio::time::sleep(self.poll_interval).await;
                    }
                }
            },
            RequestorState::Receive { timeouts } => match self.transport.recv().await {
                Ok(frame) => {
                    let reply = match Reply::parse(&frame) {
                        Ok(reply) => reply,
                        Err(err) => {
                            tracing::warn!(error = %err, "peer sent a malformed reply");
                            self.state = RequestorState::Request;
                            return Ok(());
                        }
                    };
                    self.state = self.on_reply(reply).await?;
                }
                Err(SyncError::Timeout) => {
                    // The listener may have missed the request entirely;
                    // after enough silence, ask again.
                    if timeouts + 1 >= MAX_RECV_TIMEOUTS {
                        tracing::debug!("peer is silent, re-requesting");
                        self.state = RequestorState::Request;
                    } else {
                        self.state = RequestorState::Receive {
                            timeouts: timeouts + 1,
                        };
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "receive failed, reconnecting");
                    if let Err(err) = self.transport.reconnect().await {
                        tracing::warn!(error = %err, "reconnect failed");
                        tokio::time::sleep(self.poll_interval).await;
                    }
                    self.state = RequestorState::Request;
                }
            },
            RequestorState::SendOk => match self.transport.send(&Request::Ok.encode()).await {
                Ok(()) => self.state = RequestorState::Receive { timeouts: 0 },
                // Retry the acknowledgment; re-requesting instead would
                // pull the same message twice.
                Err(SyncError::Timeout) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "acknowledgment send failed, reconnecting");
                    if let Err(err) = self.transport.reconnect().await {
                        tracing::warn!(error = %err, "reconnect failed");
                        tokio::time::sleep(self.poll_interval).await;
                    }
                }
            },
        }
        Ok(())
    }

    async fn cleanup(&mut self) {
        tracing::debug!("requestor stopped");
    }
}

/// Pulls a remote node's outbound queue into this node's engine.
pub struct PollRequestor {
    transport: Option<Box<dyn Transport>>,
    poll_interval: Duration,
    runner: Option<ComponentRunner>,
}

impl PollRequestor {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Some(Box::new(transport)),
            poll_interval: DEFAULT_POLL_INTERVAL,
            runner: None,
        }
    }

    /// Override the idle delay used when the remote queue is empty.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[async_trait]
impl Component for PollRequestor {
    async fn start(&mut self, engine: Arc<Engine>) -> Result<(), EngineError> {
        let transport = self
            .transport
            .take()
            .ok_or_else(|| EngineError::Component("requestor already started".into()))?;
        self.runner = Some(ComponentRunner::spawn(
            engine.clone(),
            RequestorWorker {
                engine,
                transport,
                state: RequestorState::Request,
                poll_interval: self.poll_interval,
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
