//! # Parley Sync
//!
//! Pull-based peer synchronization over a point-to-point transport.
//!
//! ## Overview
//!
//! Synchronization is one-directional per link and driven entirely by the
//! receiving side: a [`PollRequestor`] repeatedly asks a remote
//! [`PollListener`] for the head of its outbound queue, applies what it
//! gets through its own engine, and acknowledges so the listener can
//! delete. Two nodes that want to exchange messages in both directions
//! run one listener and one requestor each, on separate links.
//!
//! ## Wire protocol
//!
//! Two requests (`send`, `ok`) and five replies (`msg`, `empty`,
//! `deleted`, `error`, `unknown`); see [`wire`]. Transports move opaque
//! multi-part frames and never interpret them; see [`transport`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use parley_engine::{Manager, Node};
//! use parley_sync::{PollListener, PollRequestor, TcpTransport};
//!
//! async fn run(manager: Arc<dyn Manager>) {
//!     let mut node = Node::open(manager, "/var/lib/parley").unwrap();
//!     node.add_component(Box::new(PollListener::new(
//!         TcpTransport::listen("0.0.0.0:7878"),
//!     )));
//!     node.add_component(Box::new(PollRequestor::new(
//!         TcpTransport::connect("peer.example:7878"),
//!     )));
//!     node.start_and_listen().await.unwrap();
//! }
//! ```

pub mod error;
pub mod listener;
pub mod requestor;
pub mod transport;
pub mod wire;

pub use error::{Result, SyncError};
pub use listener::PollListener;
pub use requestor::{PollRequestor, DEFAULT_POLL_INTERVAL};
pub use transport::{MemoryTransport, TcpTransport, Transport, DEFAULT_TIMEOUT};
pub use wire::{ErrorReason, Frame, Reply, Request};
