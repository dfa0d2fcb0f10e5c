//! # Parley Engine
//!
//! The synchronization orchestrator.
//!
//! ## Overview
//!
//! The [`Engine`] owns the three durable stores (outbound queue, history
//! stack, state counter) and serializes every mutation behind one lock, so
//! at most one apply decision is in flight system-wide. Application logic
//! plugs in through the [`Manager`] trait: the engine decides *whether* an
//! operation applies, the manager decides *what* applying means.
//!
//! Network-facing workers are [`Component`]s driven by a shared
//! [`ComponentRunner`] scaffold, and a [`Node`] ties the engine and its
//! components into one process lifecycle (start, listen, stop).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use parley_engine::{Manager, Node};
//!
//! async fn run(manager: Arc<dyn Manager>) {
//!     let mut node = Node::open(manager, "/var/lib/parley").unwrap();
//!     // node.add_component(...);
//!     node.start_and_listen().await.unwrap();
//! }
//! ```

pub mod component;
pub mod engine;
pub mod error;
pub mod manager;
pub mod node;

pub use component::{Component, ComponentRunner, Worker};
pub use engine::{Engine, Status, HISTORY_FILENAME, QUEUE_FILENAME, STATE_FILENAME};
pub use error::{EngineError, Result};
pub use manager::Manager;
pub use node::Node;
