//! # Parley Store
//!
//! Durable storage for the Parley synchronization engine.
//!
//! ## Overview
//!
//! Three independent stores back the engine, each in its own SQLite
//! database file so that one corrupted structure cannot take the others
//! with it:
//!
//! - [`SyncQueue`] - FIFO of messages awaiting remote acknowledgment
//! - [`HistoryStack`] - LIFO of applied messages, kept for conflict
//!   arbitration until convergence is proven
//! - [`StateCell`] - the cumulative state counter used to detect
//!   divergence between peers
//!
//! ## Key Types
//!
//! - [`HistoryIter`] - a scoped iterator that holds the history store's
//!   lock for its whole lifetime, giving conflict arbitration a stable
//!   snapshot
//! - [`StoreError`] - errors from storage operations
//!
//! ## Usage
//!
//! ```rust
//! use parley_core::Message;
//! use parley_store::SyncQueue;
//!
//! let queue = SyncQueue::open_memory().unwrap();
//! queue.enqueue(&Message::new(b"op".to_vec())).unwrap();
//! assert_eq!(queue.size().unwrap(), 1);
//! ```

pub mod error;
pub mod history;
pub mod migration;
pub mod queue;
pub mod state;

pub use error::{Result, StoreError};
pub use history::{HistoryIter, HistoryStack};
pub use queue::SyncQueue;
pub use state::StateCell;
