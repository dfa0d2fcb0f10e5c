//! # Parley Core
//!
//! Core primitives for the Parley synchronization engine.
//!
//! ## Overview
//!
//! A [`Message`] is the unit of synchronization: an immutable record of an
//! application-defined operation, identified by a 64-bit fingerprint of its
//! creation time and payload. Messages travel between peers and onto disk in
//! a canonical CBOR encoding that is stable across repeated
//! encode/decode cycles.
//!
//! ## Key Types
//!
//! - [`Message`] - An application operation with a deterministic identity
//! - [`MessageId`] - The 64-bit blake3 fingerprint of a message
//! - [`CoreError`] - Errors from encoding and decoding
//!
//! ## Usage
//!
//! ```rust
//! use parley_core::Message;
//!
//! let msg = Message::new(b"set temperature=72".to_vec());
//! let bytes = msg.encode();
//! let back = Message::decode(&bytes).unwrap();
//! assert_eq!(msg, back);
//! ```

pub mod canonical;
pub mod error;
pub mod message;

pub use canonical::{decode_message, encode_message};
pub use error::{CoreError, Result};
pub use message::{now_millis, Message, MessageId};
