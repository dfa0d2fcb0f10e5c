//! # Parley Testkit
//!
//! Testing utilities for Parley.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: pinned wire encodings for cross-implementation checks
//! - **Generators**: proptest strategies for property-based testing
//! - **Fixtures**: scripted managers and ready-made engines
//!
//! ## Golden Vectors
//!
//! ```rust
//! use parley_testkit::vectors::verify_all_vectors;
//!
//! verify_all_vectors().unwrap();
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use parley_testkit::generators::message;
//!
//! proptest! {
//!     #[test]
//!     fn survives_the_wire(msg in message(1024)) {
//!         let back = parley_core::Message::decode(&msg.encode()).unwrap();
//!         prop_assert_eq!(back, msg);
//!     }
//! }
//! ```
//!
//! ## Fixtures
//!
//! ```rust
//! use parley_testkit::fixtures::{message_with_id, TestEngine};
//!
//! let fixture = TestEngine::in_memory();
//! let mut msg = message_with_id(7, b"observed");
//! fixture.engine.handle_new_message(&mut msg).unwrap();
//! assert_eq!(fixture.engine.status().unwrap().state, 7);
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{message_with_id, ScriptedManager, TestEngine};
pub use vectors::{all_vectors, verify_all_vectors, GoldenVector};
