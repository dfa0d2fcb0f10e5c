//! Error types for the store crate.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored record failed to decode back into a message.
    #[error("corrupt record: {0}")]
    Corrupt(#[from] parley_core::CoreError),

    /// A thread panicked while holding a store lock.
    #[error("store lock poisoned")]
    LockPoisoned,

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
