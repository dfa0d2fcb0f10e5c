//! Error types for the sync layer.

use thiserror::Error;

/// Failures in the wire protocol and transports.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The underlying socket failed.
    #[error("transport i/o: {0}")]
    Io(#[from] std::io::Error),

    /// An operation did not complete within its deadline. Both workers
    /// treat this as retryable, unlike every other variant.
    #[error("transport operation timed out")]
    Timeout,

    /// The peer went away mid-conversation.
    #[error("peer disconnected")]
    Disconnected,

    /// The peer sent a frame this protocol does not define.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl SyncError {
    /// Whether the operation may simply be retried on the same connection.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SyncError::Timeout)
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
