//! Error types for Parley Core.

use thiserror::Error;

/// Errors that can occur while encoding or decoding messages.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("decoding error: {0}")]
    Decoding(String),

    #[error("malformed message: {0}")]
    Malformed(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
