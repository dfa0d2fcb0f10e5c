//! Error types for the engine.

use thiserror::Error;

use parley_store::StoreError;

/// Fatal conditions inside the engine and its components.
///
/// Inner errors are captured as rendered strings so the value can travel
/// through the process-wide shutdown channel and still be returned to the
/// caller that hit it.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// A durable store mutation failed. There is no cross-store rollback,
    /// so this is always fatal.
    #[error("store error: {0}")]
    Store(String),

    /// The manager reported a processing failure it could not resolve.
    #[error("manager error: {0}")]
    Manager(String),

    /// The remote peer reported it could not dequeue a message we already
    /// acknowledged. Both sides are now unrecoverably diverged.
    #[error("remote peer failed to dequeue an acknowledged message")]
    RemoteDequeue,

    /// A network component hit an unrecoverable condition.
    #[error("component error: {0}")]
    Component(String),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        EngineError::Store(err.to_string())
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Manager(format!("{err:#}"))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
