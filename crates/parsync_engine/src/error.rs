//! Error types for the sync engine.

use parsync_store::StoreError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that end a whole run.
///
/// Failures confined to one worker never surface here; they are reported
/// in that worker's `WorkerReport` instead.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The run configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The preview session could not be opened or queried.
    #[error("preview failed: {0}")]
    Preview(#[source] StoreError),

    /// The run was cancelled before any worker started.
    #[error("sync cancelled")]
    Cancelled,
}

impl EngineError {
    /// Creates an invalid-configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Returns true if the store rejected the connection or the credential.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, EngineError::Preview(e) if e.is_fatal())
    }
}
