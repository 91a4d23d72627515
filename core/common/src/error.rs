//! Common error types for MicroSync.

use thiserror::Error;

/// Top-level error type for MicroSync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Fetch failed in a way that may succeed if retried (network, timeout).
    #[error("Transient fetch error: {0}")]
    TransientFetch(String),

    /// Fetch failed in a way that will not succeed on retry.
    #[error("Permanent fetch error: {0}")]
    PermanentFetch(String),

    /// Store-level failure while merging, unrelated to concurrency.
    #[error("Merge error: {0}")]
    Merge(String),

    /// A session for this (service, document) pair is already running.
    #[error("Sync already running: service '{service}' into document '{document}'")]
    AlreadyRunning { service: String, document: String },

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// No async runtime is available to drive a session.
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Whether retrying the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientFetch(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
