//! Common error types for LoanTrack.

use thiserror::Error;

/// Top-level error type for LoanTrack operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Durable storage read or write failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Transient network failure (unreachable host, 5xx response).
    #[error("Network error: {0}")]
    Network(String),

    /// Operation did not complete in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Remote side refused the request.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Operation conflicts with the current state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Unexpected failure inside a collaborator.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Timeout(_) | Error::Io(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
