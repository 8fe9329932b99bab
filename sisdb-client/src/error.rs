//! Error types for the data service boundary.

use thiserror::Error;

/// Result type for data service operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors reported by a schema service or data endpoint.
///
/// The core never retries on any of these; they are surfaced to the caller
/// exactly as the service produced them.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The requested schema or record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A schema or record with the same identity already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The service refused the payload (validation failure).
    #[error("rejected by server: {0}")]
    Rejected(String),

    /// The request never produced a usable reply.
    #[error("transport error: {0}")]
    Transport(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClientError {
    /// Returns true if this error means the target does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}
