//! Error types for document store operations

use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur when talking to the document store
#[derive(Debug, Error)]
pub enum StoreError {
    /// The document does not exist
    #[error("Document not found: {0}")]
    NotFound(String),

    /// The supplied CAS no longer matches, or the key already exists
    #[error("Concurrent modification of document {0}")]
    Conflict(String),

    /// The stored body could not be decoded into the expected record
    #[error("Failed to decode document {id}: {message}")]
    Decode {
        /// Document id
        id: String,
        /// Decoder message
        message: String,
    },

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Store returned an unexpected status code
    #[error("Store error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error body returned by the store
        message: String,
    },

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl StoreError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    pub fn decode(id: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            id: id.into(),
            message: err.to_string(),
        }
    }

    /// Check if this error means the document is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_)) || matches!(self, Self::ApiError { status: 404, .. })
    }

    /// Check if this error is a CAS mismatch
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_)) || matches!(self, Self::ApiError { status: 409, .. })
    }
}
