//! Error types for document store operations.

use std::io;
use thiserror::Error;

/// Result type for document store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during document store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The supplied revision does not match the stored revision.
    #[error("document update conflict: {id}")]
    Conflict {
        /// The document id.
        id: String,
    },

    /// The document does not exist.
    #[error("document not found: {id}")]
    NotFound {
        /// The document id.
        id: String,
    },

    /// The store connection is unavailable (closed, dropped or swapped out).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backend failed for a reason that retrying will not fix.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    /// Creates a conflict error for the given document.
    pub fn conflict(id: impl Into<String>) -> Self {
        Self::Conflict { id: id.into() }
    }

    /// Creates a not-found error for the given document.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Returns true for a stale-revision rejection.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Returns true when the document is missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Returns true for connection-class failures that a fresh store
    /// handle may not exhibit.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}
