//! Error types for entity storage operations.

use driftsync_store::StoreError;
use thiserror::Error;

/// Result type for entity storage operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while storing or loading entities.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The underlying document store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An entity kind or entity id cannot be mapped to a document id.
    #[error("invalid id {id:?}: {reason}")]
    InvalidId {
        /// The offending id.
        id: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A revision conflict persisted after the conflict retry budget.
    #[error("revision conflict persisted for {id}")]
    Conflict {
        /// The document id.
        id: String,
    },

    /// Connection-class failures outlasted the retry budget.
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// The adapter operation that was retried.
        operation: String,
        /// Total number of attempts made.
        attempts: u32,
        /// The last failure.
        #[source]
        source: Box<CoreError>,
    },

    /// An entity could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The legacy aggregate document does not have the expected shape.
    #[error("legacy document {id} is malformed: {reason}")]
    LegacyFormat {
        /// The legacy document id.
        id: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl CoreError {
    pub(crate) fn invalid_id(id: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidId {
            id: id.into(),
            reason,
        }
    }

    /// Returns true for revision conflicts, raw or escalated.
    pub fn is_conflict(&self) -> bool {
        match self {
            CoreError::Conflict { .. } => true,
            CoreError::Store(e) => e.is_conflict(),
            _ => false,
        }
    }

    /// Returns true for connection-class failures worth retrying with a
    /// fresh store handle.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Store(e) if e.is_unavailable())
    }

    /// Returns true when the addressed document does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::Store(e) if e.is_not_found())
    }

    /// Returns true for failures the adapter has given up retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::RetriesExhausted { .. })
    }
}
