//! Error types for the sync engine.

use crate::source::SyncSource;
use driftsync_conflict::ResolveError;
use driftsync_core::CoreError;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for coordinator operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Why the breaker refused to run an attempt.
///
/// Rejections are not failures: they never count against the circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    /// The breaker has been destroyed.
    Destroyed,
    /// Another attempt is in flight.
    InProgress,
    /// The source attempted too recently.
    Debounced {
        /// The debounced source.
        source: SyncSource,
        /// Time left until the source may attempt again.
        #[serde(skip)]
        remaining: Duration,
    },
    /// The circuit is open.
    CircuitOpen,
}

impl Rejection {
    /// Returns the reason as a stable label.
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::Destroyed => "destroyed",
            Rejection::InProgress => "in_progress",
            Rejection::Debounced { .. } => "debounced",
            Rejection::CircuitOpen => "circuit_open",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Destroyed => f.write_str("breaker destroyed"),
            Rejection::InProgress => f.write_str("another sync attempt is in flight"),
            Rejection::Debounced { source, remaining } => {
                write!(f, "{source} sync debounced for another {remaining:?}")
            }
            Rejection::CircuitOpen => f.write_str("circuit open"),
        }
    }
}

/// Errors returned by [`crate::SyncCircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The attempt was refused without running.
    #[error("sync attempt rejected: {0}")]
    Rejected(Rejection),

    /// The attempt ran longer than the operation timeout.
    #[error("sync attempt timed out after {0:?}")]
    Timeout(Duration),

    /// The operation itself failed.
    #[error("sync operation failed: {0}")]
    Operation(#[source] E),
}

impl<E> BreakerError<E> {
    /// Returns true if the attempt never ran.
    pub fn is_rejection(&self) -> bool {
        matches!(self, BreakerError::Rejected(_))
    }

    /// Returns the rejection reason, if any.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            BreakerError::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }
}

/// Failures inside a coordinator sync attempt.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Storage adapter failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Conflict resolution failure.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

impl SyncError {
    /// Returns true for failures the adapter has given up retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Core(e) if e.is_fatal())
    }

    /// Returns true for failures that retrying the same change can never fix.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            SyncError::Core(
                CoreError::InvalidId { .. } | CoreError::Serialization(_) | CoreError::LegacyFormat { .. }
            )
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_store::StoreError;

    #[test]
    fn rejection_labels() {
        let debounced = Rejection::Debounced {
            source: SyncSource::Local,
            remaining: Duration::from_millis(200),
        };
        assert_eq!(debounced.reason(), "debounced");
        assert_eq!(debounced.to_string(), "local sync debounced for another 200ms");
        assert_eq!(Rejection::CircuitOpen.reason(), "circuit_open");
    }

    #[test]
    fn breaker_error_classification() {
        let err: BreakerError<SyncError> = BreakerError::Rejected(Rejection::InProgress);
        assert!(err.is_rejection());
        assert_eq!(err.rejection(), Some(&Rejection::InProgress));

        let err: BreakerError<SyncError> = BreakerError::Timeout(Duration::from_secs(30));
        assert!(!err.is_rejection());
        assert!(err.rejection().is_none());
    }

    #[test]
    fn fatal_sync_errors() {
        let exhausted = CoreError::RetriesExhausted {
            operation: "save".into(),
            attempts: 4,
            source: Box::new(CoreError::from(StoreError::Unavailable("down".into()))),
        };
        assert!(SyncError::from(exhausted).is_fatal());
        assert!(!SyncError::from(CoreError::Conflict { id: "task-1".into() }).is_fatal());
        assert!(SyncError::from(CoreError::InvalidId {
            id: String::new(),
            reason: "empty",
        })
        .is_permanent());
    }
}
