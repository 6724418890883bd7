//! Error types for conflict resolution.

use thiserror::Error;

/// Result type for conflict resolution.
pub type ResolveResult<T> = Result<T, ResolveError>;

/// Errors that can occur during conflict resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// No custom strategy is registered under this name.
    #[error("unknown resolution strategy: {0}")]
    UnknownStrategy(String),

    /// A custom strategy failed.
    ///
    /// The resolver never returns this; it falls back to last-write-wins.
    #[error("strategy {name} failed: {message}")]
    Strategy {
        /// Strategy name.
        name: String,
        /// Failure description.
        message: String,
    },
}

impl ResolveError {
    /// Creates a strategy failure.
    pub fn strategy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Strategy {
            name: name.into(),
            message: message.into(),
        }
    }
}
