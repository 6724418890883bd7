//! Configuration for the conflict resolver.

use crate::strategy::Strategy;

/// Configuration for a [`crate::ConflictResolver`].
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Strategy used when a call does not name one.
    pub default_strategy: Strategy,
    /// Records kept in the history.
    pub history_capacity: usize,
    /// Contexts listed in statistics.
    pub top_contexts: usize,
    /// Records listed in statistics.
    pub recent_records: usize,
}

impl ResolverConfig {
    /// Sets the default strategy.
    pub fn with_default_strategy(mut self, strategy: Strategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    /// Sets the history capacity.
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Sets how many contexts statistics list.
    pub fn with_top_contexts(mut self, n: usize) -> Self {
        self.top_contexts = n;
        self
    }

    /// Sets how many records statistics list.
    pub fn with_recent_records(mut self, n: usize) -> Self {
        self.recent_records = n;
        self
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            default_strategy: Strategy::LastWriteWins,
            history_capacity: 100,
            top_contexts: 5,
            recent_records: 10,
        }
    }
}
