//! Origins of sync attempts.

use serde::Serialize;
use std::fmt;

/// What triggered a sync attempt.
///
/// Each source is debounced independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncSource {
    /// A local mutation.
    Local,
    /// A change from the remote replica.
    Remote,
    /// A change from another tab or window of the same client.
    CrossTab,
}

impl SyncSource {
    /// Every source.
    pub const ALL: [SyncSource; 3] = [SyncSource::Local, SyncSource::Remote, SyncSource::CrossTab];

    /// Returns the source name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncSource::Local => "local",
            SyncSource::Remote => "remote",
            SyncSource::CrossTab => "cross_tab",
        }
    }
}

impl fmt::Display for SyncSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
