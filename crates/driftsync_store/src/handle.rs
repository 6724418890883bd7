//! Swappable handle to the live document store.

use crate::backend::DocumentStore;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Shared, hot-swappable reference to the current document store.
///
/// Consumers call [`StoreHandle::current`] on every attempt instead of
/// caching the store. When a connection is replaced, the next attempt of
/// every consumer picks up the new store without any coordinated
/// invalidation.
pub struct StoreHandle {
    current: RwLock<Arc<dyn DocumentStore>>,
    generation: AtomicU64,
}

impl StoreHandle {
    /// Creates a handle pointing at `store`.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            current: RwLock::new(store),
            generation: AtomicU64::new(0),
        }
    }

    /// Returns the store currently in use.
    pub fn current(&self) -> Arc<dyn DocumentStore> {
        Arc::clone(&self.current.read())
    }

    /// Replaces the live store, returning the previous one.
    pub fn replace(&self, store: Arc<dyn DocumentStore>) -> Arc<dyn DocumentStore> {
        let previous = std::mem::replace(&mut *self.current.write(), store);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(generation, "document store handle replaced");
        previous
    }

    /// Returns how many times the store has been replaced.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Document, InMemoryStore};
    use serde_json::json;

    #[tokio::test]
    async fn handle_swaps_store() {
        let first = Arc::new(InMemoryStore::new());
        let handle = StoreHandle::new(first.clone());
        handle
            .current()
            .put(Document::new("task-1", json!({})))
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        let second = Arc::new(InMemoryStore::new());
        handle.replace(second.clone());
        assert_eq!(handle.generation(), 1);

        handle
            .current()
            .put(Document::new("task-2", json!({})))
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
    }
}
