//! Fault injection for document stores.
//!
//! [`FlakyStore`] wraps a real store and makes selected calls misbehave:
//! dropped connections, stale revisions, competing writers and slow
//! responses. Every call is counted so tests can assert how many round
//! trips an operation made.

use async_trait::async_trait;
use driftsync_store::{
    AllDocsQuery, AllDocsRow, BulkItemResult, Document, DocumentStore, InMemoryStore,
    StoreError, StoreResult, WriteAck,
};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Per-method call counters.
#[derive(Debug, Default)]
pub struct CallCounts {
    /// `get` calls.
    pub get: AtomicU64,
    /// `put` calls.
    pub put: AtomicU64,
    /// `remove` calls.
    pub remove: AtomicU64,
    /// `bulk_docs` calls.
    pub bulk_docs: AtomicU64,
    /// `all_docs` calls.
    pub all_docs: AtomicU64,
}

impl CallCounts {
    /// Returns the total number of calls.
    pub fn total(&self) -> u64 {
        [&self.get, &self.put, &self.remove, &self.bulk_docs, &self.all_docs]
            .iter()
            .map(|c| c.load(Ordering::SeqCst))
            .sum()
    }
}

/// A document store that fails on demand.
#[derive(Debug)]
pub struct FlakyStore {
    inner: Arc<InMemoryStore>,
    outages: AtomicU32,
    conflicts: AtomicU32,
    racing_writes: AtomicU32,
    latency: Mutex<Duration>,
    /// Call counters.
    pub calls: CallCounts,
}

impl FlakyStore {
    /// Wraps `inner`.
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            outages: AtomicU32::new(0),
            conflicts: AtomicU32::new(0),
            racing_writes: AtomicU32::new(0),
            latency: Mutex::new(Duration::ZERO),
            calls: CallCounts::default(),
        }
    }

    /// Wraps a fresh in-memory store.
    pub fn memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()))
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &Arc<InMemoryStore> {
        &self.inner
    }

    /// Fails the next `n` calls of any kind with [`StoreError::Unavailable`].
    pub fn fail_next_calls(&self, n: u32) {
        self.outages.store(n, Ordering::SeqCst);
    }

    /// Fails the next `n` single-document writes with a revision conflict.
    pub fn conflict_next_writes(&self, n: u32) {
        self.conflicts.store(n, Ordering::SeqCst);
    }

    /// Lets a competing writer update the target document right before
    /// each of the next `n` puts, so those puts carry a stale revision.
    pub fn race_next_puts(&self, n: u32) {
        self.racing_writes.store(n, Ordering::SeqCst);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    async fn enter(&self, counter: &AtomicU64) -> StoreResult<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if take(&self.outages) {
            return Err(StoreError::Unavailable("injected outage".into()));
        }
        Ok(())
    }

    async fn competing_write(&self, doc: &Document) {
        let competitor = match self.inner.get(&doc.id).await {
            Ok(current) => current,
            Err(_) => Document::new(doc.id.clone(), doc.body.clone()),
        };
        // Ignored: the point is only to move the revision.
        let _ = self.inner.put(competitor).await;
    }
}

fn take(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, id: &str) -> StoreResult<Document> {
        self.enter(&self.calls.get).await?;
        self.inner.get(id).await
    }

    async fn put(&self, doc: Document) -> StoreResult<WriteAck> {
        self.enter(&self.calls.put).await?;
        if take(&self.conflicts) {
            return Err(StoreError::conflict(doc.id));
        }
        if take(&self.racing_writes) {
            self.competing_write(&doc).await;
        }
        self.inner.put(doc).await
    }

    async fn remove(&self, id: &str, rev: &str) -> StoreResult<WriteAck> {
        self.enter(&self.calls.remove).await?;
        if take(&self.conflicts) {
            return Err(StoreError::conflict(id));
        }
        self.inner.remove(id, rev).await
    }

    async fn bulk_docs(&self, docs: Vec<Document>) -> StoreResult<Vec<BulkItemResult>> {
        self.enter(&self.calls.bulk_docs).await?;
        self.inner.bulk_docs(docs).await
    }

    async fn all_docs(&self, query: AllDocsQuery) -> StoreResult<Vec<AllDocsRow>> {
        self.enter(&self.calls.all_docs).await?;
        self.inner.all_docs(query).await
    }
}
