//! In-memory document store for testing and ephemeral replicas.

use crate::backend::DocumentStore;
use crate::document::{next_revision, AllDocsQuery, AllDocsRow, BulkItemResult, Document, WriteAck};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// An in-memory document store.
///
/// This store keeps all documents in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Replicas that don't need persistence
///
/// Connection loss can be simulated with [`InMemoryStore::set_available`].
///
/// # Example
///
/// ```rust
/// use driftsync_store::{Document, DocumentStore, InMemoryStore};
/// use serde_json::json;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let store = InMemoryStore::new();
/// let ack = store.put(Document::new("task-1", json!({"title": "a"}))).await.unwrap();
/// assert!(ack.rev.starts_with("1-"));
/// # });
/// ```
#[derive(Debug)]
pub struct InMemoryStore {
    docs: RwLock<BTreeMap<String, Document>>,
    available: AtomicBool,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Creates a store holding previously persisted documents.
    #[must_use]
    pub fn with_documents(documents: Vec<Document>) -> Self {
        let docs = documents
            .into_iter()
            .filter(|doc| !doc.deleted)
            .map(|doc| (doc.id.clone(), doc))
            .collect();
        Self {
            docs: RwLock::new(docs),
            available: AtomicBool::new(true),
        }
    }

    /// Returns a copy of every stored document in id order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Document> {
        self.docs.read().values().cloned().collect()
    }

    /// Returns the number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    /// Returns true if no documents are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }

    /// Marks the store reachable or unreachable.
    ///
    /// While unreachable, every operation fails with
    /// [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Applies `docs` to a copy of the stored documents without publishing
    /// the copy. Items follow the same per-item rules as `bulk_docs`.
    pub(crate) fn stage(
        &self,
        docs: Vec<Document>,
    ) -> StoreResult<(BTreeMap<String, Document>, Vec<BulkItemResult>)> {
        self.ensure_available()?;
        let mut staged = self.docs.read().clone();
        let results = docs
            .into_iter()
            .map(|doc| {
                let id = doc.id.clone();
                let outcome = Self::write_locked(&mut staged, doc).map(|ack| ack.rev);
                BulkItemResult { id, outcome }
            })
            .collect();
        Ok((staged, results))
    }

    /// Publishes a copy produced by [`Self::stage`].
    pub(crate) fn commit(&self, staged: BTreeMap<String, Document>) {
        *self.docs.write() = staged;
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store is offline".into()))
        }
    }

    fn write_locked(docs: &mut BTreeMap<String, Document>, doc: Document) -> StoreResult<WriteAck> {
        let current = docs.get(&doc.id).and_then(|existing| existing.rev.clone());

        match (&current, &doc.rev) {
            (Some(current), Some(supplied)) if current == supplied => {}
            (None, None) if !doc.deleted => {}
            (None, _) if doc.deleted => return Err(StoreError::not_found(doc.id)),
            _ => return Err(StoreError::conflict(doc.id)),
        }

        let rev = next_revision(current.as_deref());
        if doc.deleted {
            docs.remove(&doc.id);
        } else {
            let mut stored = doc.clone();
            stored.rev = Some(rev.clone());
            docs.insert(doc.id.clone(), stored);
        }

        Ok(WriteAck { id: doc.id, rev })
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get(&self, id: &str) -> StoreResult<Document> {
        self.ensure_available()?;
        self.docs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(id))
    }

    async fn put(&self, doc: Document) -> StoreResult<WriteAck> {
        self.ensure_available()?;
        let doc = Document {
            deleted: false,
            ..doc
        };
        Self::write_locked(&mut self.docs.write(), doc)
    }

    async fn remove(&self, id: &str, rev: &str) -> StoreResult<WriteAck> {
        self.ensure_available()?;
        Self::write_locked(&mut self.docs.write(), Document::tombstone(id, rev))
    }

    async fn bulk_docs(&self, docs: Vec<Document>) -> StoreResult<Vec<BulkItemResult>> {
        self.ensure_available()?;
        let mut stored = self.docs.write();
        Ok(docs
            .into_iter()
            .map(|doc| {
                let id = doc.id.clone();
                let outcome = Self::write_locked(&mut stored, doc).map(|ack| ack.rev);
                BulkItemResult { id, outcome }
            })
            .collect())
    }

    async fn all_docs(&self, query: AllDocsQuery) -> StoreResult<Vec<AllDocsRow>> {
        self.ensure_available()?;
        let docs = self.docs.read();
        Ok(docs
            .values()
            .filter(|doc| query.contains(&doc.id))
            .map(|doc| AllDocsRow {
                id: doc.id.clone(),
                rev: doc.rev.clone().unwrap_or_default(),
                doc: query.include_docs.then(|| doc.clone()),
            })
            .collect())
    }
}
