//! Document store trait definition.

use crate::document::{AllDocsQuery, AllDocsRow, BulkItemResult, Document, WriteAck};
use crate::error::StoreResult;
use async_trait::async_trait;

/// A revisioned document store.
///
/// Stores hold individually addressed JSON documents and enforce optimistic
/// concurrency: every mutation must name the revision it is based on.
///
/// # Invariants
///
/// - `put` of an existing document succeeds only with its current revision
/// - `put` of a new document succeeds only without a revision
/// - each successful mutation produces a new, higher-generation revision
/// - stale revisions fail with [`crate::StoreError::Conflict`]
/// - missing documents fail with [`crate::StoreError::NotFound`]
/// - `all_docs` returns rows in ascending id order
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing and ephemeral replicas
/// - [`super::FileStore`] - For persistent storage
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetches a document by id.
    async fn get(&self, id: &str) -> StoreResult<Document>;

    /// Creates or updates a document.
    async fn put(&self, doc: Document) -> StoreResult<WriteAck>;

    /// Removes a document at the given revision.
    async fn remove(&self, id: &str, rev: &str) -> StoreResult<WriteAck>;

    /// Writes many documents with per-item success semantics.
    ///
    /// A document flagged `deleted` is a removal. One item failing does not
    /// affect the others. The call itself fails only when the store cannot
    /// be reached at all.
    async fn bulk_docs(&self, docs: Vec<Document>) -> StoreResult<Vec<BulkItemResult>>;

    /// Scans an inclusive id range.
    async fn all_docs(&self, query: AllDocsQuery) -> StoreResult<Vec<AllDocsRow>>;
}
