//! # driftsync Store
//!
//! Document store boundary and backends for driftsync.
//!
//! This crate provides the lowest-level storage abstraction: a store of
//! individually addressed JSON documents guarded by optimistic
//! concurrency. Stores do not know anything about entities, kinds or
//! conflict resolution.
//!
//! ## Design Principles
//!
//! - Every mutation names the revision it is based on
//! - Stale revisions fail with a distinguishable conflict error
//! - Connection-class failures are distinguishable from everything else
//! - Backends are `Send + Sync` and shared behind a swappable handle
//!
//! ## Available Backends
//!
//! - [`InMemoryStore`] - For testing and ephemeral replicas
//! - [`FileStore`] - For persistent storage in a single CBOR snapshot
//!
//! ## Example
//!
//! ```rust
//! use driftsync_store::{AllDocsQuery, Document, DocumentStore, InMemoryStore};
//! use serde_json::json;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = InMemoryStore::new();
//! let ack = store.put(Document::new("task-1", json!({"title": "a"}))).await.unwrap();
//! store
//!     .put(Document::new("task-1", json!({"title": "b"})).with_rev(Some(ack.rev)))
//!     .await
//!     .unwrap();
//!
//! let rows = store.all_docs(AllDocsQuery::prefix("task-")).await.unwrap();
//! assert_eq!(rows.len(), 1);
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod document;
mod error;
mod file;
mod handle;
mod memory;

pub use backend::DocumentStore;
pub use document::{
    next_revision, revision_generation, AllDocsQuery, AllDocsRow, BulkItemResult, Document,
    WriteAck, SCAN_SENTINEL,
};
pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use handle::StoreHandle;
pub use memory::InMemoryStore;
