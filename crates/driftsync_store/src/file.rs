//! File-backed document store for persistent replicas.

use crate::backend::DocumentStore;
use crate::document::{AllDocsQuery, AllDocsRow, BulkItemResult, Document, WriteAck};
use crate::error::{StoreError, StoreResult};
use crate::memory::InMemoryStore;
use async_trait::async_trait;
use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A persistent document store.
///
/// Documents live in memory and are mirrored to a single CBOR snapshot
/// file. A mutation is applied to a staged copy, the copy is written to a
/// temporary file and renamed into place, and only then does it become
/// visible to readers. A crash leaves either the old or the new snapshot,
/// never a torn one, and a failed write leaves the store unchanged.
///
/// Snapshot writes run on tokio's blocking pool, so mutations must be
/// called from within a tokio runtime.
///
/// An exclusive lock on a sidecar `.lock` file prevents two processes from
/// opening the same store.
///
/// # Example
///
/// ```no_run
/// use driftsync_store::FileStore;
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("replica.cbor")).unwrap();
/// println!("{} documents", store.len());
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: InMemoryStore,
    writer: Mutex<()>,
    _lock_file: File,
}

impl FileStore {
    /// Opens or creates a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is locked by another process, the
    /// snapshot cannot be read, or it is not a valid snapshot.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(Self::lock_path(path))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Backend(format!("store {path:?} is locked by another process")))?;

        let documents = if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            ciborium::from_reader::<Vec<Document>, _>(reader)
                .map_err(|e| StoreError::Serialization(format!("invalid snapshot {path:?}: {e:?}")))?
        } else {
            Vec::new()
        };

        debug!(path = ?path, documents = documents.len(), "opened file store");

        Ok(Self {
            path: path.to_path_buf(),
            inner: InMemoryStore::with_documents(documents),
            writer: Mutex::new(()),
            _lock_file: lock_file,
        })
    }

    /// Returns the snapshot path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of stored documents.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if no documents are stored.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn lock_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Stages `docs`, persists the staged snapshot and publishes it.
    ///
    /// Writers are serialized so each snapshot contains every earlier
    /// committed write.
    async fn apply(&self, docs: Vec<Document>) -> StoreResult<Vec<BulkItemResult>> {
        let _writer = self.writer.lock().await;
        let (staged, results) = self.inner.stage(docs)?;
        if results.iter().any(BulkItemResult::is_ok) {
            if let Err(err) = self.persist(&staged).await {
                warn!(path = ?self.path, error = %err, "snapshot write failed; mutation discarded");
                return Err(err);
            }
            self.inner.commit(staged);
        }
        Ok(results)
    }

    async fn persist(&self, staged: &BTreeMap<String, Document>) -> StoreResult<()> {
        let snapshot: Vec<&Document> = staged.values().collect();
        let mut bytes = Vec::new();
        ciborium::into_writer(&snapshot, &mut bytes)
            .map_err(|e| StoreError::Serialization(format!("{e:?}")))?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_snapshot(&path, &bytes))
            .await
            .map_err(|e| StoreError::Backend(format!("snapshot writer failed: {e}")))??;
        Ok(())
    }
}

fn write_snapshot(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut file = File::create(&tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp_path, path)
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn get(&self, id: &str) -> StoreResult<Document> {
        self.inner.get(id).await
    }

    async fn put(&self, doc: Document) -> StoreResult<WriteAck> {
        let doc = Document {
            deleted: false,
            ..doc
        };
        single(self.apply(vec![doc]).await?)
    }

    async fn remove(&self, id: &str, rev: &str) -> StoreResult<WriteAck> {
        single(self.apply(vec![Document::tombstone(id, rev)]).await?)
    }

    async fn bulk_docs(&self, docs: Vec<Document>) -> StoreResult<Vec<BulkItemResult>> {
        self.apply(docs).await
    }

    async fn all_docs(&self, query: AllDocsQuery) -> StoreResult<Vec<AllDocsRow>> {
        self.inner.all_docs(query).await
    }
}

fn single(results: Vec<BulkItemResult>) -> StoreResult<WriteAck> {
    let BulkItemResult { id, outcome } = results
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::Backend("empty write result".into()))?;
    outcome.map(|rev| WriteAck { id, rev })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replica.cbor");

        let rev = {
            let store = FileStore::open(&path).unwrap();
            store
                .put(Document::new("task-1", json!({"title": "persist me", "n": 3})))
                .await
                .unwrap()
                .rev
        };

        let store = FileStore::open(&path).unwrap();
        let doc = store.get("task-1").await.unwrap();
        assert_eq!(doc.rev.as_deref(), Some(rev.as_str()));
        assert_eq!(doc.body["title"], "persist me");
        assert_eq!(doc.body["n"], 3);
    }

    #[tokio::test]
    async fn file_store_removal_is_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replica.cbor");

        {
            let store = FileStore::open(&path).unwrap();
            let ack = store.put(Document::new("task-1", json!({}))).await.unwrap();
            store.put(Document::new("task-2", json!({}))).await.unwrap();
            store.remove("task-1", &ack.rev).await.unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get("task-1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn failed_snapshot_write_leaves_store_unchanged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replica.cbor");
        let store = FileStore::open(&path).unwrap();
        let ack = store.put(Document::new("task-1", json!({"v": 1}))).await.unwrap();

        // A directory where the temporary snapshot goes makes every write fail.
        let blocker = dir.path().join("replica.cbor.tmp");
        fs::create_dir(&blocker).unwrap();

        let update = Document::new("task-1", json!({"v": 2})).with_rev(Some(ack.rev.clone()));
        assert!(matches!(store.put(update).await, Err(StoreError::Io(_))));
        assert!(store.put(Document::new("task-2", json!({}))).await.is_err());
        assert!(store.remove("task-1", &ack.rev).await.is_err());

        let doc = store.get("task-1").await.unwrap();
        assert_eq!(doc.body["v"], 1);
        assert_eq!(doc.rev.as_deref(), Some(ack.rev.as_str()));
        assert!(store.get("task-2").await.unwrap_err().is_not_found());
        assert_eq!(store.len(), 1);

        fs::remove_dir(&blocker).unwrap();
        store.put(Document::new("task-2", json!({}))).await.unwrap();
        drop(store);
        assert_eq!(FileStore::open(&path).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn file_store_conflicts_do_not_touch_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replica.cbor");
        let store = FileStore::open(&path).unwrap();
        store.put(Document::new("task-1", json!({}))).await.unwrap();
        let written = fs::metadata(&path).unwrap().modified().unwrap();

        let stale = Document::new("task-1", json!({})).with_rev(Some("1-stale".into()));
        assert!(store.put(stale).await.unwrap_err().is_conflict());
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), written);
    }

    #[test]
    fn file_store_is_exclusive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replica.cbor");

        let _first = FileStore::open(&path).unwrap();
        let second = FileStore::open(&path);
        assert!(matches!(second, Err(StoreError::Backend(_))));
    }

    #[test]
    fn file_store_rejects_garbage_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replica.cbor");
        fs::write(&path, b"definitely not cbor").unwrap();

        let result = FileStore::open(&path);
        assert!(matches!(result, Err(StoreError::Serialization(_))));
    }

    #[test]
    fn file_store_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("replica.cbor");

        let store = FileStore::open(&path).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.path(), path.as_path());
    }
}
