//! Test fixtures and replica helpers.
//!
//! Provides builders for entities and ready-wired adapters over
//! fault-injecting or file-backed stores.

use crate::faults::FlakyStore;
use chrono::{DateTime, Duration, TimeZone, Utc};
use driftsync_core::{AdapterConfig, Entity, EntityStore, NoBackoff, RetryPolicy};
use driftsync_store::{FileStore, StoreHandle};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;

/// Returns a fixed point in time offset by `secs` seconds.
///
/// Keeps test timestamps deterministic and readable.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .expect("valid base timestamp")
        + Duration::seconds(secs)
}

/// Builder for test entities.
#[derive(Debug, Clone)]
pub struct EntityBuilder {
    entity: Entity,
}

impl EntityBuilder {
    /// Starts an entity created at [`at`]`(0)`.
    pub fn new(id: &str) -> Self {
        Self {
            entity: Entity::new(id, at(0)),
        }
    }

    /// Sets the creation time.
    pub fn created_at(mut self, time: DateTime<Utc>) -> Self {
        self.entity.created_at = time;
        self
    }

    /// Sets the update time.
    pub fn updated_at(mut self, time: DateTime<Utc>) -> Self {
        self.entity.updated_at = Some(time);
        self
    }

    /// Sets the revision token.
    pub fn rev(mut self, rev: &str) -> Self {
        self.entity.rev = Some(rev.to_string());
        self
    }

    /// Adds a field without a per-field timestamp.
    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.entity.fields.insert(key.to_string(), value.into());
        self
    }

    /// Adds a field edited at `time`.
    pub fn field_at(mut self, key: &str, value: impl Into<Value>, time: DateTime<Utc>) -> Self {
        self.entity.set_field(key, value, time);
        self
    }

    /// Finishes the entity.
    pub fn build(self) -> Entity {
        self.entity
    }
}

/// An adapter over a fault-injecting in-memory store.
///
/// Connection retries do not back off, so outage tests run instantly.
pub struct TestReplica {
    /// The fault-injecting store.
    pub flaky: Arc<FlakyStore>,
    /// The shared handle the adapter reads from.
    pub handle: Arc<StoreHandle>,
    /// The adapter.
    pub store: EntityStore,
}

impl TestReplica {
    /// Creates a replica for `kind`.
    pub fn memory(kind: &str) -> Self {
        let config = AdapterConfig::for_kind(kind)
            .expect("valid kind")
            .with_retry(RetryPolicy::default().with_backoff(NoBackoff));
        Self::with_config(config)
    }

    /// Creates a replica with an explicit adapter configuration.
    pub fn with_config(config: AdapterConfig) -> Self {
        let flaky = Arc::new(FlakyStore::memory());
        let handle = Arc::new(StoreHandle::new(flaky.clone()));
        let store = EntityStore::new(handle.clone(), config).expect("valid adapter config");
        Self {
            flaky,
            handle,
            store,
        }
    }
}

impl std::ops::Deref for TestReplica {
    type Target = EntityStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// A file-backed store in a temporary directory.
pub struct TempFileStore {
    /// The store.
    pub store: Arc<FileStore>,
    /// The temporary directory (kept alive to prevent cleanup).
    pub dir: TempDir,
}

impl TempFileStore {
    /// Opens a store at `replica.cbor` in a fresh temporary directory.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileStore::open(&dir.path().join("replica.cbor"))
            .expect("Failed to open file store");
        Self {
            store: Arc::new(store),
            dir,
        }
    }
}

impl Default for TempFileStore {
    fn default() -> Self {
        Self::new()
    }
}
