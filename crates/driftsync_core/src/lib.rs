//! # driftsync Core
//!
//! Entity model and per-entity storage adapter for driftsync.
//!
//! This crate provides:
//! - The [`Entity`] model with timestamp rehydration
//! - Deterministic `"<kind>-<id>"` document ids ([`EntityKind`])
//! - Bounded retry with pluggable backoff ([`retry`])
//! - The per-entity storage adapter ([`EntityStore`])
//!
//! ## Key Invariants
//!
//! - One document per entity, never an aggregate
//! - Writes always carry the store's current revision
//! - A revision conflict is retried once before it reaches the caller
//! - Connection failures re-acquire the live store before retrying
//! - Legacy migration never loses an entity
//!
//! ## Example
//!
//! ```rust
//! use driftsync_core::{AdapterConfig, Entity, EntityStore};
//! use driftsync_store::{InMemoryStore, StoreHandle};
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let handle = Arc::new(StoreHandle::new(Arc::new(InMemoryStore::new())));
//! let tasks = EntityStore::new(handle, AdapterConfig::for_kind("task").unwrap()).unwrap();
//!
//! let task = Entity::new("1", chrono::Utc::now()).with_field("title", "Write report");
//! tasks.save(&task).await.unwrap();
//!
//! let loaded = tasks.load_all().await.unwrap();
//! assert_eq!(loaded[0].field("title").unwrap(), "Write report");
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod config;
mod entity;
mod error;
mod id;
pub mod retry;

pub use adapter::{EntityStore, MigrationReport, SaveOutcome, SweepReport};
pub use config::AdapterConfig;
pub use entity::{timestamp, Entity};
pub use error::{CoreError, CoreResult};
pub use id::{validate_entity_id, EntityKind};
pub use retry::{Backoff, ExponentialBackoff, LinearBackoff, NoBackoff, RetryPolicy};
