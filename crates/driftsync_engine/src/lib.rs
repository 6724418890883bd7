//! # driftsync Engine
//!
//! Sync orchestration for driftsync replicas.
//!
//! This crate provides:
//! - [`SyncCircuitBreaker`]: single flight, per-source debouncing, a hard
//!   timeout and a circuit that opens after repeated failures
//! - Health scoring with a one-time self-protecting rollback
//! - [`SyncCoordinator`]: the composition root that queues local edits,
//!   merges remote changes and resolves conflicts
//! - [`SyncEvents`]: a typed event channel
//!
//! ## Key Invariants
//!
//! - Rejected attempts never count as failures
//! - At most one attempt runs at a time, and a cancelled caller releases it
//! - Remote changes are never re-queued as local changes
//! - Pending local changes survive rejected and failed attempts
//!
//! ## Example
//!
//! ```rust
//! use driftsync_core::{AdapterConfig, Entity};
//! use driftsync_engine::{CoordinatorConfig, SyncCoordinator};
//! use driftsync_store::{InMemoryStore, StoreHandle};
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let handle = Arc::new(StoreHandle::new(Arc::new(InMemoryStore::new())));
//! let config = CoordinatorConfig::new(AdapterConfig::for_kind("task").unwrap());
//! let coordinator = SyncCoordinator::new(handle, config).unwrap();
//!
//! let entity = Entity::new("1", chrono::Utc::now()).with_field("title", "Write docs");
//! assert!(coordinator.record_local_change(entity).await.is_synced());
//! assert_eq!(coordinator.load_all().await.unwrap().len(), 1);
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod breaker;
mod config;
mod coordinator;
mod error;
mod events;
pub mod health;
mod source;

pub use breaker::{BreakerStats, CircuitState, SyncCircuitBreaker};
pub use config::{BreakerConfig, CoordinatorConfig};
pub use coordinator::{SyncCoordinator, SyncOutcome, SyncReport};
pub use error::{BreakerError, Rejection, SyncError, SyncResult};
pub use events::{SyncEvent, SyncEvents};
pub use source::SyncSource;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
