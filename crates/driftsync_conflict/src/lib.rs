//! # driftsync Conflict
//!
//! Conflict detection and resolution for driftsync.
//!
//! This crate provides:
//! - Conflict classification (delete, version, field)
//! - Built-in strategies: last-write-wins, local/remote priority and
//!   field-level merge
//! - Pluggable custom strategies that can never break a sync
//! - A bounded, immutable audit trail with derived statistics
//!
//! ## Key Invariants
//!
//! - Last-write-wins picks the same content whichever side is called local
//! - A deletion never silently beats data unless a priority strategy says so
//! - A failing custom strategy degrades to last-write-wins, never to an error
//! - Audit records are append-only; only `clear_history` removes them
//!
//! The resolver performs no I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod detect;
mod error;
mod record;
mod resolver;
mod stats;
mod strategy;

pub use config::ResolverConfig;
pub use detect::{confidence_for, detect_conflict, differing_fields, ConflictKind, Detection};
pub use error::{ResolveError, ResolveResult};
pub use record::{ConflictLog, ConflictRecord};
pub use resolver::{ConflictResolver, Resolution};
pub use stats::ConflictStatistics;
pub use strategy::{
    compare_recency, last_write_wins, merge_fields, ResolutionStrategy, Side, Strategy,
};
