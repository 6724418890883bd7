//! # driftsync Testkit
//!
//! Test utilities for driftsync.
//!
//! This crate provides:
//! - Entity builders and ready-made replicas
//! - A fault-injecting document store
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use driftsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn saves_survive_a_dropped_connection() {
//!     let replica = TestReplica::memory("task");
//!     replica.flaky.fail_next_calls(1);
//!     replica.save(&EntityBuilder::new("1").field("title", "a").build()).await.unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
