//! Audit records and the bounded history that holds them.

use crate::detect::ConflictKind;
use crate::strategy::Side;
use chrono::{DateTime, Utc};
use driftsync_core::Entity;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use uuid::Uuid;

/// An immutable account of one resolved conflict.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    /// Record id.
    pub id: Uuid,
    /// When the conflict was resolved.
    pub resolved_at: DateTime<Utc>,
    /// Caller-supplied label, e.g. `"remote:task-7"`.
    pub context: String,
    /// Id of the contended entity.
    pub entity_id: String,
    /// Kind of conflict.
    pub kind: ConflictKind,
    /// Local snapshot.
    pub local: Option<Entity>,
    /// Remote snapshot.
    pub remote: Option<Entity>,
    /// The side that was kept.
    pub chosen: Side,
    /// Fields that disagreed.
    pub fields: Vec<String>,
    /// Name of the strategy that produced the outcome.
    pub strategy: String,
    /// Confidence of the outcome.
    pub confidence: f64,
    /// Whether a custom strategy failed and last-write-wins was used.
    pub fell_back: bool,
}

/// Ring buffer of conflict records; the oldest record is evicted first.
#[derive(Debug)]
pub struct ConflictLog {
    records: Mutex<VecDeque<ConflictRecord>>,
    capacity: usize,
}

impl ConflictLog {
    /// Creates a log holding at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Appends a record, evicting the oldest when full.
    pub fn push(&self, record: ConflictRecord) {
        if self.capacity == 0 {
            return;
        }
        let mut records = self.records.lock();
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Returns every record, oldest first.
    pub fn snapshot(&self) -> Vec<ConflictRecord> {
        self.records.lock().iter().cloned().collect()
    }

    /// Returns up to `n` records, newest first.
    pub fn recent(&self, n: usize) -> Vec<ConflictRecord> {
        self.records.lock().iter().rev().take(n).cloned().collect()
    }

    /// Returns the number of records held.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if no records are held.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Returns the maximum number of records held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drops every record.
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}
