//! Documents, revisions and query types shared by every backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upper sentinel for prefix range scans.
///
/// Ids are compared by code point, so the highest scalar value bounds every
/// id sharing a prefix. Ids must never contain this character, otherwise a
/// prefix scan could miss documents.
pub const SCAN_SENTINEL: char = char::MAX;

/// A persisted, individually addressed document.
///
/// `rev` is assigned by the store. A write must carry the store's current
/// revision for an existing document and no revision for a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document id.
    pub id: String,
    /// Current revision token, `None` for a document never written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// Marks a removal when submitted through a bulk write.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
    /// Serialized payload.
    #[serde(default)]
    pub body: Value,
}

impl Document {
    /// Creates a new, never-written document.
    pub fn new(id: impl Into<String>, body: Value) -> Self {
        Self {
            id: id.into(),
            rev: None,
            deleted: false,
            body,
        }
    }

    /// Creates a removal marker for a bulk write.
    pub fn tombstone(id: impl Into<String>, rev: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: Some(rev.into()),
            deleted: true,
            body: Value::Null,
        }
    }

    /// Sets the revision the write is based on.
    pub fn with_rev(mut self, rev: Option<String>) -> Self {
        self.rev = rev;
        self
    }

    /// Returns the generation number of this document's revision.
    pub fn generation(&self) -> Option<u64> {
        self.rev.as_deref().and_then(revision_generation)
    }
}

/// Acknowledgement of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAck {
    /// Document id.
    pub id: String,
    /// Revision produced by the write.
    pub rev: String,
}

/// Per-item result of a bulk write.
#[derive(Debug)]
pub struct BulkItemResult {
    /// Document id.
    pub id: String,
    /// New revision on success, the item's own error otherwise.
    pub outcome: Result<String, crate::StoreError>,
}

impl BulkItemResult {
    /// Returns true if this item was written.
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Key-range query over document ids.
///
/// Bounds are inclusive and compared lexicographically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllDocsQuery {
    /// Lower bound.
    pub start_key: Option<String>,
    /// Upper bound.
    pub end_key: Option<String>,
    /// Whether to return document bodies.
    pub include_docs: bool,
}

impl AllDocsQuery {
    /// Creates a query over every document.
    pub fn all() -> Self {
        Self::default()
    }

    /// Creates a query over every id starting with `prefix`.
    pub fn prefix(prefix: &str) -> Self {
        Self {
            start_key: Some(prefix.to_string()),
            end_key: Some(format!("{prefix}{SCAN_SENTINEL}")),
            include_docs: false,
        }
    }

    /// Requests document bodies.
    pub fn with_docs(mut self) -> Self {
        self.include_docs = true;
        self
    }

    /// Returns true if `id` falls inside the range.
    pub fn contains(&self, id: &str) -> bool {
        let above = self.start_key.as_deref().map_or(true, |start| id >= start);
        let below = self.end_key.as_deref().map_or(true, |end| id <= end);
        above && below
    }
}

/// A row returned by a range query.
#[derive(Debug, Clone, PartialEq)]
pub struct AllDocsRow {
    /// Document id.
    pub id: String,
    /// Current revision.
    pub rev: String,
    /// The document, when requested.
    pub doc: Option<Document>,
}

/// Parses the leading generation number of a `"<n>-<hash>"` revision.
///
/// Returns `None` when the token has no numeric prefix.
pub fn revision_generation(rev: &str) -> Option<u64> {
    let digits: &str = rev.split('-').next().unwrap_or_default();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Produces the revision that follows `previous`.
pub fn next_revision(previous: Option<&str>) -> String {
    let generation = previous.and_then(revision_generation).unwrap_or(0) + 1;
    let hash = uuid::Uuid::new_v4().simple().to_string();
    format!("{generation}-{}", &hash[..16])
}
