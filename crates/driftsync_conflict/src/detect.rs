//! Conflict detection between two snapshots of an entity.

use driftsync_core::Entity;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Kind of disagreement between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    /// The snapshots agree.
    None,
    /// Exactly one side is absent.
    Delete,
    /// The revision tokens differ.
    Version,
    /// Same revision, different field values.
    Field,
}

impl ConflictKind {
    /// Returns the lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::None => "none",
            ConflictKind::Delete => "delete",
            ConflictKind::Version => "version",
            ConflictKind::Field => "field",
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`detect_conflict`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    /// Kind of conflict.
    pub kind: ConflictKind,
    /// Domain fields whose values differ, sorted.
    pub fields: Vec<String>,
    /// Confidence that an automatic resolution is right, `0.1..=1.0`.
    pub confidence: f64,
}

impl Detection {
    fn new(kind: ConflictKind, fields: Vec<String>) -> Self {
        let confidence = confidence_for(fields.len());
        Self {
            kind,
            fields,
            confidence,
        }
    }

    /// Returns true if the snapshots disagree.
    pub fn is_conflict(&self) -> bool {
        self.kind != ConflictKind::None
    }
}

/// Classifies the disagreement between `local` and `remote`.
pub fn detect_conflict(local: Option<&Entity>, remote: Option<&Entity>) -> Detection {
    match (local, remote) {
        (None, None) => Detection::new(ConflictKind::None, Vec::new()),
        (Some(_), None) | (None, Some(_)) => Detection::new(ConflictKind::Delete, Vec::new()),
        (Some(local), Some(remote)) => {
            let fields = differing_fields(local, remote);
            if local.rev != remote.rev {
                Detection::new(ConflictKind::Version, fields)
            } else if !fields.is_empty() {
                Detection::new(ConflictKind::Field, fields)
            } else {
                Detection::new(ConflictKind::None, fields)
            }
        }
    }
}

/// Returns the sorted names of domain fields whose values differ.
///
/// A field present on one side only counts as differing.
pub fn differing_fields(local: &Entity, remote: &Entity) -> Vec<String> {
    let keys: BTreeSet<&String> = local.fields.keys().chain(remote.fields.keys()).collect();
    keys.into_iter()
        .filter(|key| local.fields.get(*key) != remote.fields.get(*key))
        .cloned()
        .collect()
}

/// `max(0.1, 1 - 0.1 * n)`.
pub fn confidence_for(differing: usize) -> f64 {
    (1.0 - 0.1 * differing as f64).max(0.1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn entity(rev: Option<&str>) -> Entity {
        let mut e = Entity::new("1", Utc.timestamp_opt(0, 0).unwrap())
            .with_field("title", "a")
            .with_field("done", false);
        e.rev = rev.map(str::to_string);
        e
    }

    #[test]
    fn absent_sides() {
        let e = entity(None);
        assert_eq!(detect_conflict(None, None).kind, ConflictKind::None);
        assert_eq!(detect_conflict(Some(&e), None).kind, ConflictKind::Delete);
        assert_eq!(detect_conflict(None, Some(&e)).kind, ConflictKind::Delete);
    }

    #[test]
    fn version_conflict_lists_fields() {
        let local = entity(Some("2-a"));
        let remote = entity(Some("3-b")).with_field("title", "b");

        let detection = detect_conflict(Some(&local), Some(&remote));
        assert_eq!(detection.kind, ConflictKind::Version);
        assert_eq!(detection.fields, vec!["title"]);
        assert!((detection.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn same_rev_different_values() {
        let local = entity(Some("2-a"));
        let remote = entity(Some("2-a"))
            .with_field("done", true)
            .with_field("notes", "x");

        let detection = detect_conflict(Some(&local), Some(&remote));
        assert_eq!(detection.kind, ConflictKind::Field);
        assert_eq!(detection.fields, vec!["done", "notes"]);
    }

    #[test]
    fn identical_snapshots() {
        let e = entity(Some("2-a"));
        let detection = detect_conflict(Some(&e), Some(&e.clone()));
        assert!(!detection.is_conflict());
        assert_eq!(detection.confidence, 1.0);
    }

    #[test]
    fn confidence_floor() {
        assert_eq!(confidence_for(0), 1.0);
        assert!((confidence_for(3) - 0.7).abs() < 1e-9);
        assert_eq!(confidence_for(9), 0.1);
        assert_eq!(confidence_for(40), 0.1);
    }
}
