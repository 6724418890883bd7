//! Deterministic document ids for entities.

use crate::error::{CoreError, CoreResult};
use driftsync_store::{AllDocsQuery, SCAN_SENTINEL};
use std::fmt;

/// Separator between the kind and the entity id.
const SEPARATOR: char = '-';

/// A validated entity kind, the namespace of a document id.
///
/// Kinds are non-empty ASCII alphanumerics or underscores. They never contain
/// the separator, so `"<kind>-"` prefixes of two kinds never overlap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKind(String);

impl EntityKind {
    /// Validates and creates a kind.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidId`] for an empty kind or one with
    /// characters outside `[A-Za-z0-9_]`.
    pub fn new(kind: impl Into<String>) -> CoreResult<Self> {
        let kind = kind.into();
        if kind.is_empty() {
            return Err(CoreError::invalid_id(kind, "kind is empty"));
        }
        if !kind.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(CoreError::invalid_id(
                kind,
                "kind must be ASCII alphanumeric or underscore",
            ));
        }
        Ok(Self(kind))
    }

    /// Returns the kind as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the `"<kind>-"` prefix shared by every document of this kind.
    pub fn prefix(&self) -> String {
        format!("{}{SEPARATOR}", self.0)
    }

    /// Returns a range query covering exactly this kind's documents.
    pub fn scan(&self) -> AllDocsQuery {
        AllDocsQuery::prefix(&self.prefix())
    }

    /// Derives the document id of an entity.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidId`] if `entity_id` is empty or contains
    /// control characters or the scan sentinel.
    pub fn doc_id(&self, entity_id: &str) -> CoreResult<String> {
        validate_entity_id(entity_id)?;
        Ok(format!("{}{SEPARATOR}{entity_id}", self.0))
    }

    /// Recovers the entity id from a document id of this kind.
    pub fn entity_id<'a>(&self, doc_id: &'a str) -> Option<&'a str> {
        doc_id
            .strip_prefix(self.0.as_str())?
            .strip_prefix(SEPARATOR)
            .filter(|id| !id.is_empty())
    }

    /// Returns true if `doc_id` belongs to this kind's namespace.
    pub fn owns(&self, doc_id: &str) -> bool {
        self.entity_id(doc_id).is_some()
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Checks that an entity id can be embedded in a document id.
///
/// # Errors
///
/// Returns [`CoreError::InvalidId`] describing the first violation.
pub fn validate_entity_id(entity_id: &str) -> CoreResult<()> {
    if entity_id.is_empty() {
        return Err(CoreError::invalid_id(entity_id, "entity id is empty"));
    }
    if entity_id.contains(SCAN_SENTINEL) {
        return Err(CoreError::invalid_id(
            entity_id,
            "entity id contains the range scan sentinel",
        ));
    }
    if entity_id.chars().any(char::is_control) {
        return Err(CoreError::invalid_id(
            entity_id,
            "entity id contains control characters",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn kind_validation() {
        assert!(EntityKind::new("task").is_ok());
        assert!(EntityKind::new("time_block2").is_ok());
        assert!(EntityKind::new("").is_err());
        assert!(EntityKind::new("task-list").is_err());
        assert!(EntityKind::new("täsk").is_err());
    }

    #[test]
    fn derivation_round_trip() {
        let kind = EntityKind::new("task").unwrap();
        let doc_id = kind.doc_id("42-a").unwrap();
        assert_eq!(doc_id, "task-42-a");
        assert_eq!(kind.entity_id(&doc_id), Some("42-a"));
    }

    #[test]
    fn foreign_ids_are_not_owned() {
        let kind = EntityKind::new("task").unwrap();
        assert!(!kind.owns("tasks"));
        assert!(!kind.owns("task-"));
        assert!(!kind.owns("note-1"));
        assert!(kind.owns("task-1"));
    }

    #[test]
    fn entity_id_rules() {
        assert!(validate_entity_id("").is_err());
        assert!(validate_entity_id("a\u{10ffff}").is_err());
        assert!(validate_entity_id("a\nb").is_err());
        assert!(validate_entity_id("ünïcode ok").is_ok());
    }

    proptest! {
        #[test]
        fn doc_ids_stay_inside_the_scan(id in "[^\\p{Cc}\u{10ffff}]{1,24}") {
            let kind = EntityKind::new("task").unwrap();
            let doc_id = kind.doc_id(&id).unwrap();
            prop_assert!(kind.scan().contains(&doc_id));
            prop_assert_eq!(kind.entity_id(&doc_id), Some(id.as_str()));
        }
    }
}
