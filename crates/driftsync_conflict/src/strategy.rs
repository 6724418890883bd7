//! Resolution strategies.

use crate::error::ResolveResult;
use driftsync_core::Entity;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// How a conflict is settled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Keep the more recently written side wholesale.
    #[default]
    LastWriteWins,
    /// Always keep the local side.
    LocalPriority,
    /// Always keep the remote side.
    RemotePriority,
    /// Merge field by field using per-field timestamps.
    FieldLevel,
    /// A registered [`ResolutionStrategy`].
    Custom(String),
}

impl Strategy {
    /// Returns the strategy name used in audit records.
    pub fn name(&self) -> &str {
        match self {
            Strategy::LastWriteWins => "last_write_wins",
            Strategy::LocalPriority => "local_priority",
            Strategy::RemotePriority => "remote_priority",
            Strategy::FieldLevel => "field_level",
            Strategy::Custom(name) => name,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Strategy {
    type Err = std::convert::Infallible;

    /// Parses a built-in name; anything else names a custom strategy.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "last_write_wins" | "lww" => Strategy::LastWriteWins,
            "local_priority" | "local" => Strategy::LocalPriority,
            "remote_priority" | "remote" => Strategy::RemotePriority,
            "field_level" | "field" => Strategy::FieldLevel,
            other => Strategy::Custom(other.to_string()),
        })
    }
}

/// The side a resolution kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// The local snapshot.
    Local,
    /// The remote snapshot.
    Remote,
    /// A combination of both.
    Merged,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Local => "local",
            Side::Remote => "remote",
            Side::Merged => "merged",
        })
    }
}

/// A user-supplied resolution strategy.
///
/// Strategies only see conflicts where both sides exist. Returning an error
/// or panicking makes the resolver fall back to last-write-wins.
pub trait ResolutionStrategy: Send + Sync {
    /// Name under which the strategy is registered.
    fn name(&self) -> &str;

    /// Produces the entity to keep.
    fn resolve(&self, local: &Entity, remote: &Entity, context: &str) -> ResolveResult<Entity>;
}

/// Orders two snapshots by recency: update time first, then the revision
/// generation.
///
/// A side with an update time counts as newer than one without.
pub fn compare_recency(local: &Entity, remote: &Entity) -> Ordering {
    match (local.updated_at, remote.updated_at) {
        (Some(l), Some(r)) if l != r => return l.cmp(&r),
        (Some(_), None) => return Ordering::Greater,
        (None, Some(_)) => return Ordering::Less,
        _ => {}
    }
    local.revision_generation().cmp(&remote.revision_generation())
}

/// Picks the side last-write-wins keeps.
///
/// Equal recency is broken by the revision token, then by content, so
/// swapping the labels of the two snapshots never changes which content
/// wins.
pub fn last_write_wins(local: &Entity, remote: &Entity) -> Side {
    let ordering = compare_recency(local, remote)
        .then_with(|| local.rev.cmp(&remote.rev))
        .then_with(|| canonical(local).cmp(&canonical(remote)));
    match ordering {
        Ordering::Less => Side::Remote,
        Ordering::Greater | Ordering::Equal => Side::Local,
    }
}

fn canonical(entity: &Entity) -> String {
    // Object keys are sorted, so equal content serializes identically.
    serde_json::to_string(entity).unwrap_or_default()
}

/// Merges `remote` into `local` field by field.
///
/// A field takes the remote value only when remote's per-field timestamp is
/// strictly newer than local's. Returns the merged entity and whether any
/// remote value was taken.
pub fn merge_fields(local: &Entity, remote: &Entity, fields: &[String]) -> (Entity, bool) {
    let mut merged = local.clone();
    let mut took_remote = false;

    for field in fields {
        let Some(&remote_at) = remote.field_updated_at.get(field) else {
            continue;
        };
        if remote_at <= local.field_modified(field) {
            continue;
        }
        match remote.fields.get(field) {
            Some(value) => merged.fields.insert(field.clone(), value.clone()),
            None => merged.fields.remove(field),
        };
        merged.field_updated_at.insert(field.clone(), remote_at);
        took_remote = true;
    }

    merged.updated_at = local.updated_at.max(remote.updated_at);
    (merged, took_remote)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn entity(updated: Option<i64>, rev: Option<&str>) -> Entity {
        let mut e = Entity::new("1", at(0));
        e.updated_at = updated.map(at);
        e.rev = rev.map(str::to_string);
        e
    }

    #[test]
    fn names_round_trip() {
        for strategy in [
            Strategy::LastWriteWins,
            Strategy::LocalPriority,
            Strategy::RemotePriority,
            Strategy::FieldLevel,
            Strategy::Custom("prefer_done".into()),
        ] {
            assert_eq!(strategy.name().parse::<Strategy>().unwrap(), strategy);
        }
        assert_eq!("lww".parse::<Strategy>().unwrap(), Strategy::LastWriteWins);
    }

    #[test]
    fn update_time_beats_revision() {
        let local = entity(Some(10), Some("1-a"));
        let remote = entity(Some(20), Some("9-b"));
        assert_eq!(last_write_wins(&local, &remote), Side::Remote);
        assert_eq!(last_write_wins(&remote, &local), Side::Local);
    }

    #[test]
    fn revision_prefix_is_the_fallback() {
        let local = entity(None, Some("3-a"));
        let remote = entity(None, Some("12-b"));
        assert_eq!(compare_recency(&local, &remote), Ordering::Less);
        assert_eq!(last_write_wins(&local, &remote), Side::Remote);
    }

    #[test]
    fn timestamp_outranks_revision_only() {
        let local = entity(Some(1), None);
        let remote = entity(None, Some("40-x"));
        assert_eq!(last_write_wins(&local, &remote), Side::Local);
    }

    #[test]
    fn ties_break_on_content() {
        let a = entity(Some(5), Some("2-a")).with_field("title", "apple");
        let b = entity(Some(5), Some("2-a")).with_field("title", "banana");
        assert_eq!(last_write_wins(&a, &b), Side::Remote);
        assert_eq!(last_write_wins(&b, &a), Side::Local);
    }

    #[test]
    fn field_merge_takes_only_newer_remote_fields() {
        let mut local = entity(Some(10), Some("2-a"))
            .with_field("notes", "local notes")
            .with_field("priority", 1);
        local.set_field("title", "A", at(10));

        let mut remote = entity(Some(5), Some("3-b"))
            .with_field("notes", "remote notes")
            .with_field("priority", 3);
        remote.set_field("title", "B", at(20));
        remote.field_updated_at.insert("notes".into(), at(3));

        let fields = vec!["notes".to_string(), "priority".to_string(), "title".to_string()];
        let (merged, took_remote) = merge_fields(&local, &remote, &fields);

        assert!(took_remote);
        assert_eq!(merged.field("title"), Some(&json!("B")));
        assert_eq!(merged.field("notes"), Some(&json!("local notes")));
        assert_eq!(merged.field("priority"), Some(&json!(1)));
        assert_eq!(merged.updated_at, Some(at(20)));
    }

    #[test]
    fn field_merge_applies_remote_removal() {
        let local = entity(Some(1), None).with_field("tag", "x");
        let mut remote = entity(Some(1), None);
        remote.field_updated_at.insert("tag".into(), at(9));

        let (merged, took_remote) = merge_fields(&local, &remote, &["tag".to_string()]);
        assert!(took_remote);
        assert!(merged.field("tag").is_none());
    }
}
