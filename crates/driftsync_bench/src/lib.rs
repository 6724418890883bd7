//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use driftsync_core::Entity;
use serde_json::json;

fn base_time() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_default()
}

/// Generate an entity with `fields` domain fields, edited `secs` after the base time.
pub fn entity(id: usize, fields: usize, secs: i64) -> Entity {
    let at = base_time() + Duration::seconds(secs);
    let mut entity = Entity::new(id.to_string(), base_time());
    for i in 0..fields {
        entity.set_field(format!("field_{i}"), json!(format!("value {i} of {id}")), at);
    }
    entity
}

/// Generate a local/remote pair where every other field disagrees and
/// remote is newer.
pub fn conflicting_pair(fields: usize) -> (Entity, Entity) {
    let local = entity(1, fields, 10);
    let mut remote = local.clone();
    let later = base_time() + Duration::seconds(20);
    for i in (0..fields).step_by(2) {
        remote.set_field(format!("field_{i}"), json!(format!("remote {i}")), later);
    }
    (local, remote)
}

/// Generate a batch of entities with distinct ids.
pub fn generate_entities(count: usize, fields: usize) -> Vec<Entity> {
    (0..count).map(|i| entity(i, fields, i as i64)).collect()
}
