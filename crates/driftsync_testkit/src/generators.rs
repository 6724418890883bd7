//! Property-based test generators using proptest.
//!
//! Provides strategies for generating entities and contending entity
//! pairs that keep the id and timestamp invariants.

use crate::fixtures::at;
use chrono::{DateTime, Utc};
use driftsync_core::Entity;
use proptest::prelude::*;
use serde_json::Value;
use std::collections::BTreeMap;

/// Strategy for generating valid entity ids.
pub fn entity_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9][a-zA-Z0-9_.:-]{0,23}").expect("Invalid regex")
}

/// Strategy for timestamps within a year of the fixture base time.
pub fn timestamp_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..31_536_000).prop_map(at)
}

/// Strategy for scalar JSON field values.
pub fn field_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i32>().prop_map(Value::from),
        "[a-z ]{0,12}".prop_map(Value::from),
    ]
}

/// Strategy for domain field maps drawn from a small key set, so that
/// independently generated entities overlap.
pub fn fields_strategy() -> impl Strategy<Value = BTreeMap<String, Value>> {
    prop::collection::btree_map(
        prop::sample::select(vec!["title", "notes", "priority", "done", "tags"])
            .prop_map(str::to_string),
        field_value_strategy(),
        0..5,
    )
}

/// Strategy for a single entity with the given id.
pub fn entity_with_id(id: String) -> impl Strategy<Value = Entity> {
    (
        timestamp_strategy(),
        prop::option::of(timestamp_strategy()),
        prop::option::of(1u64..20),
        fields_strategy(),
    )
        .prop_map(move |(created_at, updated_at, generation, fields)| {
            let mut entity = Entity::new(id.clone(), created_at);
            entity.updated_at = updated_at;
            entity.rev = generation.map(|g| format!("{g}-{:016x}", g * 7919));
            entity.fields = fields;
            entity
        })
}

/// Strategy for a single entity.
pub fn entity_strategy() -> impl Strategy<Value = Entity> {
    entity_id_strategy().prop_flat_map(entity_with_id)
}

/// Strategy for two versions of the same entity.
pub fn entity_pair_strategy() -> impl Strategy<Value = (Entity, Entity)> {
    entity_id_strategy().prop_flat_map(|id| (entity_with_id(id.clone()), entity_with_id(id)))
}

/// Strategy for a batch of entities with distinct ids.
pub fn entity_batch_strategy(max: usize) -> impl Strategy<Value = Vec<Entity>> {
    prop::collection::btree_set(entity_id_strategy(), 0..max).prop_flat_map(|ids| {
        ids.into_iter()
            .map(entity_with_id)
            .collect::<Vec<_>>()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_core::validate_entity_id;

    proptest! {
        #[test]
        fn generated_ids_are_valid(id in entity_id_strategy()) {
            prop_assert!(validate_entity_id(&id).is_ok());
        }

        #[test]
        fn pairs_share_an_id((local, remote) in entity_pair_strategy()) {
            prop_assert_eq!(local.id, remote.id);
        }

        #[test]
        fn batches_have_distinct_ids(batch in entity_batch_strategy(8)) {
            let mut ids: Vec<_> = batch.iter().map(|e| e.id.clone()).collect();
            ids.dedup();
            prop_assert_eq!(ids.len(), batch.len());
        }
    }
}
