//! The domain entity model and its persisted shape.

use crate::error::{CoreError, CoreResult};
use crate::id::EntityKind;
use chrono::{DateTime, Utc};
use driftsync_store::{revision_generation, Document};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A domain record kept in sync between replicas.
///
/// Domain fields are free-form JSON values and serialize inline next to the
/// bookkeeping keys, so a stored entity reads like the record it models:
///
/// ```json
/// {"id": "7", "createdAt": "2024-05-01T09:00:00.000Z", "title": "Write report"}
/// ```
///
/// Timestamps are rehydrated from RFC 3339 strings or epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Stable entity id.
    pub id: String,

    /// Revision token of the stored document this entity was read from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,

    /// Creation time.
    #[serde(default = "epoch", with = "timestamp")]
    pub created_at: DateTime<Utc>,

    /// Last modification time.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "timestamp::option"
    )]
    pub updated_at: Option<DateTime<Utc>>,

    /// Per-field modification times used by field-level merge.
    #[serde(
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        with = "timestamp::map"
    )]
    pub field_updated_at: BTreeMap<String, DateTime<Utc>>,

    /// Domain fields.
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl Entity {
    /// Creates an entity with no domain fields.
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            rev: None,
            created_at,
            updated_at: None,
            field_updated_at: BTreeMap::new(),
            fields: BTreeMap::new(),
        }
    }

    /// Adds a domain field without touching any timestamp.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Sets the last modification time.
    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    /// Sets the revision token.
    pub fn with_rev(mut self, rev: impl Into<String>) -> Self {
        self.rev = Some(rev.into());
        self
    }

    /// Edits a field, stamping both its own and the entity's update time.
    pub fn set_field(&mut self, key: impl Into<String>, value: impl Into<Value>, at: DateTime<Utc>) {
        let key = key.into();
        self.field_updated_at.insert(key.clone(), at);
        self.fields.insert(key, value.into());
        self.updated_at = Some(self.updated_at.map_or(at, |current| current.max(at)));
    }

    /// Returns a domain field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Returns `updated_at`, falling back to `created_at`.
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }

    /// Returns when `key` last changed, falling back to [`Self::last_modified`].
    pub fn field_modified(&self, key: &str) -> DateTime<Utc> {
        self.field_updated_at
            .get(key)
            .copied()
            .unwrap_or_else(|| self.last_modified())
    }

    /// Returns the generation prefix of the revision token, if any.
    pub fn revision_generation(&self) -> Option<u64> {
        self.rev.as_deref().and_then(revision_generation)
    }

    /// Builds the document body for this entity.
    ///
    /// The revision lives on the document, not in its body.
    pub fn to_body(&self) -> CoreResult<Value> {
        let mut body = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut body {
            map.remove("rev");
        }
        Ok(body)
    }

    /// Rebuilds an entity from a stored document of `kind`.
    ///
    /// A body without an `id` takes it from the document id, and the
    /// document's revision replaces any revision found in the body.
    pub fn from_document(kind: &EntityKind, doc: Document) -> CoreResult<Self> {
        let mut body = match doc.body {
            Value::Object(map) => map,
            _ => {
                return Err(CoreError::Serialization(serde::de::Error::custom(format!(
                    "document {} body is not an object",
                    doc.id
                ))))
            }
        };
        if !body.contains_key("id") {
            let entity_id = kind
                .entity_id(&doc.id)
                .ok_or_else(|| CoreError::invalid_id(doc.id.clone(), "outside kind namespace"))?;
            body.insert("id".into(), Value::String(entity_id.to_string()));
        }
        let mut entity = Self::from_object(body)?;
        entity.rev = doc.rev;
        Ok(entity)
    }

    /// Parses an entity from a JSON object.
    pub fn from_object(object: Map<String, Value>) -> CoreResult<Self> {
        Ok(serde_json::from_value(Value::Object(object))?)
    }
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Timestamp (de)serialization accepting RFC 3339 strings and epoch millis.
pub mod timestamp {
    use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Fractional(f64),
        Text(String),
    }

    impl Raw {
        fn resolve<E: serde::de::Error>(self) -> Result<DateTime<Utc>, E> {
            let parsed = match &self {
                Raw::Millis(ms) => Utc.timestamp_millis_opt(*ms).single(),
                Raw::Fractional(ms) => Utc.timestamp_millis_opt(ms.round() as i64).single(),
                Raw::Text(text) => parse(text),
            };
            parsed.ok_or_else(|| E::custom("unrecognized timestamp"))
        }
    }

    /// Parses an RFC 3339 string or a decimal epoch-millisecond string.
    pub fn parse(text: &str) -> Option<DateTime<Utc>> {
        if let Ok(at) = DateTime::parse_from_rfc3339(text) {
            return Some(at.with_timezone(&Utc));
        }
        text.trim()
            .parse::<i64>()
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }

    /// Formats a timestamp the way entities store it.
    pub fn format(at: &DateTime<Utc>) -> String {
        at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Serializes a timestamp.
    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(at))
    }

    /// Deserializes a timestamp.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        Raw::deserialize(deserializer)?.resolve()
    }

    /// Optional timestamps.
    pub mod option {
        use super::Raw;
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        /// Serializes an optional timestamp.
        pub fn serialize<S: Serializer>(
            at: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match at {
                Some(at) => serializer.serialize_str(&super::format(at)),
                None => serializer.serialize_none(),
            }
        }

        /// Deserializes an optional timestamp; `null` becomes `None`.
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            Option::<Raw>::deserialize(deserializer)?
                .map(Raw::resolve)
                .transpose()
        }
    }

    /// Maps of field name to timestamp.
    pub mod map {
        use super::Raw;
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};
        use std::collections::BTreeMap;

        /// Serializes a timestamp map.
        pub fn serialize<S: Serializer>(
            map: &BTreeMap<String, DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            serializer.collect_map(map.iter().map(|(k, at)| (k, super::format(at))))
        }

        /// Deserializes a timestamp map; `null` becomes an empty map.
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<BTreeMap<String, DateTime<Utc>>, D::Error> {
            Option::<BTreeMap<String, Raw>>::deserialize(deserializer)?
                .unwrap_or_default()
                .into_iter()
                .map(|(k, raw)| raw.resolve().map(|at| (k, at)))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn fields_serialize_inline() {
        let entity = Entity::new("7", at(1_700_000_000))
            .with_field("title", "Write report")
            .with_field("priority", 2);

        let value = serde_json::to_value(&entity).unwrap();
        assert_eq!(value["id"], "7");
        assert_eq!(value["title"], "Write report");
        assert_eq!(value["priority"], 2);
        assert_eq!(value["createdAt"], "2023-11-14T22:13:20.000Z");
        assert!(value.get("updatedAt").is_none());
        assert!(value.get("fields").is_none());
    }

    #[test]
    fn timestamps_rehydrate_from_strings_and_millis() {
        let entity: Entity = serde_json::from_value(json!({
            "id": "1",
            "createdAt": 1_700_000_000_000_i64,
            "updatedAt": "2023-11-14T22:13:21Z",
            "fieldUpdatedAt": {"title": "1700000002000"},
            "title": "a"
        }))
        .unwrap();

        assert_eq!(entity.created_at, at(1_700_000_000));
        assert_eq!(entity.updated_at, Some(at(1_700_000_001)));
        assert_eq!(entity.field_updated_at["title"], at(1_700_000_002));
        assert_eq!(entity.field("title"), Some(&json!("a")));
        assert_eq!(entity.fields.len(), 1);
    }

    #[test]
    fn null_and_missing_timestamps() {
        let entity: Entity =
            serde_json::from_value(json!({"id": "1", "updatedAt": null, "fieldUpdatedAt": null}))
                .unwrap();
        assert_eq!(entity.created_at, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(entity.updated_at, None);
        assert!(entity.field_updated_at.is_empty());
    }

    #[test]
    fn garbage_timestamp_is_rejected() {
        let result: Result<Entity, _> =
            serde_json::from_value(json!({"id": "1", "createdAt": "yesterday"}));
        assert!(result.is_err());
    }

    #[test]
    fn set_field_stamps_times() {
        let mut entity = Entity::new("1", at(0)).with_updated_at(at(50));
        entity.set_field("title", "b", at(40));
        assert_eq!(entity.updated_at, Some(at(50)));
        assert_eq!(entity.field_modified("title"), at(40));

        entity.set_field("done", true, at(60));
        assert_eq!(entity.last_modified(), at(60));
        assert_eq!(entity.field_modified("notes"), at(60));
    }

    #[test]
    fn document_round_trip_restores_rev() {
        let kind = EntityKind::new("task").unwrap();
        let entity = Entity::new("9", at(10))
            .with_rev("4-stale")
            .with_field("title", "x");

        let body = entity.to_body().unwrap();
        assert!(body.get("rev").is_none());

        let doc = Document::new("task-9", body).with_rev(Some("5-fresh".into()));
        let loaded = Entity::from_document(&kind, doc).unwrap();
        assert_eq!(loaded.rev.as_deref(), Some("5-fresh"));
        assert_eq!(loaded.revision_generation(), Some(5));
        assert_eq!(loaded.field("title"), Some(&json!("x")));
    }

    #[test]
    fn id_is_recovered_from_document_id() {
        let kind = EntityKind::new("task").unwrap();
        let doc = Document::new("task-abc", json!({"title": "t"}));
        let loaded = Entity::from_document(&kind, doc).unwrap();
        assert_eq!(loaded.id, "abc");
    }

    #[test]
    fn non_object_body_is_rejected() {
        let kind = EntityKind::new("task").unwrap();
        let doc = Document::new("task-1", json!([1, 2]));
        assert!(Entity::from_document(&kind, doc).is_err());
    }
}
