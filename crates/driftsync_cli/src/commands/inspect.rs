//! Inspect command implementation.

use driftsync_core::{timestamp, AdapterConfig, Entity};
use driftsync_store::{AllDocsQuery, Document, DocumentStore};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

/// Replica inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Replica path.
    pub path: String,
    /// Inspected entity kind.
    pub kind: String,
    /// Number of stored documents of any kind.
    pub document_count: usize,
    /// Number of readable entities of the kind.
    pub entity_count: usize,
    /// Ids of documents of the kind that could not be read.
    pub malformed: Vec<String>,
    /// Number of documents belonging to other kinds.
    pub other_documents: usize,
    /// The legacy aggregate document, if still present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy: Option<LegacyInfo>,
    /// Entity details (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<EntitySummary>>,
}

/// The legacy aggregate document.
#[derive(Debug, Serialize, PartialEq)]
pub struct LegacyInfo {
    /// Document id.
    pub id: String,
    /// Number of entities it still holds, `None` if the layout is unknown.
    pub items: Option<usize>,
}

/// One stored entity.
#[derive(Debug, Serialize)]
pub struct EntitySummary {
    /// Entity id.
    pub id: String,
    /// Revision token.
    pub rev: Option<String>,
    /// Last update time.
    pub updated_at: Option<String>,
    /// Number of domain fields.
    pub fields: usize,
}

/// Runs the inspect command.
pub async fn run(
    path: &Path,
    config: &AdapterConfig,
    show_entities: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let handle = super::open_replica(path)?;
    let mut result = inspect(handle.current().as_ref(), config, show_entities).await?;
    result.path = path.display().to_string();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Collects replica statistics for the configured kind.
pub async fn inspect(
    store: &dyn DocumentStore,
    config: &AdapterConfig,
    show_entities: bool,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let rows = store.all_docs(AllDocsQuery::all().with_docs()).await?;

    let mut result = InspectResult {
        path: String::new(),
        kind: config.kind.to_string(),
        document_count: rows.len(),
        entity_count: 0,
        malformed: Vec::new(),
        other_documents: 0,
        legacy: None,
        entities: show_entities.then(Vec::new),
    };

    for row in rows {
        let Some(doc) = row.doc else {
            continue;
        };

        if config.legacy_doc_id.as_deref() == Some(doc.id.as_str()) {
            result.legacy = Some(LegacyInfo {
                items: legacy_items(&doc, &config.legacy_field),
                id: doc.id,
            });
            continue;
        }

        if !config.kind.owns(&doc.id) {
            result.other_documents += 1;
            continue;
        }

        let id = doc.id.clone();
        match Entity::from_document(&config.kind, doc) {
            Ok(entity) => {
                result.entity_count += 1;
                if let Some(entities) = result.entities.as_mut() {
                    entities.push(EntitySummary {
                        id: entity.id.clone(),
                        rev: entity.rev.clone(),
                        updated_at: entity.updated_at.as_ref().map(timestamp::format),
                        fields: entity.fields.len(),
                    });
                }
            }
            Err(_) => result.malformed.push(id),
        }
    }

    Ok(result)
}

fn legacy_items(doc: &Document, field: &str) -> Option<usize> {
    match &doc.body {
        Value::Array(items) => Some(items.len()),
        Value::Object(object) => match object.get(field) {
            Some(Value::Array(items)) => Some(items.len()),
            None | Some(Value::Null) => Some(0),
            Some(_) => None,
        },
        _ => None,
    }
}

fn print_text_output(result: &InspectResult) {
    println!("Replica: {}", result.path);
    println!("Kind: {}", result.kind);
    println!();
    println!("Documents:");
    println!("  Total: {}", result.document_count);
    println!("  Entities: {}", result.entity_count);
    println!("  Malformed: {}", result.malformed.len());
    println!("  Other kinds: {}", result.other_documents);

    if let Some(legacy) = &result.legacy {
        println!();
        match legacy.items {
            Some(items) => println!("Legacy document {:?} holds {} entities", legacy.id, items),
            None => println!("Legacy document {:?} has an unknown layout", legacy.id),
        }
        println!("  Run `driftsync migrate` to split it up");
    }

    for id in &result.malformed {
        println!("  malformed: {id}");
    }

    if let Some(entities) = &result.entities {
        println!();
        println!("Entities:");
        for entity in entities {
            println!(
                "  {} rev={} updated={} fields={}",
                entity.id,
                entity.rev.as_deref().unwrap_or("-"),
                entity.updated_at.as_deref().unwrap_or("-"),
                entity.fields
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_store::InMemoryStore;
    use serde_json::json;

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        for doc in [
            Document::new("task-1", json!({"id": "1", "title": "a", "updatedAt": 1_700_000_000_000i64})),
            Document::new("task-2", json!({"id": "2"})),
            Document::new("task-3", json!(["not", "an", "entity"])),
            Document::new("note-1", json!({"id": "1"})),
            Document::new("tasks", json!({"items": [{"id": "9"}, {"id": "10"}]})),
        ] {
            store.put(doc).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn counts_by_category() {
        let store = seeded().await;
        let config = AdapterConfig::for_kind("task").unwrap();
        let result = inspect(&store, &config, false).await.unwrap();

        assert_eq!(result.document_count, 5);
        assert_eq!(result.entity_count, 2);
        assert_eq!(result.malformed, vec!["task-3"]);
        assert_eq!(result.other_documents, 1);
        assert_eq!(
            result.legacy,
            Some(LegacyInfo {
                id: "tasks".into(),
                items: Some(2),
            })
        );
        assert!(result.entities.is_none());
    }

    #[tokio::test]
    async fn lists_entities_on_request() {
        let store = seeded().await;
        let config = AdapterConfig::for_kind("task").unwrap();
        let result = inspect(&store, &config, true).await.unwrap();

        let entities = result.entities.unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].id, "1");
        assert_eq!(entities[0].fields, 1);
        assert_eq!(entities[0].updated_at.as_deref(), Some("2023-11-14T22:13:20.000Z"));
        assert!(entities[1].updated_at.is_none());
    }
}
