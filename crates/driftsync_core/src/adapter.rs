//! The per-entity storage adapter.
//!
//! Each entity lives in its own document, addressed as `"<kind>-<id>"`.
//! Writes are revision-checked by the store; the adapter re-reads revisions
//! and retries through [`crate::retry::run`], so callers never handle raw
//! revision tokens.

use crate::config::AdapterConfig;
use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::id::EntityKind;
use crate::retry;
use driftsync_store::{
    AllDocsQuery, BulkItemResult, Document, DocumentStore, StoreError, StoreHandle,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-item result of [`EntityStore::save_many`].
#[derive(Debug)]
pub struct SaveOutcome {
    /// Entity id.
    pub id: String,
    /// New revision on success.
    pub result: CoreResult<String>,
}

impl SaveOutcome {
    /// Returns true if the entity was written.
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Result of an orphan sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Documents found in the kind namespace.
    pub scanned: usize,
    /// Entity ids whose documents were removed.
    pub removed: Vec<String>,
    /// Entity ids whose removal failed, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Result of a legacy migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Whether a legacy aggregate document was found.
    pub legacy_found: bool,
    /// Entities written to per-entity documents.
    pub migrated: usize,
    /// Entities that could not be parsed or written.
    pub failed: Vec<String>,
    /// Whether the legacy document was removed.
    pub legacy_removed: bool,
}

/// Stores one kind of entity as individual documents.
///
/// The store is acquired from the shared [`StoreHandle`] on every attempt,
/// so a replaced connection is picked up by the next retry.
#[derive(Debug)]
pub struct EntityStore {
    handle: Arc<StoreHandle>,
    config: AdapterConfig,
}

impl EntityStore {
    /// Creates an adapter over `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidId`] if the configuration is invalid.
    pub fn new(handle: Arc<StoreHandle>, config: AdapterConfig) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self { handle, config })
    }

    /// Returns the entity kind.
    pub fn kind(&self) -> &EntityKind {
        &self.config.kind
    }

    /// Returns the configuration.
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Returns the shared store handle.
    pub fn handle(&self) -> &Arc<StoreHandle> {
        &self.handle
    }

    /// Writes one entity, creating or updating its document.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Conflict`] if the revision keeps moving after the
    /// conflict retry, [`CoreError::RetriesExhausted`] if the store stays
    /// unreachable, or [`CoreError::InvalidId`] for an unusable id.
    pub async fn save(&self, entity: &Entity) -> CoreResult<Document> {
        let doc_id = self.config.kind.doc_id(&entity.id)?;
        let body = entity.to_body()?;

        let result = retry::run("save", &self.config.retry, |attempt| {
            let store = self.handle.current();
            let doc = Document::new(doc_id.clone(), body.clone());
            async move {
                let rev = current_rev(store.as_ref(), &doc.id).await?;
                let ack = store.put(doc.clone().with_rev(rev)).await?;
                if attempt > 1 {
                    debug!(id = %ack.id, attempt, "save succeeded after retry");
                }
                Ok(doc.with_rev(Some(ack.rev)))
            }
        })
        .await;
        escalate_conflict(result, &doc_id)
    }

    /// Writes many entities in one batch with per-item results.
    ///
    /// Existing revisions are read with a single range query. Items that
    /// fail are logged and reported, never raised. When an id appears more
    /// than once, the last occurrence is written.
    ///
    /// # Errors
    ///
    /// Fails as a whole only when the store cannot be reached.
    pub async fn save_many(&self, entities: &[Entity]) -> CoreResult<Vec<SaveOutcome>> {
        let mut outcomes = Vec::with_capacity(entities.len());
        let mut batch: BTreeMap<String, (String, Value)> = BTreeMap::new();

        for entity in entities {
            let prepared = self
                .config
                .kind
                .doc_id(&entity.id)
                .and_then(|doc_id| Ok((doc_id, entity.to_body()?)));
            match prepared {
                Ok((doc_id, body)) => {
                    if batch.insert(doc_id, (entity.id.clone(), body)).is_some() {
                        debug!(id = %entity.id, "duplicate entity in batch, keeping the last");
                    }
                }
                Err(err) => {
                    warn!(id = %entity.id, error = %err, "entity not saved");
                    outcomes.push(SaveOutcome {
                        id: entity.id.clone(),
                        result: Err(err),
                    });
                }
            }
        }

        let mut pending: Vec<(String, Value)> = batch
            .iter()
            .map(|(doc_id, (_, body))| (doc_id.clone(), body.clone()))
            .collect();
        let mut settled: HashMap<String, Result<String, StoreError>> = HashMap::new();
        let mut rounds = 0;

        while !pending.is_empty() {
            let results = self.write_batch(&pending).await?;
            let mut conflicted = HashSet::new();
            for item in results {
                match item.outcome {
                    Err(e) if e.is_conflict() && rounds < self.config.retry.conflict_retries => {
                        conflicted.insert(item.id);
                    }
                    outcome => {
                        settled.insert(item.id, outcome);
                    }
                }
            }
            if !conflicted.is_empty() {
                debug!(items = conflicted.len(), "batch conflicts, refetching revisions");
            }
            rounds += 1;
            pending.retain(|(doc_id, _)| conflicted.contains(doc_id));
        }

        for (doc_id, (entity_id, _)) in batch {
            let result = match settled.remove(&doc_id) {
                Some(Ok(rev)) => Ok(rev),
                Some(Err(e)) if e.is_conflict() => Err(CoreError::Conflict { id: doc_id }),
                Some(Err(e)) => Err(e.into()),
                None => Err(StoreError::Backend(format!("no result for {doc_id}")).into()),
            };
            if let Err(err) = &result {
                warn!(id = %entity_id, error = %err, "entity not saved");
            }
            outcomes.push(SaveOutcome {
                id: entity_id,
                result,
            });
        }

        Ok(outcomes)
    }

    async fn write_batch(&self, items: &[(String, Value)]) -> CoreResult<Vec<BulkItemResult>> {
        let query = AllDocsQuery {
            start_key: items.iter().map(|(id, _)| id.clone()).min(),
            end_key: items.iter().map(|(id, _)| id.clone()).max(),
            include_docs: false,
        };

        retry::run("save_many", &self.config.retry, |_| {
            let store = self.handle.current();
            let query = query.clone();
            let docs: Vec<Document> = items
                .iter()
                .map(|(id, body)| Document::new(id.clone(), body.clone()))
                .collect();
            async move {
                let revs: HashMap<String, String> = store
                    .all_docs(query)
                    .await?
                    .into_iter()
                    .map(|row| (row.id, row.rev))
                    .collect();
                let docs = docs
                    .into_iter()
                    .map(|doc| {
                        let rev = revs.get(&doc.id).cloned();
                        doc.with_rev(rev)
                    })
                    .collect();
                Ok(store.bulk_docs(docs).await?)
            }
        })
        .await
    }

    /// Removes an entity's document.
    ///
    /// Returns `false` when there was nothing to remove.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Conflict`] if the revision keeps moving or
    /// [`CoreError::RetriesExhausted`] if the store stays unreachable.
    pub async fn delete(&self, id: &str) -> CoreResult<bool> {
        let doc_id = self.config.kind.doc_id(id)?;

        let result = retry::run("delete", &self.config.retry, |_| {
            let store = self.handle.current();
            let doc_id = doc_id.clone();
            async move {
                let Some(rev) = current_rev(store.as_ref(), &doc_id).await? else {
                    return Ok(false);
                };
                match store.remove(&doc_id, &rev).await {
                    Ok(_) => Ok(true),
                    Err(e) if e.is_not_found() => Ok(false),
                    Err(e) => Err(e.into()),
                }
            }
        })
        .await;
        escalate_conflict(result, &doc_id)
    }

    /// Reads one entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the store stays unreachable or the stored
    /// document cannot be decoded.
    pub async fn get(&self, id: &str) -> CoreResult<Option<Entity>> {
        let doc_id = self.config.kind.doc_id(id)?;

        let doc = retry::run("get", &self.config.retry, |_| {
            let store = self.handle.current();
            let doc_id = doc_id.clone();
            async move {
                match store.get(&doc_id).await {
                    Ok(doc) => Ok(Some(doc)),
                    Err(e) if e.is_not_found() => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }
        })
        .await?;

        doc.map(|doc| Entity::from_document(&self.config.kind, doc))
            .transpose()
    }

    /// Reads every entity of this kind in id order.
    ///
    /// Documents that cannot be decoded are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the store stays unreachable.
    pub async fn load_all(&self) -> CoreResult<Vec<Entity>> {
        let rows = retry::run("load_all", &self.config.retry, |_| {
            let store = self.handle.current();
            let query = self.config.kind.scan().with_docs();
            async move { Ok(store.all_docs(query).await?) }
        })
        .await?;

        let mut entities = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(doc) = row.doc else { continue };
            match Entity::from_document(&self.config.kind, doc) {
                Ok(entity) => entities.push(entity),
                Err(err) => warn!(id = %row.id, error = %err, "skipping malformed document"),
            }
        }
        Ok(entities)
    }

    /// Removes every document whose entity id is not in `current_ids`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store stays unreachable.
    pub async fn sync_deleted(&self, current_ids: &HashSet<String>) -> CoreResult<SweepReport> {
        let kind = &self.config.kind;

        let (scanned, results) = retry::run("sync_deleted", &self.config.retry, |_| {
            let store = self.handle.current();
            let query = kind.scan();
            async move {
                let rows = store.all_docs(query).await?;
                let scanned = rows.len();
                let orphans: Vec<Document> = rows
                    .into_iter()
                    .filter(|row| {
                        kind.entity_id(&row.id)
                            .is_some_and(|id| !current_ids.contains(id))
                    })
                    .map(|row| Document::tombstone(row.id, row.rev))
                    .collect();
                if orphans.is_empty() {
                    return Ok((scanned, Vec::new()));
                }
                Ok((scanned, store.bulk_docs(orphans).await?))
            }
        })
        .await?;

        let mut report = SweepReport {
            scanned,
            ..SweepReport::default()
        };
        for item in results {
            let id = kind.entity_id(&item.id).unwrap_or(&item.id).to_string();
            match item.outcome {
                Ok(_) => report.removed.push(id),
                Err(e) if e.is_not_found() => report.removed.push(id),
                Err(e) => {
                    warn!(id = %id, error = %e, "orphan not removed");
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        info!(
            kind = %kind,
            scanned = report.scanned,
            removed = report.removed.len(),
            failed = report.failed.len(),
            "orphan sweep complete"
        );
        Ok(report)
    }

    /// Moves entities out of the legacy aggregate document.
    ///
    /// Safe to run on every startup: without a legacy document this is a
    /// no-op. The legacy document is removed only after every entity was
    /// written, so a partial failure is retried on the next run.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LegacyFormat`] when the legacy document holds no
    /// entity array, or an error if the store stays unreachable.
    pub async fn migrate_legacy(&self) -> CoreResult<MigrationReport> {
        let Some(legacy_id) = self.config.legacy_doc_id.as_deref() else {
            return Ok(MigrationReport::default());
        };

        let legacy = retry::run("migrate_legacy", &self.config.retry, |_| {
            let store = self.handle.current();
            async move {
                match store.get(legacy_id).await {
                    Ok(doc) => Ok(Some(doc)),
                    Err(e) if e.is_not_found() => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }
        })
        .await?;

        let Some(legacy) = legacy else {
            debug!(legacy_id, "no legacy document, nothing to migrate");
            return Ok(MigrationReport::default());
        };

        let mut report = MigrationReport {
            legacy_found: true,
            ..MigrationReport::default()
        };
        let mut entities = Vec::new();
        for (index, item) in legacy_items(legacy, &self.config.legacy_field)?
            .into_iter()
            .enumerate()
        {
            match legacy_entity(item) {
                Ok(entity) => entities.push(entity),
                Err(label) => {
                    let label = label.unwrap_or_else(|| format!("#{index}"));
                    warn!(legacy_id, item = %label, "legacy item is not an entity");
                    report.failed.push(label);
                }
            }
        }

        for outcome in self.save_many(&entities).await? {
            match outcome.result {
                Ok(_) => report.migrated += 1,
                Err(_) => report.failed.push(outcome.id),
            }
        }

        if !report.failed.is_empty() {
            warn!(
                legacy_id,
                migrated = report.migrated,
                failed = report.failed.len(),
                "legacy migration incomplete, keeping legacy document"
            );
            return Ok(report);
        }

        retry::run("migrate_legacy", &self.config.retry, |_| {
            let store = self.handle.current();
            async move {
                let Some(rev) = current_rev(store.as_ref(), legacy_id).await? else {
                    return Ok(());
                };
                match store.remove(legacy_id, &rev).await {
                    Ok(_) => Ok(()),
                    Err(e) if e.is_not_found() => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
        })
        .await?;
        report.legacy_removed = true;

        info!(
            legacy_id,
            kind = %self.config.kind,
            migrated = report.migrated,
            "legacy migration complete"
        );
        Ok(report)
    }
}

async fn current_rev(store: &dyn DocumentStore, doc_id: &str) -> CoreResult<Option<String>> {
    match store.get(doc_id).await {
        Ok(doc) => Ok(doc.rev),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn escalate_conflict<T>(result: CoreResult<T>, doc_id: &str) -> CoreResult<T> {
    result.map_err(|err| match err {
        CoreError::Store(e) if e.is_conflict() => CoreError::Conflict {
            id: doc_id.to_string(),
        },
        other => other,
    })
}

fn legacy_items(legacy: Document, field: &str) -> CoreResult<Vec<Value>> {
    match legacy.body {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove(field) {
            Some(Value::Array(items)) => Ok(items),
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(_) => Err(CoreError::LegacyFormat {
                id: legacy.id,
                reason: format!("`{field}` is not an array"),
            }),
        },
        _ => Err(CoreError::LegacyFormat {
            id: legacy.id,
            reason: "body is neither an object nor an array".into(),
        }),
    }
}

/// Parses a legacy item, returning its id label on failure when it has one.
fn legacy_entity(item: Value) -> Result<Entity, Option<String>> {
    let Value::Object(mut map) = item else {
        return Err(None);
    };
    // Legacy payloads carry numeric ids.
    let label = match map.get("id") {
        Some(Value::String(id)) => Some(id.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    if let Some(id) = &label {
        map.insert("id".into(), Value::String(id.clone()));
    }
    Entity::from_object(map).map_err(|_| label)
}
