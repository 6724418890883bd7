//! Migrate command implementation.

use driftsync_core::{AdapterConfig, MigrationReport};
use driftsync_engine::{CoordinatorConfig, SyncCoordinator};
use driftsync_store::StoreHandle;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Runs the migrate command.
pub async fn run(
    path: &Path,
    config: AdapterConfig,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Migrating legacy document in {:?}", path);

    let handle = super::open_replica(path)?;
    let report = migrate(handle, config).await?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => print_text_output(&report),
    }

    Ok(())
}

/// Runs the startup migration of a coordinator over `handle`.
pub async fn migrate(
    handle: Arc<StoreHandle>,
    config: AdapterConfig,
) -> Result<MigrationReport, Box<dyn std::error::Error>> {
    let coordinator = SyncCoordinator::new(handle, CoordinatorConfig::new(config))?;
    let report = coordinator.start().await;
    coordinator.shutdown();
    Ok(report?)
}

fn print_text_output(report: &MigrationReport) {
    if !report.legacy_found {
        println!("No legacy document found. Nothing to migrate.");
        return;
    }

    println!("Migration Report");
    println!("================");
    println!("  Migrated: {}", report.migrated);
    println!("  Failed: {}", report.failed.len());
    for id in &report.failed {
        println!("    {id}");
    }
    if report.legacy_removed {
        println!("  Legacy document removed.");
    } else {
        println!("  Legacy document kept; re-run to retry the failed entities.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_store::{Document, DocumentStore, InMemoryStore};
    use serde_json::json;

    #[tokio::test]
    async fn migrates_and_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        store
            .put(Document::new(
                "tasks",
                json!({"items": [{"id": "1", "title": "a"}, {"id": "2", "title": "b"}]}),
            ))
            .await
            .unwrap();
        let handle = Arc::new(StoreHandle::new(store.clone()));
        let config = AdapterConfig::for_kind("task").unwrap();

        let report = migrate(handle.clone(), config.clone()).await.unwrap();
        assert!(report.legacy_found);
        assert_eq!(report.migrated, 2);
        assert!(report.legacy_removed);

        let again = migrate(handle, config).await.unwrap();
        assert!(!again.legacy_found);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn bad_layout_is_reported() {
        let store = Arc::new(InMemoryStore::new());
        store
            .put(Document::new("tasks", json!({"items": "oops"})))
            .await
            .unwrap();
        let handle = Arc::new(StoreHandle::new(store));
        let config = AdapterConfig::for_kind("task").unwrap();

        assert!(migrate(handle, config).await.is_err());
    }
}
