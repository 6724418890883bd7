//! Sweep command implementation.

use driftsync_core::{AdapterConfig, SweepReport};
use driftsync_engine::{CoordinatorConfig, SyncCoordinator};
use driftsync_store::StoreHandle;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Merges ids from the command line and from an optional JSON file.
pub fn keep_set(
    ids: Vec<String>,
    file: Option<&Path>,
) -> Result<HashSet<String>, Box<dyn std::error::Error>> {
    let mut keep: HashSet<String> = ids.into_iter().filter(|id| !id.is_empty()).collect();
    if let Some(file) = file {
        let text = fs::read_to_string(file)?;
        let listed: Vec<String> = serde_json::from_str(&text)
            .map_err(|e| format!("{:?} is not a JSON array of ids: {e}", file))?;
        keep.extend(listed);
    }
    Ok(keep)
}

/// Runs the sweep command.
pub async fn run(
    path: &Path,
    config: AdapterConfig,
    keep: &HashSet<String>,
    dry_run: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Sweeping {:?} keeping {} ids", path, keep.len());

    let handle = super::open_replica(path)?;

    if dry_run {
        let orphans = orphans(handle, config, keep).await?;
        println!("Dry run: would remove {} entities", orphans.len());
        for id in &orphans {
            println!("  {id}");
        }
        return Ok(());
    }

    let report = sweep(handle, config, keep).await?;
    println!("Sweep Report");
    println!("============");
    println!("  Scanned: {}", report.scanned);
    println!("  Removed: {}", report.removed.len());
    for id in &report.removed {
        println!("    {id}");
    }
    if !report.failed.is_empty() {
        println!("  Failed: {}", report.failed.len());
        for (id, error) in &report.failed {
            println!("    {id}: {error}");
        }
    }

    Ok(())
}

/// Removes every entity not in `keep`.
pub async fn sweep(
    handle: Arc<StoreHandle>,
    config: AdapterConfig,
    keep: &HashSet<String>,
) -> Result<SweepReport, Box<dyn std::error::Error>> {
    let coordinator = SyncCoordinator::new(handle, CoordinatorConfig::new(config))?;
    let report = coordinator.sweep_orphans(keep).await;
    coordinator.shutdown();
    Ok(report?)
}

/// Lists the entities a sweep would remove.
pub async fn orphans(
    handle: Arc<StoreHandle>,
    config: AdapterConfig,
    keep: &HashSet<String>,
) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let coordinator = SyncCoordinator::new(handle, CoordinatorConfig::new(config))?;
    let entities = coordinator.load_all().await;
    coordinator.shutdown();
    Ok(entities?
        .into_iter()
        .map(|entity| entity.id)
        .filter(|id| !keep.contains(id))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_store::{Document, DocumentStore, InMemoryStore};
    use serde_json::json;

    async fn seeded() -> Arc<StoreHandle> {
        let store = Arc::new(InMemoryStore::new());
        for id in ["1", "2", "3"] {
            store
                .put(Document::new(format!("task-{id}"), json!({"id": id})))
                .await
                .unwrap();
        }
        Arc::new(StoreHandle::new(store))
    }

    fn keep(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[tokio::test]
    async fn removes_exactly_the_orphans() {
        let handle = seeded().await;
        let config = AdapterConfig::for_kind("task").unwrap();

        let planned = orphans(handle.clone(), config.clone(), &keep(&["1", "3"]))
            .await
            .unwrap();
        assert_eq!(planned, vec!["2"]);

        let report = sweep(handle, config, &keep(&["1", "3"])).await.unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.removed, vec!["2"]);
    }

    #[test]
    fn keep_set_merges_sources() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("keep.json");
        fs::write(&file, r#"["3", "4"]"#).unwrap();

        let ids = keep_set(vec!["1".into(), String::new()], Some(&file)).unwrap();
        assert_eq!(ids, keep(&["1", "3", "4"]));
    }

    #[test]
    fn keep_file_must_be_an_id_array() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("keep.json");
        fs::write(&file, r#"{"ids": []}"#).unwrap();

        assert!(keep_set(Vec::new(), Some(&file)).is_err());
    }
}
