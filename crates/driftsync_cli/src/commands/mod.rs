//! CLI command implementations.

pub mod inspect;
pub mod migrate;
pub mod resolve;
pub mod sweep;

use driftsync_core::{AdapterConfig, CoreResult};
use driftsync_store::{FileStore, StoreHandle};
use std::path::Path;
use std::sync::Arc;

/// Builds the adapter configuration for `kind`, overriding the legacy
/// document defaults when given.
pub fn adapter_config(
    kind: &str,
    legacy_doc: Option<String>,
    legacy_field: Option<String>,
) -> CoreResult<AdapterConfig> {
    let mut config = AdapterConfig::for_kind(kind)?;
    if let Some(doc) = legacy_doc {
        config.legacy_doc_id = Some(doc);
    }
    if let Some(field) = legacy_field {
        config.legacy_field = field;
    }
    config.validate()?;
    Ok(config)
}

/// Opens the replica file at `path`.
pub fn open_replica(path: &Path) -> Result<Arc<StoreHandle>, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No replica found at {:?}", path).into());
    }
    let store = FileStore::open(path)?;
    Ok(Arc::new(StoreHandle::new(Arc::new(store))))
}
