//! Resolve command implementation.

use driftsync_conflict::{ConflictKind, ConflictResolver, ResolveError, Side, Strategy};
use driftsync_core::Entity;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Outcome of an offline resolution.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveOutput {
    /// Kind of conflict.
    pub kind: ConflictKind,
    /// Fields that disagreed.
    pub fields: Vec<String>,
    /// Strategy applied.
    pub strategy: String,
    /// Side kept.
    pub chosen: Side,
    /// Confidence of the outcome.
    pub confidence: f64,
    /// The entity to keep, `None` when the deletion wins.
    pub entity: Option<Entity>,
}

/// Runs the resolve command.
pub fn run(
    local: Option<&Path>,
    remote: Option<&Path>,
    strategy: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if local.is_none() && remote.is_none() {
        return Err("At least one of --local and --remote is required".into());
    }

    let local = local.map(read_entity).transpose()?;
    let remote = remote.map(read_entity).transpose()?;
    let strategy: Strategy = strategy.parse().unwrap_or_else(|never| match never {});
    let output = resolve(local.as_ref(), remote.as_ref(), &strategy)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ => print_text_output(&output)?,
    }

    Ok(())
}

/// Resolves two snapshots with `strategy`.
pub fn resolve(
    local: Option<&Entity>,
    remote: Option<&Entity>,
    strategy: &Strategy,
) -> Result<ResolveOutput, ResolveError> {
    let resolver = ConflictResolver::default();
    let resolution = resolver.resolve_conflict(local, remote, "cli", Some(strategy))?;
    Ok(ResolveOutput {
        kind: resolution.kind,
        fields: resolution.fields,
        strategy: resolution.strategy,
        chosen: resolution.chosen,
        confidence: resolution.confidence,
        entity: resolution.entity,
    })
}

fn read_entity(path: &Path) -> Result<Entity, Box<dyn std::error::Error>> {
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| format!("{:?} is not an entity: {e}", path).into())
}

fn print_text_output(output: &ResolveOutput) -> Result<(), serde_json::Error> {
    println!("Conflict: {}", output.kind);
    if !output.fields.is_empty() {
        println!("  Fields: {}", output.fields.join(", "));
    }
    println!("  Strategy: {}", output.strategy);
    println!("  Kept: {} (confidence {:.2})", output.chosen, output.confidence);
    println!();
    match &output.entity {
        Some(entity) => println!("{}", serde_json::to_string_pretty(entity)?),
        None => println!("(deleted)"),
    }
    Ok(())
}
