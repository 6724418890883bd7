//! The conflict resolver.

use crate::config::ResolverConfig;
use crate::detect::{detect_conflict, ConflictKind, Detection};
use crate::error::{ResolveError, ResolveResult};
use crate::record::{ConflictLog, ConflictRecord};
use crate::stats::ConflictStatistics;
use crate::strategy::{last_write_wins, merge_fields, ResolutionStrategy, Side, Strategy};
use chrono::Utc;
use driftsync_core::Entity;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outcome of [`ConflictResolver::resolve_conflict`].
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// The entity to keep, `None` when the deletion is kept.
    pub entity: Option<Entity>,
    /// The side that was kept.
    pub chosen: Side,
    /// Kind of conflict.
    pub kind: ConflictKind,
    /// Fields that disagreed.
    pub fields: Vec<String>,
    /// Name of the strategy applied.
    pub strategy: String,
    /// Confidence of the outcome.
    pub confidence: f64,
    /// Whether a custom strategy failed and last-write-wins was used.
    pub fell_back: bool,
    /// Id of the audit record, `None` when there was nothing to resolve.
    pub record_id: Option<Uuid>,
}

struct Outcome {
    entity: Option<Entity>,
    chosen: Side,
    confidence: f64,
    fell_back: bool,
}

/// Settles disagreements between local and remote snapshots and keeps an
/// audit trail of every decision.
///
/// The resolver is pure apart from its history: it never touches storage.
///
/// # Example
///
/// ```rust
/// use driftsync_conflict::{ConflictResolver, Side};
/// use driftsync_core::Entity;
/// use chrono::{Duration, Utc};
///
/// let resolver = ConflictResolver::default();
/// let now = Utc::now();
/// let local = Entity::new("1", now).with_field("title", "A").with_updated_at(now);
/// let remote = Entity::new("1", now)
///     .with_field("title", "B")
///     .with_updated_at(now + Duration::seconds(5));
///
/// let resolution = resolver.resolve(&local, &remote, "remote:task-1").unwrap();
/// assert_eq!(resolution.chosen, Side::Remote);
/// assert_eq!(resolver.history().len(), 1);
/// ```
pub struct ConflictResolver {
    default_strategy: RwLock<Strategy>,
    strategies: RwLock<HashMap<String, Arc<dyn ResolutionStrategy>>>,
    log: ConflictLog,
    lifetime: AtomicU64,
    top_contexts: usize,
    recent_records: usize,
}

impl ConflictResolver {
    /// Creates a resolver.
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            default_strategy: RwLock::new(config.default_strategy),
            strategies: RwLock::new(HashMap::new()),
            log: ConflictLog::new(config.history_capacity),
            lifetime: AtomicU64::new(0),
            top_contexts: config.top_contexts,
            recent_records: config.recent_records,
        }
    }

    /// Classifies the disagreement between two snapshots.
    pub fn detect_conflict(&self, local: Option<&Entity>, remote: Option<&Entity>) -> Detection {
        detect_conflict(local, remote)
    }

    /// Resolves two snapshots with the default strategy.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::UnknownStrategy`] if the default strategy is
    /// a custom strategy that is not registered.
    pub fn resolve(
        &self,
        local: &Entity,
        remote: &Entity,
        context: &str,
    ) -> ResolveResult<Resolution> {
        self.resolve_conflict(Some(local), Some(remote), context, None)
    }

    /// Resolves a conflict and records it.
    ///
    /// `strategy` overrides the default. Snapshots that agree are not
    /// recorded; the newer of the two is returned. When one side is absent,
    /// the priority strategies keep their side and every other strategy
    /// keeps the surviving entity, so a deletion never silently discards
    /// data.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::UnknownStrategy`] for an unregistered custom
    /// strategy. Failures inside a custom strategy are never returned.
    pub fn resolve_conflict(
        &self,
        local: Option<&Entity>,
        remote: Option<&Entity>,
        context: &str,
        strategy: Option<&Strategy>,
    ) -> ResolveResult<Resolution> {
        let strategy = match strategy {
            Some(strategy) => strategy.clone(),
            None => self.default_strategy.read().clone(),
        };
        let custom = match &strategy {
            Strategy::Custom(name) => Some(self.lookup(name)?),
            _ => None,
        };

        let detection = detect_conflict(local, remote);
        if !detection.is_conflict() {
            // Agreeing snapshots may still differ in bookkeeping; keep the newer.
            let (entity, chosen) = match (local, remote) {
                (Some(l), Some(r)) if last_write_wins(l, r) == Side::Remote => {
                    (Some(r.clone()), Side::Remote)
                }
                _ => (local.or(remote).cloned(), Side::Local),
            };
            return Ok(Resolution {
                entity,
                chosen,
                kind: detection.kind,
                fields: detection.fields,
                strategy: strategy.name().to_string(),
                confidence: detection.confidence,
                fell_back: false,
                record_id: None,
            });
        }

        let outcome = match (local, remote) {
            (Some(l), Some(r)) => apply(&strategy, custom.as_deref(), l, r, &detection, context),
            _ => settle_deletion(&strategy, local, remote, detection.confidence),
        };

        let record = ConflictRecord {
            id: Uuid::new_v4(),
            resolved_at: Utc::now(),
            context: context.to_string(),
            entity_id: local.or(remote).map(|e| e.id.clone()).unwrap_or_default(),
            kind: detection.kind,
            local: local.cloned(),
            remote: remote.cloned(),
            chosen: outcome.chosen,
            fields: detection.fields.clone(),
            strategy: strategy.name().to_string(),
            confidence: outcome.confidence,
            fell_back: outcome.fell_back,
        };
        let record_id = record.id;
        self.log.push(record);
        self.lifetime.fetch_add(1, Ordering::Relaxed);

        debug!(
            context,
            kind = %detection.kind,
            strategy = strategy.name(),
            chosen = %outcome.chosen,
            confidence = outcome.confidence,
            "conflict resolved"
        );

        Ok(Resolution {
            entity: outcome.entity,
            chosen: outcome.chosen,
            kind: detection.kind,
            fields: detection.fields,
            strategy: strategy.name().to_string(),
            confidence: outcome.confidence,
            fell_back: outcome.fell_back,
            record_id: Some(record_id),
        })
    }

    /// Registers a custom strategy, replacing one with the same name.
    pub fn register_strategy(&self, strategy: Arc<dyn ResolutionStrategy>) {
        let name = strategy.name().to_string();
        self.strategies.write().insert(name, strategy);
    }

    /// Sets the strategy used when a call does not name one.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::UnknownStrategy`] for an unregistered custom
    /// strategy.
    pub fn set_default_strategy(&self, strategy: Strategy) -> ResolveResult<()> {
        if let Strategy::Custom(name) = &strategy {
            self.lookup(name)?;
        }
        *self.default_strategy.write() = strategy;
        Ok(())
    }

    /// Returns the default strategy.
    pub fn default_strategy(&self) -> Strategy {
        self.default_strategy.read().clone()
    }

    /// Returns the recorded conflicts, oldest first.
    pub fn history(&self) -> Vec<ConflictRecord> {
        self.log.snapshot()
    }

    /// Returns up to `n` recorded conflicts, newest first.
    pub fn recent(&self, n: usize) -> Vec<ConflictRecord> {
        self.log.recent(n)
    }

    /// Drops the recorded conflicts.
    pub fn clear_history(&self) {
        self.log.clear();
    }

    /// Derives statistics from the history.
    pub fn statistics(&self) -> ConflictStatistics {
        ConflictStatistics::from_records(
            &self.log.snapshot(),
            self.lifetime.load(Ordering::Relaxed),
            self.top_contexts,
            self.recent_records,
        )
    }

    fn lookup(&self, name: &str) -> ResolveResult<Arc<dyn ResolutionStrategy>> {
        self.strategies
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ResolveError::UnknownStrategy(name.to_string()))
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(ResolverConfig::default())
    }
}

impl fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("default_strategy", &*self.default_strategy.read())
            .field("strategies", &self.strategies.read().keys().collect::<Vec<_>>())
            .field("history", &self.log.len())
            .finish()
    }
}

fn apply(
    strategy: &Strategy,
    custom: Option<&dyn ResolutionStrategy>,
    local: &Entity,
    remote: &Entity,
    detection: &Detection,
    context: &str,
) -> Outcome {
    let pick = |side: Side| Outcome {
        entity: Some(match side {
            Side::Remote => remote.clone(),
            _ => local.clone(),
        }),
        chosen: side,
        confidence: detection.confidence,
        fell_back: false,
    };

    match (strategy, custom) {
        (Strategy::LocalPriority, _) => pick(Side::Local),
        (Strategy::RemotePriority, _) => pick(Side::Remote),
        (Strategy::FieldLevel, _) => {
            let (merged, took_remote) = merge_fields(local, remote, &detection.fields);
            Outcome {
                entity: Some(merged),
                chosen: if took_remote { Side::Merged } else { Side::Local },
                confidence: detection.confidence,
                fell_back: false,
            }
        }
        (Strategy::Custom(name), Some(custom)) => {
            let attempt =
                panic::catch_unwind(AssertUnwindSafe(|| custom.resolve(local, remote, context)));
            let failure = match attempt {
                Ok(Ok(entity)) => {
                    let chosen = if entity == *local {
                        Side::Local
                    } else if entity == *remote {
                        Side::Remote
                    } else {
                        Side::Merged
                    };
                    return Outcome {
                        entity: Some(entity),
                        chosen,
                        confidence: detection.confidence,
                        fell_back: false,
                    };
                }
                Ok(Err(err)) => err.to_string(),
                Err(payload) => ResolveError::strategy(name, panic_message(payload.as_ref())).to_string(),
            };
            warn!(context, strategy = %name, error = %failure, "custom strategy failed, using last-write-wins");
            Outcome {
                confidence: detection.confidence / 2.0,
                fell_back: true,
                ..pick(last_write_wins(local, remote))
            }
        }
        _ => pick(last_write_wins(local, remote)),
    }
}

fn settle_deletion(
    strategy: &Strategy,
    local: Option<&Entity>,
    remote: Option<&Entity>,
    confidence: f64,
) -> Outcome {
    let chosen = match strategy {
        Strategy::LocalPriority => Side::Local,
        Strategy::RemotePriority => Side::Remote,
        _ if local.is_some() => Side::Local,
        _ => Side::Remote,
    };
    let entity = match chosen {
        Side::Remote => remote.cloned(),
        _ => local.cloned(),
    };
    Outcome {
        entity,
        chosen,
        confidence,
        fell_back: false,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panicked".to_string()
    }
}
