//! The sync coordinator.

use crate::breaker::{BreakerStats, SyncCircuitBreaker};
use crate::config::CoordinatorConfig;
use crate::error::{BreakerError, Rejection, SyncError, SyncResult};
use crate::events::{SyncEvent, SyncEvents};
use crate::source::SyncSource;
use driftsync_conflict::{differing_fields, ConflictResolver, ConflictStatistics, Resolution};
use driftsync_core::{validate_entity_id, Entity, EntityStore, MigrationReport, SweepReport};
use driftsync_store::StoreHandle;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time;
use tracing::{debug, info, warn};

/// What one sync attempt did, by entity id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Local changes written.
    pub saved: Vec<String>,
    /// Deletions applied.
    pub deleted: Vec<String>,
    /// Remote changes written.
    pub applied: Vec<String>,
    /// Conflicts settled by the resolver and written.
    pub resolved: Vec<String>,
    /// Remote changes that were stale or already present.
    pub skipped: Vec<String>,
    /// Local changes kept pending after a failure.
    pub requeued: Vec<String>,
    /// Local changes discarded because they can never be written.
    pub dropped: Vec<String>,
}

/// Result of a coordinator operation.
///
/// Coordinator operations never return errors; a failure is reported here
/// and the change stays pending where that makes sense.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// The attempt ran.
    Synced(SyncReport),
    /// The breaker refused the attempt. Pending changes are kept.
    Skipped(Rejection),
    /// The attempt failed.
    Failed(String),
}

impl SyncOutcome {
    /// Returns true if the attempt ran to completion.
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncOutcome::Synced(_))
    }

    /// Returns true if the breaker refused the attempt.
    pub fn is_skipped(&self) -> bool {
        matches!(self, SyncOutcome::Skipped(_))
    }

    /// Returns the report of a completed attempt.
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Synced(report) => Some(report),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
enum PendingOp {
    Save(Entity),
    Delete,
}

#[derive(Debug, Clone)]
struct PendingChange {
    op: PendingOp,
    seq: u64,
}

/// Local changes not yet written, latest version per id.
#[derive(Debug, Default)]
struct PendingChanges {
    changes: BTreeMap<String, PendingChange>,
    next_seq: u64,
}

impl PendingChanges {
    fn queue(&mut self, id: String, op: PendingOp) {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.changes.insert(id, PendingChange { op, seq });
    }

    fn get(&self, id: &str) -> Option<PendingChange> {
        self.changes.get(id).cloned()
    }

    fn snapshot(&self) -> Vec<(String, PendingChange)> {
        self.changes
            .iter()
            .map(|(id, change)| (id.clone(), change.clone()))
            .collect()
    }

    /// Removes the change for `id` unless a newer version replaced it.
    fn settle(&mut self, id: &str, seq: u64) {
        if self.changes.get(id).is_some_and(|change| change.seq == seq) {
            self.changes.remove(id);
        }
    }
}

/// Composition root of a replica: owns the storage adapter, the circuit
/// breaker, the conflict resolver and the event channel.
///
/// Local edits are queued and flushed through the breaker. An edit that
/// arrives inside the local cooldown, or while another attempt is running,
/// is flushed by a single trailing attempt once the breaker admits it, so
/// the last edit of a burst is written without further calls. Changes from
/// the replication transport are merged against the stored and pending
/// versions and written straight to storage, so they are never echoed back
/// as local changes.
///
/// Pending changes live in memory only. While the coordinator is degraded
/// they keep queueing; they are lost if the process exits before the store
/// accepts them.
pub struct SyncCoordinator {
    shared: Arc<Shared>,
}

struct Shared {
    store: EntityStore,
    breaker: Arc<SyncCircuitBreaker>,
    resolver: ConflictResolver,
    events: Arc<SyncEvents>,
    pending: Mutex<PendingChanges>,
    degraded: AtomicBool,
    recovery_interval: Option<Duration>,
    flush_scheduled: AtomicBool,
    flush_rerun: AtomicBool,
    recovering: AtomicBool,
}

impl SyncCoordinator {
    /// Creates a coordinator over `handle`.
    ///
    /// # Errors
    ///
    /// Returns an error if the adapter configuration is invalid.
    pub fn new(handle: Arc<StoreHandle>, config: CoordinatorConfig) -> SyncResult<Self> {
        let events = Arc::new(SyncEvents::new());
        let store = EntityStore::new(handle, config.adapter)?;
        let shared = Shared {
            store,
            breaker: Arc::new(SyncCircuitBreaker::new(config.breaker, events.clone())),
            resolver: ConflictResolver::new(config.resolver),
            events,
            pending: Mutex::new(PendingChanges::default()),
            degraded: AtomicBool::new(false),
            recovery_interval: config.recovery_interval,
            flush_scheduled: AtomicBool::new(false),
            flush_rerun: AtomicBool::new(false),
            recovering: AtomicBool::new(false),
        };
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Returns the storage adapter.
    pub fn store(&self) -> &EntityStore {
        &self.shared.store
    }

    /// Returns the circuit breaker.
    pub fn breaker(&self) -> &Arc<SyncCircuitBreaker> {
        &self.shared.breaker
    }

    /// Returns the conflict resolver.
    pub fn resolver(&self) -> &ConflictResolver {
        &self.shared.resolver
    }

    /// Migrates the legacy aggregate document and starts the health
    /// monitor.
    ///
    /// # Errors
    ///
    /// Returns the migration failure. The legacy document is kept.
    pub async fn start(&self) -> SyncResult<MigrationReport> {
        let shared = &self.shared;
        shared.breaker.start_health_monitor();
        match shared.store.migrate_legacy().await {
            Ok(report) => Ok(report),
            Err(err) => {
                if err.is_fatal() {
                    shared.degrade(err.to_string());
                }
                Err(err.into())
            }
        }
    }

    /// Queues a local edit and tries to sync it.
    ///
    /// The newest version per id replaces older pending versions. A
    /// debounced or concurrent attempt schedules a trailing flush.
    pub async fn record_local_change(&self, entity: Entity) -> SyncOutcome {
        if let Err(err) = validate_entity_id(&entity.id) {
            warn!(id = %entity.id, error = %err, "local change rejected");
            return SyncOutcome::Failed(err.to_string());
        }
        debug!(id = %entity.id, "local change queued");
        self.shared
            .pending
            .lock()
            .queue(entity.id.clone(), PendingOp::Save(entity));
        self.shared.sync_local().await
    }

    /// Queues a local deletion and tries to sync it.
    pub async fn record_local_deletion(&self, id: &str) -> SyncOutcome {
        if let Err(err) = validate_entity_id(id) {
            warn!(id, error = %err, "local deletion rejected");
            return SyncOutcome::Failed(err.to_string());
        }
        debug!(id, "local deletion queued");
        self.shared
            .pending
            .lock()
            .queue(id.to_string(), PendingOp::Delete);
        self.shared.sync_local().await
    }

    /// Flushes pending local changes through the breaker.
    ///
    /// A failed attempt leaves the changes pending for the next one. A
    /// debounced or concurrent attempt also schedules a trailing flush.
    pub async fn sync_local(&self) -> SyncOutcome {
        self.shared.sync_local().await
    }

    /// Merges an entity received from the replication transport.
    ///
    /// `source` should be [`SyncSource::Remote`] or [`SyncSource::CrossTab`].
    /// A skipped change is not retained; the transport delivers it again.
    pub async fn apply_remote_change(&self, source: SyncSource, remote: Entity) -> SyncOutcome {
        let shared = &self.shared;
        if let Err(err) = validate_entity_id(&remote.id) {
            warn!(source = %source, id = %remote.id, error = %err, "remote change rejected");
            return SyncOutcome::Failed(err.to_string());
        }
        let context = format!("{source}:{}", remote.id);
        let result = shared
            .breaker
            .execute(source, &context, || shared.merge_remote(&context, remote))
            .await;
        shared.settle(source, result)
    }

    /// Applies a deletion received from the replication transport.
    ///
    /// A pending local edit of the same entity turns this into a delete
    /// conflict, settled by the resolver.
    pub async fn apply_remote_deletion(&self, source: SyncSource, id: &str) -> SyncOutcome {
        let shared = &self.shared;
        if let Err(err) = validate_entity_id(id) {
            warn!(source = %source, id, error = %err, "remote deletion rejected");
            return SyncOutcome::Failed(err.to_string());
        }
        let context = format!("{source}:{id}");
        let result = shared
            .breaker
            .execute(source, &context, || shared.merge_remote_deletion(&context, id))
            .await;
        shared.settle(source, result)
    }

    /// Closes the circuit and flushes pending local changes.
    ///
    /// This is the manual recovery path for a coordinator configured
    /// without a recovery interval; with one, the coordinator does the same
    /// on its own while degraded.
    pub async fn reset_circuit(&self) -> SyncOutcome {
        self.shared.breaker.reset();
        let outcome = self.shared.sync_local().await;
        if outcome.is_synced() {
            self.shared.recover();
        }
        outcome
    }

    /// Removes stored entities whose ids are not in `current_ids`.
    ///
    /// # Errors
    ///
    /// Fails only when the store cannot be reached.
    pub async fn sweep_orphans(&self, current_ids: &HashSet<String>) -> SyncResult<SweepReport> {
        Ok(self.shared.store.sync_deleted(current_ids).await?)
    }

    /// Loads every stored entity.
    ///
    /// # Errors
    ///
    /// Fails only when the store cannot be reached.
    pub async fn load_all(&self) -> SyncResult<Vec<Entity>> {
        Ok(self.shared.store.load_all().await?)
    }

    /// Returns the number of local changes not yet written.
    pub fn pending_count(&self) -> usize {
        self.shared.pending_count()
    }

    /// Returns true after a fatal failure, until the next successful
    /// attempt.
    pub fn is_degraded(&self) -> bool {
        self.shared.degraded.load(Ordering::SeqCst)
    }

    /// Subscribes to sync events.
    ///
    /// The channel is unbounded: a receiver that is kept but never drained
    /// buffers every later event. Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> UnboundedReceiver<SyncEvent> {
        self.shared.events.subscribe()
    }

    /// Returns a snapshot of the breaker metrics.
    pub fn breaker_stats(&self) -> BreakerStats {
        self.shared.breaker.stats()
    }

    /// Returns statistics over the conflict history.
    pub fn conflict_statistics(&self) -> ConflictStatistics {
        self.shared.resolver.statistics()
    }

    /// Stops syncing. Every later attempt is skipped, scheduled ones
    /// included.
    pub fn shutdown(&self) {
        self.shared.breaker.destroy();
        info!(
            kind = %self.shared.store.kind(),
            pending = self.pending_count(),
            "sync coordinator shut down"
        );
    }
}

impl Shared {
    fn pending_count(&self) -> usize {
        self.pending.lock().changes.len()
    }

    async fn sync_local(self: &Arc<Self>) -> SyncOutcome {
        if self.pending_count() == 0 {
            return SyncOutcome::Synced(SyncReport::default());
        }
        let source = SyncSource::Local;
        let result = self
            .breaker
            .execute(source, source.as_str(), || self.flush())
            .await;
        self.settle(source, result)
    }

    async fn flush(&self) -> SyncResult<SyncReport> {
        let batch = self.pending.lock().snapshot();
        let mut report = SyncReport::default();

        for (id, change) in batch {
            let result = match &change.op {
                PendingOp::Save(entity) => self.push_save(entity, &mut report).await,
                PendingOp::Delete => self.push_delete(&id, &mut report).await,
            };
            match result {
                Ok(()) => {
                    self.pending.lock().settle(&id, change.seq);
                }
                // Remaining changes stay pending.
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) if err.is_permanent() => {
                    warn!(id = %id, error = %err, "local change dropped");
                    self.pending.lock().settle(&id, change.seq);
                    report.dropped.push(id);
                }
                Err(err) => {
                    warn!(id = %id, error = %err, "local change kept for the next sync");
                    report.requeued.push(id);
                }
            }
        }

        Ok(report)
    }

    async fn push_save(&self, entity: &Entity, report: &mut SyncReport) -> SyncResult<()> {
        match self.store.save(entity).await {
            Ok(_) => {
                report.saved.push(entity.id.clone());
                Ok(())
            }
            Err(err) if err.is_conflict() => {
                // The revision kept moving: settle against what is stored now.
                let stored = self.store.get(&entity.id).await?;
                let context = format!("{}:{}", SyncSource::Local, entity.id);
                let resolution =
                    self.resolver
                        .resolve_conflict(Some(entity), stored.as_ref(), &context, None)?;
                self.persist(&entity.id, &resolution).await?;
                self.note_conflict(&context, &entity.id, &resolution);
                report.resolved.push(entity.id.clone());
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn push_delete(&self, id: &str, report: &mut SyncReport) -> SyncResult<()> {
        self.store.delete(id).await?;
        report.deleted.push(id.to_string());
        Ok(())
    }

    async fn merge_remote(&self, context: &str, remote: Entity) -> SyncResult<SyncReport> {
        let id = remote.id.clone();
        let mut report = SyncReport::default();
        let pending = self.pending.lock().get(&id);
        let stored = self.store.get(&id).await?;

        let Some(pending) = pending else {
            match &stored {
                None => {
                    self.store.save(&remote).await?;
                    report.applied.push(id);
                }
                Some(stored) if differing_fields(stored, &remote).is_empty() => {
                    debug!(context, "remote change already present");
                    report.skipped.push(id);
                }
                Some(stored) => {
                    let resolution =
                        self.resolver
                            .resolve_conflict(Some(stored), Some(&remote), context, None)?;
                    if resolution.entity.as_ref() == Some(stored) {
                        debug!(context, strategy = %resolution.strategy, "stored version kept");
                        report.skipped.push(id);
                    } else {
                        self.persist(&id, &resolution).await?;
                        report.applied.push(id);
                    }
                }
            }
            return Ok(report);
        };

        // A local edit is in flight: this is a genuine concurrent change.
        let local = match &pending.op {
            PendingOp::Save(entity) => Some(entity),
            PendingOp::Delete => None,
        };
        let resolution = self
            .resolver
            .resolve_conflict(local, Some(&remote), context, None)?;
        self.persist(&id, &resolution).await?;
        self.pending.lock().settle(&id, pending.seq);
        self.note_conflict(context, &id, &resolution);
        report.resolved.push(id);
        Ok(report)
    }

    async fn merge_remote_deletion(&self, context: &str, id: &str) -> SyncResult<SyncReport> {
        let mut report = SyncReport::default();
        let pending = self.pending.lock().get(id);

        match pending {
            Some(PendingChange {
                op: PendingOp::Save(local),
                seq,
            }) => {
                let resolution = self
                    .resolver
                    .resolve_conflict(Some(&local), None, context, None)?;
                self.persist(id, &resolution).await?;
                self.pending.lock().settle(id, seq);
                self.note_conflict(context, id, &resolution);
                report.resolved.push(id.to_string());
            }
            pending => {
                if self.store.delete(id).await? {
                    report.deleted.push(id.to_string());
                } else {
                    report.skipped.push(id.to_string());
                }
                if let Some(change) = pending {
                    self.pending.lock().settle(id, change.seq);
                }
            }
        }
        Ok(report)
    }

    async fn persist(&self, id: &str, resolution: &Resolution) -> SyncResult<()> {
        match &resolution.entity {
            Some(entity) => {
                self.store.save(entity).await?;
            }
            None => {
                self.store.delete(id).await?;
            }
        }
        Ok(())
    }

    fn note_conflict(&self, context: &str, id: &str, resolution: &Resolution) {
        if resolution.record_id.is_none() {
            return;
        }
        self.breaker.record_conflict(context, resolution.kind.as_str());
        self.events.emit(SyncEvent::ConflictResolved {
            context: context.to_string(),
            entity_id: id.to_string(),
            kind: resolution.kind,
            strategy: resolution.strategy.clone(),
            chosen: resolution.chosen,
            fell_back: resolution.fell_back,
        });
    }

    fn settle(
        self: &Arc<Self>,
        source: SyncSource,
        result: Result<SyncReport, BreakerError<SyncError>>,
    ) -> SyncOutcome {
        let outcome = match result {
            Ok(report) => {
                self.recover();
                SyncOutcome::Synced(report)
            }
            Err(BreakerError::Rejected(rejection)) => {
                match &rejection {
                    Rejection::CircuitOpen => self.degrade(rejection.to_string()),
                    Rejection::Debounced { remaining, .. } if source == SyncSource::Local => {
                        self.schedule_flush(*remaining);
                    }
                    Rejection::InProgress if source == SyncSource::Local => {
                        self.flush_rerun.store(true, Ordering::SeqCst);
                    }
                    _ => {}
                }
                SyncOutcome::Skipped(rejection)
            }
            Err(err @ BreakerError::Timeout(_)) => {
                self.degrade(err.to_string());
                SyncOutcome::Failed(err.to_string())
            }
            Err(BreakerError::Operation(err)) => {
                if err.is_fatal() || self.breaker.is_open() {
                    self.degrade(err.to_string());
                }
                SyncOutcome::Failed(err.to_string())
            }
        };
        self.claim_rerun();
        outcome
    }

    /// Schedules the flush a concurrent local attempt asked for, once no
    /// attempt is in flight.
    ///
    /// The running attempt releases the breaker before it settles and the
    /// rejected one raises the flag before it looks, so one of the two
    /// always sees both.
    fn claim_rerun(self: &Arc<Self>) {
        if !self.breaker.is_busy() && self.flush_rerun.swap(false, Ordering::SeqCst) {
            self.schedule_flush(Duration::ZERO);
        }
    }

    /// Runs one trailing `sync_local` after `delay`. At most one is
    /// scheduled at a time.
    fn schedule_flush(self: &Arc<Self>, delay: Duration) {
        if self.flush_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(delay_ms = delay.as_millis() as u64, "trailing local flush scheduled");
        let shared = Arc::downgrade(self);
        tokio::spawn(async move {
            time::sleep(delay).await;
            let Some(shared) = shared.upgrade() else {
                return;
            };
            shared.flush_scheduled.store(false, Ordering::SeqCst);
            shared.sync_local().await;
        });
    }

    /// Retries the store every recovery interval while degraded, closing an
    /// open circuit first.
    fn start_recovery(self: &Arc<Self>) {
        let Some(interval) = self.recovery_interval else {
            return;
        };
        if self.recovering.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                time::sleep(interval).await;
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                if !shared.degraded.load(Ordering::SeqCst) || shared.breaker.is_destroyed() {
                    shared.recovering.store(false, Ordering::SeqCst);
                    return;
                }
                if shared.breaker.is_open() {
                    info!(kind = %shared.store.kind(), "closing sync circuit to retry the store");
                    shared.breaker.reset();
                }
                if shared.sync_local().await.is_synced() {
                    shared.recover();
                    shared.recovering.store(false, Ordering::SeqCst);
                    return;
                }
            }
        });
    }

    fn degrade(self: &Arc<Self>, reason: String) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!(kind = %self.store.kind(), reason = %reason, "sync degraded");
            self.events.emit(SyncEvent::Degraded { reason });
        }
        self.start_recovery();
    }

    fn recover(&self) {
        if self.degraded.swap(false, Ordering::SeqCst) {
            info!(kind = %self.store.kind(), "sync recovered");
            self.events.emit(SyncEvent::Recovered);
        }
    }
}

impl fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("kind", self.shared.store.kind())
            .field("pending", &self.pending_count())
            .field("degraded", &self.is_degraded())
            .field("circuit", &self.shared.breaker.state())
            .finish()
    }
}
