//! Typed sync event channel.

use crate::error::Rejection;
use crate::source::SyncSource;
use driftsync_conflict::{ConflictKind, Side};
use parking_lot::RwLock;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// An observable sync event.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// An attempt completed successfully.
    AttemptSucceeded {
        /// Attempt source.
        source: SyncSource,
        /// Caller-supplied label.
        context: String,
        /// Wall time of the attempt.
        duration: Duration,
    },
    /// An attempt failed or timed out.
    AttemptFailed {
        /// Attempt source.
        source: SyncSource,
        /// Caller-supplied label.
        context: String,
        /// Failure description.
        error: String,
        /// Failures in a row, including this one.
        consecutive_errors: u32,
    },
    /// An attempt was refused without running.
    AttemptRejected {
        /// Attempt source.
        source: SyncSource,
        /// Caller-supplied label.
        context: String,
        /// Why it was refused.
        reason: Rejection,
    },
    /// The circuit opened.
    CircuitOpened {
        /// Failures in a row that opened it.
        consecutive_errors: u32,
    },
    /// The circuit was reset.
    CircuitReset,
    /// A health check ran.
    HealthUpdated {
        /// Health score, 0 to 100.
        score: f64,
    },
    /// The breaker tightened itself after poor health.
    AutoRollback {
        /// Health score that triggered the rollback.
        score: f64,
        /// Error tolerance after the rollback.
        max_consecutive_errors: u32,
    },
    /// The coordinator settled a conflict.
    ConflictResolved {
        /// Resolution context.
        context: String,
        /// Entity id.
        entity_id: String,
        /// Kind of conflict.
        kind: ConflictKind,
        /// Strategy applied.
        strategy: String,
        /// Side kept.
        chosen: Side,
        /// Whether a custom strategy fell back to last-write-wins.
        fell_back: bool,
    },
    /// Sync entered degraded mode.
    Degraded {
        /// What caused it.
        reason: String,
    },
    /// Sync left degraded mode.
    Recovered,
}

/// Fan-out of [`SyncEvent`]s to any number of subscribers.
///
/// Subscribers whose receiver was dropped are pruned on the next emit.
/// Channels are unbounded, so emitting never blocks or drops an event; a
/// receiver that is kept alive but never drained holds every event sent to
/// it. Drop a receiver to unsubscribe.
#[derive(Debug, Default)]
pub struct SyncEvents {
    subscribers: RwLock<Vec<UnboundedSender<SyncEvent>>>,
}

impl SyncEvents {
    /// Creates a channel with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to every subsequent event.
    ///
    /// Events queue in the receiver until read; drain it or drop it.
    pub fn subscribe(&self) -> UnboundedReceiver<SyncEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Delivers `event` to every live subscriber.
    pub fn emit(&self, event: SyncEvent) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns the number of subscribers, including ones not yet pruned.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_reaches_every_subscriber() {
        let events = SyncEvents::new();
        let mut first = events.subscribe();
        let mut second = events.subscribe();

        events.emit(SyncEvent::CircuitReset);

        assert_eq!(first.try_recv().unwrap(), SyncEvent::CircuitReset);
        assert_eq!(second.try_recv().unwrap(), SyncEvent::CircuitReset);
        assert!(first.try_recv().is_err());
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let events = SyncEvents::new();
        let mut kept = events.subscribe();
        let dropped = events.subscribe();
        assert_eq!(events.subscriber_count(), 2);

        drop(dropped);
        events.emit(SyncEvent::Recovered);

        assert_eq!(events.subscriber_count(), 1);
        assert_eq!(kept.try_recv().unwrap(), SyncEvent::Recovered);
    }

    #[test]
    fn undrained_subscriber_keeps_every_event() {
        let events = SyncEvents::new();
        let mut idle = events.subscribe();
        for _ in 0..1000 {
            events.emit(SyncEvent::CircuitReset);
        }

        let mut queued = 0;
        while idle.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, 1000);

        drop(idle);
        events.emit(SyncEvent::Recovered);
        assert_eq!(events.subscriber_count(), 0);
    }

    #[test]
    fn emit_without_subscribers() {
        let events = SyncEvents::new();
        events.emit(SyncEvent::HealthUpdated { score: 100.0 });
        assert_eq!(events.subscriber_count(), 0);
    }
}
