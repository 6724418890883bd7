//! The sync circuit breaker.
//!
//! Every sync attempt goes through [`SyncCircuitBreaker::execute`], which
//! enforces single flight, per-source debouncing, a hard timeout and a
//! circuit that opens after a run of failures. A periodic health check can
//! tighten the breaker once when sync keeps going badly.

use crate::config::BreakerConfig;
use crate::error::{BreakerError, Rejection};
use crate::events::{SyncEvent, SyncEvents};
use crate::health::{health_score, HealthInputs};
use crate::source::SyncSource;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// State of the circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    /// Attempts are allowed.
    Closed,
    /// Attempts are rejected until [`SyncCircuitBreaker::reset`].
    Open,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
        }
    }
}

/// Read-only snapshot of breaker metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStats {
    /// Circuit state.
    pub state: CircuitState,
    /// Attempts that ran.
    pub total_attempts: u64,
    /// Attempts that succeeded.
    pub successful: u64,
    /// Attempts that failed, timeouts included.
    pub failed: u64,
    /// Attempts that timed out.
    pub timeouts: u64,
    /// Failures in a row.
    pub consecutive_errors: u32,
    /// Conflicts recorded.
    pub conflicts: u64,
    /// Conflicts per attempt.
    pub conflict_rate: f64,
    /// Rejections per reason.
    pub rejections: BTreeMap<String, u64>,
    /// Rolling average attempt duration in milliseconds.
    pub average_duration_ms: Option<f64>,
    /// Last computed health score.
    pub health: f64,
    /// Whether the auto-rollback has fired.
    pub rolled_back: bool,
    /// Effective cooldown per source in milliseconds.
    pub cooldowns_ms: BTreeMap<String, u64>,
    /// Effective error tolerance.
    pub max_consecutive_errors: u32,
    /// Whether the breaker was destroyed.
    pub destroyed: bool,
    /// Description of the last failure.
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct Metrics {
    total: u64,
    successful: u64,
    failed: u64,
    timeouts: u64,
    consecutive_errors: u32,
    conflicts: u64,
    durations: VecDeque<Duration>,
    average: Option<Duration>,
    rejections: BTreeMap<&'static str, u64>,
    last_attempt: HashMap<SyncSource, Instant>,
    health: f64,
    last_error: Option<String>,
}

impl Metrics {
    fn new() -> Self {
        Self {
            total: 0,
            successful: 0,
            failed: 0,
            timeouts: 0,
            consecutive_errors: 0,
            conflicts: 0,
            durations: VecDeque::new(),
            average: None,
            rejections: BTreeMap::new(),
            last_attempt: HashMap::new(),
            health: 100.0,
            last_error: None,
        }
    }
}

/// Settings the auto-rollback may tighten. Survive [`SyncCircuitBreaker::reset`].
#[derive(Debug)]
struct Tuning {
    cooldowns: HashMap<SyncSource, Duration>,
    max_consecutive_errors: u32,
    rolled_back: bool,
}

impl Tuning {
    fn cooldown(&self, source: SyncSource) -> Duration {
        self.cooldowns.get(&source).copied().unwrap_or_default()
    }
}

#[derive(Debug)]
struct Inner {
    circuit: CircuitState,
    metrics: Metrics,
    tuning: Tuning,
}

impl Inner {
    fn health_inputs(&self, slow_threshold: Duration) -> HealthInputs {
        HealthInputs {
            total: self.metrics.total,
            successful: self.metrics.successful,
            consecutive_errors: self.metrics.consecutive_errors,
            max_consecutive_errors: self.tuning.max_consecutive_errors,
            conflicts: self.metrics.conflicts,
            average_duration: self.metrics.average,
            slow_threshold,
        }
    }

    fn cooldown_remaining(&self, source: SyncSource, now: Instant) -> Option<Duration> {
        let last = self.metrics.last_attempt.get(&source)?;
        let elapsed = now.saturating_duration_since(*last);
        let cooldown = self.tuning.cooldown(source);
        (elapsed < cooldown).then(|| cooldown - elapsed)
    }
}

/// Clears the in-flight flag when an attempt ends, even if the caller's
/// future is dropped mid-attempt.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Gatekeeper for sync attempts.
///
/// # Example
///
/// ```rust
/// use driftsync_engine::{BreakerConfig, SyncCircuitBreaker, SyncEvents, SyncSource};
/// use std::sync::Arc;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let breaker = SyncCircuitBreaker::new(BreakerConfig::default(), Arc::new(SyncEvents::new()));
/// let value = breaker
///     .execute(SyncSource::Local, "flush", || async { Ok::<_, std::io::Error>(7) })
///     .await
///     .unwrap();
/// assert_eq!(value, 7);
/// # });
/// ```
#[derive(Debug)]
pub struct SyncCircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
    busy: AtomicBool,
    destroyed: AtomicBool,
    events: Arc<SyncEvents>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl SyncCircuitBreaker {
    /// Creates a closed breaker that reports to `events`.
    pub fn new(config: BreakerConfig, events: Arc<SyncEvents>) -> Self {
        let tuning = Tuning {
            cooldowns: SyncSource::ALL
                .into_iter()
                .map(|source| (source, config.cooldown(source)))
                .collect(),
            max_consecutive_errors: config.max_consecutive_errors.max(1),
            rolled_back: false,
        };
        Self {
            config,
            inner: Mutex::new(Inner {
                circuit: CircuitState::Closed,
                metrics: Metrics::new(),
                tuning,
            }),
            busy: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            events,
            monitor: Mutex::new(None),
        }
    }

    /// Returns the configuration the breaker was created with.
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Returns the event channel.
    pub fn events(&self) -> &Arc<SyncEvents> {
        &self.events
    }

    /// Returns the circuit state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().circuit
    }

    /// Returns true while the circuit is open.
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Returns true while an attempt is in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Returns true once [`Self::destroy`] was called.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Returns the last computed health score.
    pub fn health(&self) -> f64 {
        self.inner.lock().metrics.health
    }

    /// Runs `operation` as one sync attempt.
    ///
    /// The attempt is rejected without running, and without counting as a
    /// failure, when the breaker is destroyed, another attempt is in flight,
    /// `source` attempted within its cooldown, or the circuit is open.
    /// Otherwise the operation runs under the configured timeout; a timeout
    /// counts as a failure and drops the operation's future.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::Rejected`], [`BreakerError::Timeout`] or the
    /// operation's own error as [`BreakerError::Operation`].
    pub async fn execute<T, E, F, Fut>(
        &self,
        source: SyncSource,
        context: &str,
        operation: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let _busy = match self.admit(source) {
            Ok(guard) => guard,
            Err(rejection) => {
                debug!(source = %source, context, reason = rejection.reason(), "sync attempt rejected");
                self.events.emit(SyncEvent::AttemptRejected {
                    source,
                    context: context.to_string(),
                    reason: rejection.clone(),
                });
                return Err(BreakerError::Rejected(rejection));
            }
        };

        let timeout = self.config.operation_timeout;
        let started = Instant::now();
        match time::timeout(timeout, operation()).await {
            Ok(Ok(value)) => {
                self.record_success(source, context, started.elapsed());
                Ok(value)
            }
            Ok(Err(err)) => {
                self.record_failure(source, context, err.to_string(), false);
                Err(BreakerError::Operation(err))
            }
            Err(_) => {
                self.record_failure(source, context, format!("timed out after {timeout:?}"), true);
                Err(BreakerError::Timeout(timeout))
            }
        }
    }

    fn admit(&self, source: SyncSource) -> Result<BusyGuard<'_>, Rejection> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let rejection = if self.is_destroyed() {
            Some(Rejection::Destroyed)
        } else if self.busy.load(Ordering::SeqCst) {
            Some(Rejection::InProgress)
        } else if let Some(remaining) = inner.cooldown_remaining(source, now) {
            Some(Rejection::Debounced { source, remaining })
        } else if inner.circuit == CircuitState::Open {
            Some(Rejection::CircuitOpen)
        } else {
            None
        };

        if let Some(rejection) = rejection {
            *inner.metrics.rejections.entry(rejection.reason()).or_default() += 1;
            return Err(rejection);
        }

        self.busy.store(true, Ordering::SeqCst);
        inner.metrics.last_attempt.insert(source, now);
        Ok(BusyGuard(&self.busy))
    }

    fn record_success(&self, source: SyncSource, context: &str, elapsed: Duration) {
        {
            let mut inner = self.inner.lock();
            let window = self.config.duration_window.max(1);
            let metrics = &mut inner.metrics;
            metrics.total += 1;
            metrics.successful += 1;
            metrics.consecutive_errors = 0;
            metrics.durations.push_back(elapsed);
            while metrics.durations.len() > window {
                metrics.durations.pop_front();
            }
            let sum: Duration = metrics.durations.iter().sum();
            metrics.average = Some(sum / metrics.durations.len() as u32);
        }

        debug!(source = %source, context, elapsed_ms = elapsed.as_millis() as u64, "sync attempt succeeded");
        self.events.emit(SyncEvent::AttemptSucceeded {
            source,
            context: context.to_string(),
            duration: elapsed,
        });
    }

    fn record_failure(&self, source: SyncSource, context: &str, error: String, timed_out: bool) {
        let (consecutive, opened) = {
            let mut inner = self.inner.lock();
            let max = inner.tuning.max_consecutive_errors;
            let metrics = &mut inner.metrics;
            metrics.total += 1;
            metrics.failed += 1;
            if timed_out {
                metrics.timeouts += 1;
            }
            metrics.consecutive_errors += 1;
            metrics.last_error = Some(error.clone());
            let consecutive = metrics.consecutive_errors;

            let opened = inner.circuit == CircuitState::Closed && consecutive >= max;
            if opened {
                inner.circuit = CircuitState::Open;
            }
            (consecutive, opened)
        };

        warn!(source = %source, context, error = %error, consecutive, "sync attempt failed");
        self.events.emit(SyncEvent::AttemptFailed {
            source,
            context: context.to_string(),
            error,
            consecutive_errors: consecutive,
        });

        if opened {
            warn!(consecutive, "sync circuit opened");
            self.events.emit(SyncEvent::CircuitOpened {
                consecutive_errors: consecutive,
            });
        }
    }

    /// Counts a conflict towards the conflict rate.
    ///
    /// Conflicts only feed health and readiness; they never gate attempts.
    pub fn record_conflict(&self, context: &str, details: &str) {
        self.inner.lock().metrics.conflicts += 1;
        debug!(context, details, "sync conflict recorded");
    }

    /// Recomputes the health score and applies the one-time auto-rollback
    /// when health drops below the threshold.
    pub fn check_health(&self) -> f64 {
        let (score, rollback) = {
            let mut inner = self.inner.lock();
            let score = health_score(&inner.health_inputs(self.config.slow_threshold));
            inner.metrics.health = score;

            let rollback = if score < self.config.auto_rollback_threshold && !inner.tuning.rolled_back {
                let tuning = &mut inner.tuning;
                tuning.rolled_back = true;
                for cooldown in tuning.cooldowns.values_mut() {
                    *cooldown = cooldown.saturating_mul(2);
                }
                tuning.max_consecutive_errors = tuning.max_consecutive_errors.saturating_sub(1).max(1);
                Some(tuning.max_consecutive_errors)
            } else {
                None
            };
            (score, rollback)
        };

        debug!(health = score, "sync health checked");
        self.events.emit(SyncEvent::HealthUpdated { score });

        if let Some(max_consecutive_errors) = rollback {
            warn!(health = score, max_consecutive_errors, "sync health poor, cooldowns doubled");
            self.events.emit(SyncEvent::AutoRollback {
                score,
                max_consecutive_errors,
            });
        }
        score
    }

    /// Returns true when sync is healthy enough to widen its scope.
    pub fn is_ready_for_progressive_sync(&self) -> bool {
        let inner = self.inner.lock();
        let inputs = inner.health_inputs(self.config.slow_threshold);
        inner.metrics.health >= self.config.progressive_health_threshold
            && inputs.conflict_rate() < self.config.progressive_conflict_ceiling
            && inputs.consecutive_errors == 0
    }

    /// Returns a snapshot of the metrics.
    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock();
        let metrics = &inner.metrics;
        BreakerStats {
            state: inner.circuit,
            total_attempts: metrics.total,
            successful: metrics.successful,
            failed: metrics.failed,
            timeouts: metrics.timeouts,
            consecutive_errors: metrics.consecutive_errors,
            conflicts: metrics.conflicts,
            conflict_rate: inner.health_inputs(self.config.slow_threshold).conflict_rate(),
            rejections: metrics
                .rejections
                .iter()
                .map(|(reason, count)| (reason.to_string(), *count))
                .collect(),
            average_duration_ms: metrics.average.map(|avg| avg.as_micros() as f64 / 1000.0),
            health: metrics.health,
            rolled_back: inner.tuning.rolled_back,
            cooldowns_ms: SyncSource::ALL
                .iter()
                .map(|source| {
                    let ms = inner.tuning.cooldown(*source).as_millis() as u64;
                    (source.to_string(), ms)
                })
                .collect(),
            max_consecutive_errors: inner.tuning.max_consecutive_errors,
            destroyed: self.is_destroyed(),
            last_error: metrics.last_error.clone(),
        }
    }

    /// Closes the circuit and clears metrics and health.
    ///
    /// A fired auto-rollback and the tolerances it tightened stay in effect.
    pub fn reset(&self) {
        {
            let mut inner = self.inner.lock();
            inner.circuit = CircuitState::Closed;
            inner.metrics = Metrics::new();
        }
        info!("sync circuit reset");
        self.events.emit(SyncEvent::CircuitReset);
    }

    /// Permanently rejects further attempts and stops the health monitor.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.abort();
        }
        info!("sync circuit breaker destroyed");
    }

    /// Starts the periodic health check on the current tokio runtime.
    ///
    /// Does nothing if the monitor is already running or the breaker was
    /// destroyed. The task ends when the breaker is destroyed or dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start_health_monitor(self: &Arc<Self>) {
        let mut slot = self.monitor.lock();
        if self.is_destroyed() || slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let period = self.config.health_check_interval;
        let breaker = Arc::downgrade(self);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(breaker) = breaker.upgrade() else {
                    break;
                };
                if breaker.is_destroyed() {
                    break;
                }
                breaker.check_health();
            }
        }));
        debug!(interval_ms = period.as_millis() as u64, "sync health monitor started");
    }
}

impl Drop for SyncCircuitBreaker {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.get_mut().take() {
            monitor.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn breaker(config: BreakerConfig) -> SyncCircuitBreaker {
        SyncCircuitBreaker::new(config, Arc::new(SyncEvents::new()))
    }

    async fn ok(breaker: &SyncCircuitBreaker, source: SyncSource) -> Result<(), BreakerError<io::Error>> {
        breaker.execute(source, "test", || async { Ok(()) }).await
    }

    async fn fail(breaker: &SyncCircuitBreaker, source: SyncSource) -> Result<(), BreakerError<io::Error>> {
        breaker
            .execute(source, "test", || async { Err(io::Error::other("boom")) })
            .await
    }

    fn drain(rx: &mut UnboundedReceiver<SyncEvent>) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn success_returns_value_and_records_duration() {
        let breaker = breaker(BreakerConfig::default());
        let value = breaker
            .execute(SyncSource::Local, "flush", || async {
                time::sleep(Duration::from_millis(40)).await;
                Ok::<_, io::Error>(42)
            })
            .await
            .unwrap();
        assert_eq!(value, 42);

        let stats = breaker.stats();
        assert_eq!(stats.total_attempts, 1);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.average_duration_ms, Some(40.0));
    }

    #[tokio::test(start_paused = true)]
    async fn same_source_is_debounced() {
        let breaker = breaker(BreakerConfig::default());
        ok(&breaker, SyncSource::Local).await.unwrap();

        time::advance(Duration::from_millis(100)).await;
        let err = ok(&breaker, SyncSource::Local).await.unwrap_err();
        assert_eq!(
            err.rejection(),
            Some(&Rejection::Debounced {
                source: SyncSource::Local,
                remaining: Duration::from_millis(200),
            })
        );

        // Other sources keep their own cooldowns.
        ok(&breaker, SyncSource::Remote).await.unwrap();

        time::advance(Duration::from_millis(200)).await;
        ok(&breaker, SyncSource::Local).await.unwrap();

        let stats = breaker.stats();
        assert_eq!(stats.total_attempts, 3);
        assert_eq!(stats.rejections.get("debounced"), Some(&1));
        assert_eq!(stats.consecutive_errors, 0);
    }

    #[tokio::test]
    async fn circuit_opens_after_consecutive_failures() {
        let breaker = breaker(
            BreakerConfig::default()
                .without_cooldowns()
                .with_max_consecutive_errors(3),
        );
        for _ in 0..3 {
            assert!(matches!(
                fail(&breaker, SyncSource::Local).await,
                Err(BreakerError::Operation(_))
            ));
        }
        assert!(breaker.is_open());

        let invoked = AtomicU32::new(0);
        let err = breaker
            .execute(SyncSource::Local, "test", || async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, io::Error>(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::CircuitOpen));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(breaker.stats().failed, 3);
    }

    #[tokio::test]
    async fn success_clears_the_failure_streak() {
        let breaker = breaker(
            BreakerConfig::default()
                .without_cooldowns()
                .with_max_consecutive_errors(3),
        );
        fail(&breaker, SyncSource::Local).await.unwrap_err();
        fail(&breaker, SyncSource::Local).await.unwrap_err();
        ok(&breaker, SyncSource::Local).await.unwrap();
        fail(&breaker, SyncSource::Local).await.unwrap_err();

        assert!(!breaker.is_open());
        assert_eq!(breaker.stats().consecutive_errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn single_flight_across_sources() {
        let breaker = breaker(BreakerConfig::default());
        let slow = breaker.execute(SyncSource::Local, "slow", || async {
            time::sleep(Duration::from_secs(1)).await;
            Ok::<_, io::Error>("done")
        });
        let eager = ok(&breaker, SyncSource::Remote);

        let (slow, eager) = tokio::join!(slow, eager);
        assert_eq!(slow.unwrap(), "done");
        assert_eq!(eager.unwrap_err().rejection(), Some(&Rejection::InProgress));
        assert!(!breaker.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failure() {
        let breaker = breaker(BreakerConfig::default().with_operation_timeout(Duration::from_secs(1)));
        let err = breaker
            .execute(SyncSource::Local, "hang", || async {
                time::sleep(Duration::from_secs(60)).await;
                Ok::<_, io::Error>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BreakerError::Timeout(d) if d == Duration::from_secs(1)));

        let stats = breaker.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.consecutive_errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_caller_releases_the_flight() {
        let breaker = breaker(BreakerConfig::default());
        let abandoned = breaker.execute(SyncSource::Local, "abandoned", || async {
            time::sleep(Duration::from_secs(10)).await;
            Ok::<_, io::Error>(())
        });
        assert!(time::timeout(Duration::from_millis(10), abandoned).await.is_err());

        ok(&breaker, SyncSource::Remote).await.unwrap();
    }

    #[tokio::test]
    async fn rejections_are_not_failures() {
        let breaker = breaker(BreakerConfig::default());
        ok(&breaker, SyncSource::Local).await.unwrap();
        for _ in 0..10 {
            assert!(ok(&breaker, SyncSource::Local).await.unwrap_err().is_rejection());
        }
        let stats = breaker.stats();
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.consecutive_errors, 0);
        assert!(!breaker.is_open());
    }

    #[tokio::test]
    async fn rejections_are_emitted() {
        let breaker = breaker(BreakerConfig::default());
        let mut rx = breaker.events().subscribe();
        ok(&breaker, SyncSource::CrossTab).await.unwrap();
        ok(&breaker, SyncSource::CrossTab).await.unwrap_err();

        let events = drain(&mut rx);
        assert!(matches!(events[0], SyncEvent::AttemptSucceeded { source: SyncSource::CrossTab, .. }));
        assert!(matches!(
            &events[1],
            SyncEvent::AttemptRejected { reason: Rejection::Debounced { .. }, .. }
        ));
    }

    #[tokio::test]
    async fn auto_rollback_fires_once() {
        let breaker = breaker(
            BreakerConfig::default()
                .without_cooldowns()
                .with_cooldown(SyncSource::Local, Duration::from_millis(1))
                .with_max_consecutive_errors(2),
        );
        let mut rx = breaker.events().subscribe();

        fail(&breaker, SyncSource::Remote).await.unwrap_err();
        fail(&breaker, SyncSource::Remote).await.unwrap_err();

        // 0 success, full streak, no conflicts, fast: 20 + 10
        assert_eq!(breaker.check_health(), 30.0);
        assert_eq!(breaker.check_health(), 30.0);

        let rollbacks: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, SyncEvent::AutoRollback { .. }))
            .collect();
        assert_eq!(
            rollbacks,
            vec![SyncEvent::AutoRollback {
                score: 30.0,
                max_consecutive_errors: 1,
            }]
        );

        let stats = breaker.stats();
        assert!(stats.rolled_back);
        assert_eq!(stats.max_consecutive_errors, 1);
        assert_eq!(stats.cooldowns_ms.get("local"), Some(&2));
    }

    #[tokio::test]
    async fn reset_keeps_tightened_tolerance() {
        let breaker = breaker(
            BreakerConfig::default()
                .without_cooldowns()
                .with_max_consecutive_errors(2),
        );
        fail(&breaker, SyncSource::Local).await.unwrap_err();
        fail(&breaker, SyncSource::Local).await.unwrap_err();
        assert!(breaker.is_open());
        breaker.check_health();

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        let stats = breaker.stats();
        assert_eq!(stats.total_attempts, 0);
        assert_eq!(stats.health, 100.0);
        assert!(stats.rolled_back);
        assert_eq!(stats.max_consecutive_errors, 1);

        // Tolerance is now one failure.
        fail(&breaker, SyncSource::Local).await.unwrap_err();
        assert!(breaker.is_open());
    }

    #[tokio::test]
    async fn progressive_sync_readiness() {
        let breaker = breaker(BreakerConfig::default().without_cooldowns());
        assert!(breaker.is_ready_for_progressive_sync());

        fail(&breaker, SyncSource::Local).await.unwrap_err();
        assert!(!breaker.is_ready_for_progressive_sync());

        for _ in 0..9 {
            ok(&breaker, SyncSource::Local).await.unwrap();
        }
        breaker.check_health();
        assert!(breaker.is_ready_for_progressive_sync());

        // One conflict in ten attempts reaches the ceiling.
        breaker.record_conflict("remote:task-1", "version");
        assert!(!breaker.is_ready_for_progressive_sync());
        assert_eq!(breaker.stats().conflicts, 1);
    }

    #[tokio::test]
    async fn destroyed_breaker_rejects() {
        let breaker = breaker(BreakerConfig::default());
        breaker.destroy();
        let err = ok(&breaker, SyncSource::Local).await.unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::Destroyed));
        assert!(breaker.stats().destroyed);
    }

    #[tokio::test(start_paused = true)]
    async fn health_monitor_runs_until_destroyed() {
        let breaker = Arc::new(breaker(
            BreakerConfig::default().with_health_check_interval(Duration::from_secs(30)),
        ));
        let mut rx = breaker.events().subscribe();
        breaker.start_health_monitor();
        breaker.start_health_monitor();

        time::sleep(Duration::from_secs(61)).await;
        let checks = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, SyncEvent::HealthUpdated { .. }))
            .count();
        assert_eq!(checks, 2);

        breaker.destroy();
        time::sleep(Duration::from_secs(120)).await;
        assert!(drain(&mut rx).is_empty());
    }
}
