//! Configuration for the circuit breaker and the coordinator.

use crate::source::SyncSource;
use driftsync_conflict::ResolverConfig;
use driftsync_core::AdapterConfig;
use std::time::Duration;

/// Configuration for a [`crate::SyncCircuitBreaker`].
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Minimum gap between attempts from local mutations.
    pub local_cooldown: Duration,
    /// Minimum gap between attempts from the remote replica.
    pub remote_cooldown: Duration,
    /// Minimum gap between attempts from other tabs.
    pub cross_tab_cooldown: Duration,
    /// Consecutive failures that open the circuit.
    pub max_consecutive_errors: u32,
    /// Hard limit on a single attempt.
    pub operation_timeout: Duration,
    /// Period of the health monitor.
    pub health_check_interval: Duration,
    /// Average duration above which performance counts as degraded.
    pub slow_threshold: Duration,
    /// Health score below which the breaker tightens itself once.
    pub auto_rollback_threshold: f64,
    /// Minimum health score for progressive sync.
    pub progressive_health_threshold: f64,
    /// Conflict rate at or above which progressive sync is withheld.
    pub progressive_conflict_ceiling: f64,
    /// Attempts kept in the rolling duration window.
    pub duration_window: usize,
}

impl BreakerConfig {
    /// Returns the cooldown of `source`.
    pub fn cooldown(&self, source: SyncSource) -> Duration {
        match source {
            SyncSource::Local => self.local_cooldown,
            SyncSource::Remote => self.remote_cooldown,
            SyncSource::CrossTab => self.cross_tab_cooldown,
        }
    }

    /// Sets the cooldown of `source`.
    pub fn with_cooldown(mut self, source: SyncSource, cooldown: Duration) -> Self {
        match source {
            SyncSource::Local => self.local_cooldown = cooldown,
            SyncSource::Remote => self.remote_cooldown = cooldown,
            SyncSource::CrossTab => self.cross_tab_cooldown = cooldown,
        }
        self
    }

    /// Sets every cooldown to zero.
    pub fn without_cooldowns(self) -> Self {
        SyncSource::ALL
            .into_iter()
            .fold(self, |config, source| config.with_cooldown(source, Duration::ZERO))
    }

    /// Sets the consecutive failures that open the circuit.
    pub fn with_max_consecutive_errors(mut self, max: u32) -> Self {
        self.max_consecutive_errors = max.max(1);
        self
    }

    /// Sets the per-attempt timeout.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Sets the health monitor period.
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Sets the slow-attempt threshold.
    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    /// Sets the auto-rollback threshold.
    pub fn with_auto_rollback_threshold(mut self, threshold: f64) -> Self {
        self.auto_rollback_threshold = threshold;
        self
    }

    /// Sets the conflict ceiling for progressive sync.
    pub fn with_progressive_conflict_ceiling(mut self, ceiling: f64) -> Self {
        self.progressive_conflict_ceiling = ceiling;
        self
    }

    /// Sets the rolling duration window size.
    pub fn with_duration_window(mut self, window: usize) -> Self {
        self.duration_window = window.max(1);
        self
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            local_cooldown: Duration::from_millis(300),
            remote_cooldown: Duration::from_millis(1000),
            cross_tab_cooldown: Duration::from_millis(100),
            max_consecutive_errors: 5,
            operation_timeout: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(30),
            slow_threshold: Duration::from_secs(5),
            auto_rollback_threshold: 50.0,
            progressive_health_threshold: 70.0,
            progressive_conflict_ceiling: 0.1,
            duration_window: 10,
        }
    }
}

/// Configuration for a [`crate::SyncCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Storage adapter configuration.
    pub adapter: AdapterConfig,
    /// Circuit breaker configuration.
    pub breaker: BreakerConfig,
    /// Conflict resolver configuration.
    pub resolver: ResolverConfig,
    /// How often a degraded coordinator closes the circuit and retries its
    /// pending changes. `None` leaves recovery to
    /// [`crate::SyncCoordinator::reset_circuit`].
    pub recovery_interval: Option<Duration>,
}

impl CoordinatorConfig {
    /// Creates a configuration with default breaker and resolver settings.
    pub fn new(adapter: AdapterConfig) -> Self {
        Self {
            adapter,
            breaker: BreakerConfig::default(),
            resolver: ResolverConfig::default(),
            recovery_interval: Some(Duration::from_secs(30)),
        }
    }

    /// Sets the breaker configuration.
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Sets the resolver configuration.
    pub fn with_resolver(mut self, resolver: ResolverConfig) -> Self {
        self.resolver = resolver;
        self
    }

    /// Sets the recovery retry interval.
    pub fn with_recovery_interval(mut self, interval: Duration) -> Self {
        self.recovery_interval = Some(interval);
        self
    }

    /// Disables automatic recovery.
    pub fn without_recovery(mut self) -> Self {
        self.recovery_interval = None;
        self
    }
}
