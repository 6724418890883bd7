//! Bounded retry with pluggable backoff.
//!
//! Two failure classes are retried, each against its own budget:
//!
//! - revision conflicts are retried immediately, the next attempt re-reads
//!   the current revision
//! - connection-class failures wait for the backoff delay; every attempt
//!   re-acquires the live store, so a swapped connection is picked up
//!
//! Everything else fails on the first occurrence.

use crate::error::{CoreError, CoreResult};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Computes the wait before a retry.
pub trait Backoff: Send + Sync + fmt::Debug {
    /// Returns the delay before retry number `retry` (1-based).
    fn delay(&self, retry: u32) -> Duration;
}

/// `retry × step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoff {
    /// Delay added per retry.
    pub step: Duration,
}

impl LinearBackoff {
    /// Creates a linear backoff.
    pub fn new(step: Duration) -> Self {
        Self { step }
    }
}

impl Backoff for LinearBackoff {
    fn delay(&self, retry: u32) -> Duration {
        self.step.saturating_mul(retry)
    }
}

/// `initial × multiplier^(retry - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound on any delay.
    pub max: Duration,
    /// Growth factor per retry.
    pub multiplier: f64,
}

impl ExponentialBackoff {
    /// Creates an exponential backoff doubling from `initial`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            multiplier: 2.0,
        }
    }

    /// Sets the growth factor.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max.as_secs_f64()))
    }
}

/// Retries immediately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoBackoff;

impl Backoff for NoBackoff {
    fn delay(&self, _retry: u32) -> Duration {
        Duration::ZERO
    }
}

/// Retry budgets and backoff for adapter operations.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after a revision conflict.
    pub conflict_retries: u32,
    /// Retries after a connection-class failure.
    pub connection_retries: u32,
    /// Wait before each connection retry.
    pub backoff: Arc<dyn Backoff>,
}

impl RetryPolicy {
    /// Creates a policy with the given budgets and linear 300 ms backoff.
    pub fn new(conflict_retries: u32, connection_retries: u32) -> Self {
        Self {
            conflict_retries,
            connection_retries,
            backoff: Arc::new(LinearBackoff::new(Duration::from_millis(300))),
        }
    }

    /// Creates a policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            conflict_retries: 0,
            connection_retries: 0,
            backoff: Arc::new(NoBackoff),
        }
    }

    /// Sets the conflict retry budget.
    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    /// Sets the connection retry budget.
    pub fn with_connection_retries(mut self, retries: u32) -> Self {
        self.connection_retries = retries;
        self
    }

    /// Sets the backoff.
    pub fn with_backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    /// Returns the most attempts an operation can make.
    pub fn max_attempts(&self) -> u32 {
        1 + self.conflict_retries + self.connection_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(1, 3)
    }
}

/// Runs `attempt` until it succeeds or a budget is spent.
///
/// The closure receives the 1-based attempt number and should acquire the
/// live store afresh each time. A conflict that outlasts its budget is
/// returned as-is; connection failures that outlast theirs are wrapped in
/// [`CoreError::RetriesExhausted`].
///
/// # Errors
///
/// Returns the first non-retryable error, the last conflict, or
/// [`CoreError::RetriesExhausted`].
pub async fn run<T, F, Fut>(operation: &str, policy: &RetryPolicy, mut attempt: F) -> CoreResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = CoreResult<T>>,
{
    let mut number = 0;
    let mut conflicts = 0;
    let mut disconnects = 0;

    loop {
        number += 1;
        let err = match attempt(number).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if err.is_conflict() {
            if conflicts >= policy.conflict_retries {
                return Err(err);
            }
            conflicts += 1;
            debug!(operation, attempt = number, "revision conflict, refetching");
            continue;
        }

        if err.is_transient() {
            if disconnects >= policy.connection_retries {
                warn!(operation, attempts = number, error = %err, "retries exhausted");
                return Err(CoreError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: number,
                    source: Box::new(err),
                });
            }
            disconnects += 1;
            let delay = policy.backoff.delay(disconnects);
            warn!(operation, attempt = number, ?delay, error = %err, "store unavailable, retrying");
            tokio::time::sleep(delay).await;
            continue;
        }

        return Err(err);
    }
}
