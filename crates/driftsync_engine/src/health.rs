//! Breaker health scoring.

use std::time::Duration;

/// Inputs to [`health_score`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthInputs {
    /// Attempts that ran.
    pub total: u64,
    /// Attempts that succeeded.
    pub successful: u64,
    /// Failures in a row.
    pub consecutive_errors: u32,
    /// Failures in a row that open the circuit.
    pub max_consecutive_errors: u32,
    /// Conflicts recorded.
    pub conflicts: u64,
    /// Rolling average attempt duration.
    pub average_duration: Option<Duration>,
    /// Average duration above which performance degrades.
    pub slow_threshold: Duration,
}

impl HealthInputs {
    /// Share of attempts that succeeded, 1.0 before any attempt.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.successful as f64 / self.total as f64
        }
    }

    /// Conflicts per attempt, capped at 1.0 and 0.0 before any attempt.
    pub fn conflict_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.conflicts as f64 / self.total as f64).min(1.0)
        }
    }

    /// Consecutive failures relative to the tolerance, capped at 1.0.
    pub fn error_ratio(&self) -> f64 {
        let max = self.max_consecutive_errors.max(1);
        (f64::from(self.consecutive_errors) / f64::from(max)).min(1.0)
    }

    /// 1.0 while the average stays under the slow threshold.
    pub fn performance(&self) -> f64 {
        match self.average_duration {
            Some(avg) if avg > self.slow_threshold && !avg.is_zero() => {
                self.slow_threshold.as_secs_f64() / avg.as_secs_f64()
            }
            _ => 1.0,
        }
    }
}

/// Weighted health score from 0 to 100.
///
/// Success rate weighs 40, error streak 30, conflict rate 20 and
/// performance 10.
pub fn health_score(inputs: &HealthInputs) -> f64 {
    let score = 40.0 * inputs.success_rate()
        + 30.0 * (1.0 - inputs.error_ratio())
        + 20.0 * (1.0 - inputs.conflict_rate())
        + 10.0 * inputs.performance();
    score.clamp(0.0, 100.0)
}
