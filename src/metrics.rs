//! Transaction coherence metrics.
//!
//! The coordinator records every commit outcome; the health score is a
//! coarse traffic light for operators: healthy requires a high success
//! rate, few timeouts, and a low average retry count.

use std::time::Duration;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CoherenceMetrics {
    pub transactions_started: u64,
    pub transactions_committed: u64,
    pub transactions_rolled_back: u64,
    pub verification_timeouts: u64,
    pub total_verify_retries: u64,
    /// Every storage poll made while verifying, first reads included.
    pub verify_attempts: u64,
    pub total_verify_duration: Duration,
    pub total_persist_duration: Duration,
    pub total_apply_duration: Duration,
    /// Rendered error of each rollback, newest last.
    pub rollback_reasons: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

impl CoherenceMetrics {
    pub fn new() -> CoherenceMetrics {
        CoherenceMetrics::default()
    }

    pub fn success_rate(&self) -> f64 {
        let finished = self.transactions_committed + self.transactions_rolled_back;
        if finished == 0 {
            return 1.0;
        }
        self.transactions_committed as f64 / finished as f64
    }

    pub fn timeout_rate(&self) -> f64 {
        let finished = self.transactions_committed + self.transactions_rolled_back;
        if finished == 0 {
            return 0.0;
        }
        self.verification_timeouts as f64 / finished as f64
    }

    pub fn avg_retries(&self) -> f64 {
        let finished = self.transactions_committed + self.transactions_rolled_back;
        if finished == 0 {
            return 0.0;
        }
        self.total_verify_retries as f64 / finished as f64
    }

    /// Healthy when success is at least 95%, timeouts stay under 5%, and
    /// commits average fewer than two verification retries.
    pub fn health(&self) -> HealthStatus {
        if self.success_rate() >= 0.95 && self.timeout_rate() < 0.05 && self.avg_retries() < 2.0 {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        }
    }
}
