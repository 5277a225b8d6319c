//! Health state of the remote backend.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;

use crate::constants::{DEFAULT_BACKEND_TIMEOUT_MS, DEFAULT_PROBE_INTERVAL_SECS};

/// Health of the remote backend as seen by the selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendState {
    /// Remote backend answers; operations go to it.
    Healthy,
    /// Remote backend failed; operations go to the local engine.
    Degraded,
}

/// Configuration for remote health probes.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Interval between background probes.
    pub interval: Duration,
    /// Timeout applied to each probe and each remote call.
    pub timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_PROBE_INTERVAL_SECS),
            timeout: Duration::from_millis(DEFAULT_BACKEND_TIMEOUT_MS),
        }
    }
}

/// Tracks probe outcomes for the remote backend.
#[derive(Debug)]
pub struct HealthState {
    healthy: AtomicBool,
    /// Consecutive failures (probe or dispatch).
    failure_count: AtomicU64,
    last_check: RwLock<Option<Instant>>,
}

impl HealthState {
    /// Creates a state with the given initial health.
    pub fn new(healthy: bool) -> Self {
        Self {
            healthy: AtomicBool::new(healthy),
            failure_count: AtomicU64::new(0),
            last_check: RwLock::new(None),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn state(&self) -> BackendState {
        if self.is_healthy() {
            BackendState::Healthy
        } else {
            BackendState::Degraded
        }
    }

    /// Records a successful probe. Returns true if this flipped the state.
    pub fn mark_healthy(&self) -> bool {
        self.failure_count.store(0, Ordering::Release);
        *self.last_check.write() = Some(Instant::now());
        !self.healthy.swap(true, Ordering::AcqRel)
    }

    /// Records a failure. Returns true if this flipped the state.
    pub fn mark_degraded(&self) -> bool {
        self.failure_count.fetch_add(1, Ordering::AcqRel);
        *self.last_check.write() = Some(Instant::now());
        self.healthy.swap(false, Ordering::AcqRel)
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Time since the last probe outcome or dispatch failure. `None` before
    /// the first one.
    pub fn since_last_check(&self) -> Option<Duration> {
        self.last_check.read().map(|at| at.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_check_config_default() {
        let config = HealthCheckConfig::default();
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_transitions_report_flips_once() {
        let state = HealthState::new(true);
        assert_eq!(state.state(), BackendState::Healthy);
        assert!(state.since_last_check().is_none());

        assert!(state.mark_degraded());
        assert!(!state.mark_degraded());
        assert_eq!(state.failure_count(), 2);
        assert_eq!(state.state(), BackendState::Degraded);

        assert!(state.mark_healthy());
        assert!(!state.mark_healthy());
        assert_eq!(state.failure_count(), 0);
        assert!(state.since_last_check().is_some());
    }
}
