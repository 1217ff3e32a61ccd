//! Readiness probe bookkeeping.
//!
//! Tracks consecutive probe results for one replica and hands out the
//! waits between them with exponential backoff: the first wait is the
//! initial backoff, each later one doubles up to the cap.

use std::time::Duration;

use tracing::{debug, warn};

use qscale_core::TimeoutConfig;
use qscale_orchestrator::ReplicaHealth;

/// Result of a single readiness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The replica reports ready.
    Ready,
    /// The replica is still starting up.
    Starting,
    /// The replica reports unhealthy.
    Unhealthy,
    /// The probe itself failed (API error or timeout).
    Failed,
}

impl From<ReplicaHealth> for ProbeResult {
    fn from(health: ReplicaHealth) -> Self {
        match health {
            ReplicaHealth::Ready => ProbeResult::Ready,
            ReplicaHealth::Starting => ProbeResult::Starting,
            ReplicaHealth::Unhealthy => ProbeResult::Unhealthy,
        }
    }
}

/// Verdict after recording a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Keep probing.
    Pending,
    /// Failure threshold reached; stop probing.
    Unhealthy,
}

/// Timing and threshold knobs for readiness confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Overall deadline for one replica to become ready.
    pub timeout: Duration,
    /// Deadline for a single probe call.
    pub probe_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Consecutive unhealthy or failed probes before giving up early.
    pub unhealthy_threshold: u32,
}

impl ReadinessPolicy {
    pub fn from_timeouts(timeouts: &TimeoutConfig) -> Self {
        Self {
            timeout: timeouts.readiness_timeout(),
            probe_timeout: timeouts.request_timeout(),
            initial_backoff: timeouts.readiness_initial_backoff(),
            max_backoff: timeouts.readiness_max_backoff(),
            unhealthy_threshold: 3,
        }
    }
}

/// Tracks probe results for a single replica.
#[derive(Debug)]
pub struct ReadinessTracker {
    attempts: u32,
    consecutive_failures: u32,
    unhealthy_threshold: u32,
    current_backoff: Duration,
    max_backoff: Duration,
}

impl ReadinessTracker {
    pub fn new(policy: &ReadinessPolicy) -> Self {
        Self {
            attempts: 0,
            consecutive_failures: 0,
            unhealthy_threshold: policy.unhealthy_threshold.max(1),
            current_backoff: policy.initial_backoff,
            max_backoff: policy.max_backoff,
        }
    }

    /// Record a probe result and return the verdict.
    pub fn record(&mut self, result: ProbeResult) -> Readiness {
        self.attempts += 1;

        match result {
            ProbeResult::Ready => {
                debug!(attempts = self.attempts, "replica ready");
                Readiness::Ready
            }
            ProbeResult::Starting => {
                // Starting is not failing.
                self.consecutive_failures = 0;
                Readiness::Pending
            }
            ProbeResult::Unhealthy | ProbeResult::Failed => {
                self.consecutive_failures += 1;

                if self.consecutive_failures >= self.unhealthy_threshold {
                    warn!(
                        failures = self.consecutive_failures,
                        threshold = self.unhealthy_threshold,
                        "replica failed readiness"
                    );
                    Readiness::Unhealthy
                } else {
                    Readiness::Pending
                }
            }
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Wait before the next check. Doubles the one after it.
    pub fn next_interval(&mut self) -> Duration {
        let interval = self.current_backoff;
        self.current_backoff = (interval * 2).min(self.max_backoff);
        interval
    }
}
