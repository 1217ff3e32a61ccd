//! Domain types shared by the sampler, decision engine and control loop.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Pending job count observed on a queue.
pub type QueueDepth = u64;

/// A named set of roles that always scale together.
///
/// Each role is an independently addressable replica set in the
/// orchestration layer (a compose service). The group, never an individual
/// role, is the unit of scaling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceGroup {
    pub name: String,
    pub roles: Vec<String>,
    /// Queue whose depth drives this group.
    pub queue_key: String,
}

impl ServiceGroup {
    pub fn new(name: impl Into<String>, roles: &[&str], queue_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            queue_key: queue_key.into(),
        }
    }
}

impl fmt::Display for ServiceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.roles.join(", "))
    }
}

// ── Decisions ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleAction {
    None,
    ScaleUp,
    ScaleDown,
}

impl fmt::Display for ScaleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScaleAction::None => "none",
            ScaleAction::ScaleUp => "scale_up",
            ScaleAction::ScaleDown => "scale_down",
        })
    }
}

/// Outcome of one decision. For `None` the target equals the current count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingDecision {
    pub action: ScaleAction,
    pub target_replicas: u32,
}

impl ScalingDecision {
    pub fn none(current_replicas: u32) -> Self {
        Self {
            action: ScaleAction::None,
            target_replicas: current_replicas,
        }
    }

    pub fn scale_up(target_replicas: u32) -> Self {
        Self {
            action: ScaleAction::ScaleUp,
            target_replicas,
        }
    }

    pub fn scale_down(target_replicas: u32) -> Self {
        Self {
            action: ScaleAction::ScaleDown,
            target_replicas,
        }
    }

    /// Whether the decision requires actuation.
    pub fn is_action(&self) -> bool {
        self.action != ScaleAction::None
    }
}

// ── Controller state ──────────────────────────────────────────────

/// In-memory state for one service group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupState {
    /// Replica count confirmed by the group's last scaling action.
    pub current_replicas: Option<u32>,
    /// When the last successful scaling action completed.
    pub last_action_at: Option<Instant>,
}

/// Per-group confirmed replica counts and cooldown timestamps.
///
/// Written only when a scaling action is confirmed. Lives for the process
/// lifetime; a restart begins with no cooldown and no confirmed counts.
#[derive(Debug, Default)]
pub struct ControllerState {
    groups: HashMap<String, GroupState>,
}

impl ControllerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(&self, name: &str) -> GroupState {
        self.groups.get(name).copied().unwrap_or_default()
    }

    /// Record a confirmed scaling action; starts the group's cooldown.
    pub fn record_action(&mut self, name: &str, replicas: u32, at: Instant) {
        let entry = self.groups.entry(name.to_string()).or_default();
        entry.current_replicas = Some(replicas);
        entry.last_action_at = Some(at);
    }

    /// Elapsed time since the group's last action, `None` if it never acted.
    pub fn time_since_last_action(&self, name: &str, now: Instant) -> Option<Duration> {
        self.groups
            .get(name)
            .and_then(|g| g.last_action_at)
            .map(|at| now.saturating_duration_since(at))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
