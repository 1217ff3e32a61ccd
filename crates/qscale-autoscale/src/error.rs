//! Scaling action errors.

use std::fmt;

use thiserror::Error;

use qscale_orchestrator::{OrchestrationError, ReplicaId};

/// A role whose scale request failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleFailure {
    pub role: String,
    pub reason: String,
}

impl fmt::Display for RoleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.reason)
    }
}

/// Why a scaling action did not complete.
///
/// In every case the controller leaves its state untouched: the cooldown is
/// not started and the next tick re-reads the live counts.
#[derive(Debug, Error)]
pub enum ScalingError {
    /// Some roles of the group accepted the new count and others did not.
    /// The group may now be divergent.
    #[error(
        "group {group}: scaling to {target} failed for [{}] (succeeded: [{}])",
        join(.failed), .succeeded.join(", ")
    )]
    PartialScalingFailure {
        group: String,
        target: u32,
        succeeded: Vec<String>,
        failed: Vec<RoleFailure>,
    },

    /// The orchestrator accepted the request but a new replica never
    /// confirmed readiness.
    #[error("group {group}: role {role} {}: {reason}", replica_label(.replica))]
    UnhealthyReplica {
        group: String,
        role: String,
        replica: Option<ReplicaId>,
        reason: String,
    },

    /// Replicas could not be listed before actuating; nothing was changed.
    #[error("group {group}: orchestration unavailable: {source}")]
    OrchestrationUnavailable {
        group: String,
        #[source]
        source: OrchestrationError,
    },
}

impl ScalingError {
    pub fn group(&self) -> &str {
        match self {
            ScalingError::PartialScalingFailure { group, .. }
            | ScalingError::UnhealthyReplica { group, .. }
            | ScalingError::OrchestrationUnavailable { group, .. } => group,
        }
    }
}

fn join(failed: &[RoleFailure]) -> String {
    failed
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn replica_label(replica: &Option<ReplicaId>) -> String {
    match replica {
        Some(id) => format!("replica {id}"),
        None => "replicas".to_string(),
    }
}
