//! Inspector and scaler traits.

use async_trait::async_trait;

use crate::error::OrchestrationError;

/// Orchestration-layer identifier of one running replica (a container id).
pub type ReplicaId = String;

/// Readiness of a single replica as reported by the orchestration layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaHealth {
    /// Running and passing its health check (or running with none declared).
    Ready,
    /// Created or health check still in its start period.
    Starting,
    /// Failing its health check, exited, or dead.
    Unhealthy,
}

/// Read-only view of the orchestration layer.
#[async_trait]
pub trait ReplicaInspector: Send + Sync {
    /// Replicas of `role` that are actually running right now.
    async fn running_replicas(&self, role: &str) -> Result<Vec<ReplicaId>, OrchestrationError>;

    async fn replica_health(&self, replica: &str) -> Result<ReplicaHealth, OrchestrationError>;

    /// Running replica count for `role`. Never a desired or cached value.
    async fn current_replicas(&self, role: &str) -> Result<u32, OrchestrationError> {
        let replicas = self.running_replicas(role).await?;
        Ok(replicas.len() as u32)
    }
}

/// The only seam allowed to start or stop replicas.
#[async_trait]
pub trait ReplicaScaler: Send + Sync {
    /// Request `role` to run exactly `replicas` replicas.
    async fn scale_role(&self, role: &str, replicas: u32) -> Result<(), OrchestrationError>;
}

/// A backend providing both inspection and actuation.
pub trait Orchestrator: ReplicaInspector + ReplicaScaler {}

impl<T: ReplicaInspector + ReplicaScaler> Orchestrator for T {}
