//! Replica controller — actuates one scaling decision for a service group.
//!
//! ```text
//! apply_scaling(group, N)
//!   ├── list running replicas per role        (request_timeout each)
//!   ├── scale every role to N concurrently    (scale_timeout each)
//!   │     └── any role failed → PartialScalingFailure
//!   ├── list running replicas per role again
//!   │     └── count ≠ N → UnhealthyReplica
//!   └── wait for every new replica to be ready (readiness policy)
//!         └── not ready → UnhealthyReplica
//! ```
//!
//! Nothing is rolled back on failure. The control loop re-reads live counts
//! on its next tick and decides again.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, try_join_all};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use qscale_core::{ServiceGroup, TimeoutConfig};
use qscale_health::{ReadinessPolicy, wait_all_ready};
use qscale_orchestrator::{OrchestrationError, Orchestrator, ReplicaId};

use crate::error::{RoleFailure, ScalingError};

/// Applies scaling decisions through the orchestration layer.
pub struct ReplicaController {
    orchestrator: Arc<dyn Orchestrator>,
    request_timeout: Duration,
    scale_timeout: Duration,
    readiness: ReadinessPolicy,
}

impl ReplicaController {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, timeouts: &TimeoutConfig) -> Self {
        Self {
            orchestrator,
            request_timeout: timeouts.request_timeout(),
            scale_timeout: timeouts.scale_timeout(),
            readiness: ReadinessPolicy::from_timeouts(timeouts),
        }
    }

    pub fn with_readiness(mut self, readiness: ReadinessPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    /// Move every role of `group` to `target` replicas and confirm readiness.
    ///
    /// Returns the confirmed replica count.
    pub async fn apply_scaling(
        &self,
        group: &ServiceGroup,
        target: u32,
    ) -> Result<u32, ScalingError> {
        let before = self.list_replicas(group).await.map_err(|source| {
            ScalingError::OrchestrationUnavailable {
                group: group.name.clone(),
                source,
            }
        })?;

        self.scale_roles(group, target).await?;

        let after = self
            .list_replicas(group)
            .await
            .map_err(|e| ScalingError::UnhealthyReplica {
                group: group.name.clone(),
                role: group.roles.join(","),
                replica: None,
                reason: format!("could not list replicas after scaling: {e}"),
            })?;

        for (role, replicas) in &after {
            let running = replicas.len() as u32;
            if running != target {
                return Err(ScalingError::UnhealthyReplica {
                    group: group.name.clone(),
                    role: role.clone(),
                    replica: None,
                    reason: format!("{running} replicas running, expected {target}"),
                });
            }
        }

        let fresh = new_replicas(&before, &after);
        self.confirm_ready(group, &fresh).await?;

        info!(
            group = %group.name,
            target,
            new_replicas = fresh.len(),
            "scaling confirmed"
        );
        Ok(target)
    }

    async fn list_replicas(
        &self,
        group: &ServiceGroup,
    ) -> Result<BTreeMap<String, Vec<ReplicaId>>, OrchestrationError> {
        let listings = group.roles.iter().map(|role| async move {
            let replicas = timeout(self.request_timeout, self.orchestrator.running_replicas(role))
                .await
                .map_err(|_| OrchestrationError::Timeout(self.request_timeout))??;
            Ok::<_, OrchestrationError>((role.clone(), replicas))
        });
        Ok(try_join_all(listings).await?.into_iter().collect())
    }

    async fn scale_roles(&self, group: &ServiceGroup, target: u32) -> Result<(), ScalingError> {
        let requests = group.roles.iter().map(|role| async move {
            let result = timeout(self.scale_timeout, self.orchestrator.scale_role(role, target))
                .await
                .map_err(|_| OrchestrationError::Timeout(self.scale_timeout))
                .and_then(|r| r);
            (role, result)
        });

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for (role, result) in join_all(requests).await {
            match result {
                Ok(()) => {
                    debug!(group = %group.name, %role, target, "role scaled");
                    succeeded.push(role.clone());
                }
                Err(e) => {
                    warn!(group = %group.name, %role, target, error = %e, "role scale failed");
                    failed.push(RoleFailure {
                        role: role.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(ScalingError::PartialScalingFailure {
                group: group.name.clone(),
                target,
                succeeded,
                failed,
            })
        }
    }

    async fn confirm_ready(
        &self,
        group: &ServiceGroup,
        fresh: &[(String, ReplicaId)],
    ) -> Result<(), ScalingError> {
        let replicas: Vec<ReplicaId> = fresh.iter().map(|(_, replica)| replica.clone()).collect();
        wait_all_ready(self.orchestrator.as_ref(), &replicas, &self.readiness)
            .await
            .map_err(|e| {
                let role = fresh
                    .iter()
                    .find(|(_, replica)| replica == e.replica())
                    .map(|(role, _)| role.clone())
                    .unwrap_or_default();
                ScalingError::UnhealthyReplica {
                    group: group.name.clone(),
                    role,
                    replica: Some(e.replica().to_string()),
                    reason: e.to_string(),
                }
            })
    }
}

/// Replicas present after scaling that were not running before, per role.
fn new_replicas(
    before: &BTreeMap<String, Vec<ReplicaId>>,
    after: &BTreeMap<String, Vec<ReplicaId>>,
) -> Vec<(String, ReplicaId)> {
    let mut fresh = Vec::new();
    for (role, replicas) in after {
        let known: HashSet<&ReplicaId> = before.get(role).into_iter().flatten().collect();
        for replica in replicas {
            if !known.contains(replica) {
                fresh.push((role.clone(), replica.clone()));
            }
        }
    }
    fresh
}
