//! Polling a replica until it is ready, unhealthy, or out of time.

use std::time::Duration;

use futures::future::try_join_all;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info};

use qscale_orchestrator::{OrchestrationError, ReplicaId, ReplicaInspector};

use crate::tracker::{ProbeResult, Readiness, ReadinessPolicy, ReadinessTracker};

/// Why a replica could not be confirmed ready.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReadinessError {
    #[error("replica {replica} not ready after {waited:?} ({attempts} probes)")]
    Timeout {
        replica: ReplicaId,
        waited: Duration,
        attempts: u32,
    },

    #[error("replica {replica} unhealthy after {failures} consecutive failed probes")]
    Unhealthy { replica: ReplicaId, failures: u32 },

    #[error("replica {replica} disappeared while starting")]
    Vanished { replica: ReplicaId },
}

impl ReadinessError {
    pub fn replica(&self) -> &str {
        match self {
            ReadinessError::Timeout { replica, .. }
            | ReadinessError::Unhealthy { replica, .. }
            | ReadinessError::Vanished { replica } => replica,
        }
    }
}

/// Poll `replica` until it reports ready, within `policy.timeout`.
///
/// Returns the number of probes it took.
pub async fn wait_until_ready<I>(
    inspector: &I,
    replica: &str,
    policy: &ReadinessPolicy,
) -> Result<u32, ReadinessError>
where
    I: ReplicaInspector + ?Sized,
{
    let mut tracker = ReadinessTracker::new(policy);

    let settled = timeout(
        policy.timeout,
        poll_until_settled(inspector, replica, policy, &mut tracker),
    )
    .await;

    match settled {
        Ok(result) => result,
        Err(_) => Err(ReadinessError::Timeout {
            replica: replica.to_string(),
            waited: policy.timeout,
            attempts: tracker.attempts(),
        }),
    }
}

async fn poll_until_settled<I>(
    inspector: &I,
    replica: &str,
    policy: &ReadinessPolicy,
    tracker: &mut ReadinessTracker,
) -> Result<u32, ReadinessError>
where
    I: ReplicaInspector + ?Sized,
{
    loop {
        let result = match timeout(policy.probe_timeout, inspector.replica_health(replica)).await {
            Ok(Ok(health)) => ProbeResult::from(health),
            Ok(Err(OrchestrationError::UnknownReplica(_))) => {
                return Err(ReadinessError::Vanished {
                    replica: replica.to_string(),
                });
            }
            Ok(Err(e)) => {
                debug!(%replica, error = %e, "readiness probe failed");
                ProbeResult::Failed
            }
            Err(_) => {
                debug!(%replica, "readiness probe timed out");
                ProbeResult::Failed
            }
        };

        match tracker.record(result) {
            Readiness::Ready => return Ok(tracker.attempts()),
            Readiness::Unhealthy => {
                return Err(ReadinessError::Unhealthy {
                    replica: replica.to_string(),
                    failures: tracker.consecutive_failures(),
                });
            }
            Readiness::Pending => tokio::time::sleep(tracker.next_interval()).await,
        }
    }
}

/// Wait for every replica concurrently. Fails with the first error.
pub async fn wait_all_ready<I>(
    inspector: &I,
    replicas: &[ReplicaId],
    policy: &ReadinessPolicy,
) -> Result<(), ReadinessError>
where
    I: ReplicaInspector + ?Sized,
{
    if replicas.is_empty() {
        return Ok(());
    }

    try_join_all(
        replicas
            .iter()
            .map(|replica| wait_until_ready(inspector, replica, policy)),
    )
    .await?;

    info!(count = replicas.len(), "new replicas ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use qscale_orchestrator::{InMemoryOrchestrator, ReplicaHealth};

    fn policy() -> ReadinessPolicy {
        ReadinessPolicy {
            timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(2),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(4),
            unhealthy_threshold: 3,
        }
    }

    async fn one_replica(health: ReplicaHealth) -> (Arc<InMemoryOrchestrator>, ReplicaId) {
        let orchestrator = Arc::new(InMemoryOrchestrator::new().with_role("worker", 1));
        let id = orchestrator.running_replicas("worker").await.unwrap()[0].clone();
        orchestrator.set_replica_health(&id, health);
        (orchestrator, id)
    }

    #[tokio::test(start_paused = true)]
    async fn ready_replica_confirms_immediately() {
        let (orchestrator, id) = one_replica(ReplicaHealth::Ready).await;
        let attempts = wait_until_ready(orchestrator.as_ref(), &id, &policy())
            .await
            .unwrap();
        assert_eq!(attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn starting_replica_becomes_ready() {
        let (orchestrator, id) = one_replica(ReplicaHealth::Starting).await;

        let flip = orchestrator.clone();
        let flip_id = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            flip.set_replica_health(&flip_id, ReplicaHealth::Ready);
        });

        let attempts = wait_until_ready(orchestrator.as_ref(), &id, &policy())
            .await
            .unwrap();
        assert!(attempts > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_check_waits_the_initial_backoff() {
        let (orchestrator, id) = one_replica(ReplicaHealth::Starting).await;

        let flip = orchestrator.clone();
        let flip_id = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            flip.set_replica_health(&flip_id, ReplicaHealth::Ready);
        });

        let started = tokio::time::Instant::now();
        let attempts = wait_until_ready(orchestrator.as_ref(), &id, &policy())
            .await
            .unwrap();
        assert_eq!(attempts, 2);
        assert_eq!(started.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn replica_stuck_starting_times_out() {
        let (orchestrator, id) = one_replica(ReplicaHealth::Starting).await;

        let err = wait_until_ready(orchestrator.as_ref(), &id, &policy())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReadinessError::Timeout { waited, attempts, .. }
                if waited == Duration::from_secs(30) && attempts > 1
        ));
        assert_eq!(err.replica(), id);
    }

    #[tokio::test(start_paused = true)]
    async fn unhealthy_replica_fails_at_threshold() {
        let (orchestrator, id) = one_replica(ReplicaHealth::Unhealthy).await;

        let err = wait_until_ready(orchestrator.as_ref(), &id, &policy())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ReadinessError::Unhealthy {
                replica: id,
                failures: 3
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn removed_replica_is_vanished() {
        let orchestrator = InMemoryOrchestrator::new();
        let err = wait_until_ready(&orchestrator, "worker-99", &policy())
            .await
            .unwrap_err();
        assert!(matches!(err, ReadinessError::Vanished { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_probes_count_as_failures() {
        let (orchestrator, id) = one_replica(ReplicaHealth::Ready).await;
        orchestrator.hang_inspection(true);

        let err = wait_until_ready(orchestrator.as_ref(), &id, &policy())
            .await
            .unwrap_err();
        assert!(matches!(err, ReadinessError::Unhealthy { failures: 3, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_all_reports_first_failure() {
        let orchestrator = InMemoryOrchestrator::new().with_role("worker", 2);
        let ids = orchestrator.running_replicas("worker").await.unwrap();
        orchestrator.set_replica_health(&ids[1], ReplicaHealth::Unhealthy);

        let err = wait_all_ready(&orchestrator, &ids, &policy()).await.unwrap_err();
        assert_eq!(err.replica(), ids[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_all_with_no_replicas_is_ok() {
        let orchestrator = InMemoryOrchestrator::new();
        wait_all_ready(&orchestrator, &[], &policy()).await.unwrap();
    }
}
