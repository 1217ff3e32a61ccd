//! Group-level replica inspection.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::future::try_join_all;

use qscale_core::ServiceGroup;

use crate::error::OrchestrationError;
use crate::traits::ReplicaInspector;

/// Live running counts for every role of a service group.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupReplicas {
    pub by_role: BTreeMap<String, u32>,
}

impl GroupReplicas {
    /// Number of complete role sets: the minimum count across roles.
    pub fn effective(&self) -> u32 {
        self.by_role.values().copied().min().unwrap_or(0)
    }

    /// Roles disagree on their replica count.
    pub fn is_divergent(&self) -> bool {
        let mut counts = self.by_role.values();
        match counts.next() {
            Some(first) => counts.any(|c| c != first),
            None => false,
        }
    }
}

/// Query every role of `group` concurrently, each call bounded by `timeout`.
///
/// Fails if any role cannot be inspected; a partial view of a group is never
/// returned.
pub async fn inspect_group<I>(
    inspector: &I,
    group: &ServiceGroup,
    timeout: Duration,
) -> Result<GroupReplicas, OrchestrationError>
where
    I: ReplicaInspector + ?Sized,
{
    let queries = group.roles.iter().map(|role| async move {
        let count = tokio::time::timeout(timeout, inspector.current_replicas(role))
            .await
            .map_err(|_| OrchestrationError::Timeout(timeout))??;
        Ok::<_, OrchestrationError>((role.clone(), count))
    });

    let by_role = try_join_all(queries).await?.into_iter().collect();
    Ok(GroupReplicas { by_role })
}
