//! In-memory orchestrator.
//!
//! Keeps a replica table per role and applies scale requests to it
//! directly. Backs the `static` orchestrator config (dry runs) and the
//! controller tests, which use its failure injection hooks to simulate a
//! rejected role, unhealthy new replicas, or an unreachable API.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::error::OrchestrationError;
use crate::traits::{ReplicaHealth, ReplicaId, ReplicaInspector, ReplicaScaler};

#[derive(Debug)]
struct Inner {
    roles: BTreeMap<String, Vec<ReplicaId>>,
    health: HashMap<ReplicaId, ReplicaHealth>,
    next_id: u64,
    new_replica_health: ReplicaHealth,
    rejected_roles: HashSet<String>,
    hung_roles: HashSet<String>,
    unavailable: bool,
    hang_inspection: bool,
    scale_calls: Vec<(String, u32)>,
}

/// Replica table with failure injection.
#[derive(Debug)]
pub struct InMemoryOrchestrator {
    inner: Mutex<Inner>,
}

impl Default for InMemoryOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOrchestrator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                roles: BTreeMap::new(),
                health: HashMap::new(),
                next_id: 0,
                new_replica_health: ReplicaHealth::Ready,
                rejected_roles: HashSet::new(),
                hung_roles: HashSet::new(),
                unavailable: false,
                hang_inspection: false,
                scale_calls: Vec::new(),
            }),
        }
    }

    /// Seed from a role → count table (the `static` orchestrator config).
    pub fn from_counts<'a>(counts: impl IntoIterator<Item = (&'a String, &'a u32)>) -> Self {
        let orchestrator = Self::new();
        for (role, count) in counts {
            orchestrator.set_replicas(role, *count);
        }
        orchestrator
    }

    pub fn with_role(self, role: &str, replicas: u32) -> Self {
        self.set_replicas(role, replicas);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Set a role's count out of band, like an operator scaling by hand.
    pub fn set_replicas(&self, role: &str, replicas: u32) {
        self.lock().resize(role, replicas, ReplicaHealth::Ready);
    }

    /// Running count for `role` as the table currently holds it.
    pub fn replicas(&self, role: &str) -> u32 {
        self.lock().roles.get(role).map_or(0, |r| r.len() as u32)
    }

    /// Health assigned to replicas created by later scale-ups.
    pub fn set_new_replica_health(&self, health: ReplicaHealth) {
        self.lock().new_replica_health = health;
    }

    pub fn set_replica_health(&self, replica: &str, health: ReplicaHealth) {
        self.lock().health.insert(replica.to_string(), health);
    }

    /// Reject every scale request for `role`.
    pub fn reject_scaling(&self, role: &str, rejected: bool) {
        let mut inner = self.lock();
        if rejected {
            inner.rejected_roles.insert(role.to_string());
        } else {
            inner.rejected_roles.remove(role);
        }
    }

    /// Make scale requests for `role` never complete.
    pub fn hang_scaling(&self, role: &str) {
        self.lock().hung_roles.insert(role.to_string());
    }

    /// Make every call fail as if the API were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Make replica listing and health calls never complete.
    pub fn hang_inspection(&self, hang: bool) {
        self.lock().hang_inspection = hang;
    }

    /// Every accepted or attempted scale request, in order.
    pub fn scale_calls(&self) -> Vec<(String, u32)> {
        self.lock().scale_calls.clone()
    }
}

impl Inner {
    fn resize(&mut self, role: &str, replicas: u32, health: ReplicaHealth) {
        let mut current = self.roles.remove(role).unwrap_or_default();
        while current.len() > replicas as usize {
            if let Some(id) = current.pop() {
                self.health.remove(&id);
            }
        }
        while current.len() < replicas as usize {
            self.next_id += 1;
            let id = format!("{role}-{}", self.next_id);
            self.health.insert(id.clone(), health);
            current.push(id);
        }
        self.roles.insert(role.to_string(), current);
    }

    fn check_available(&self) -> Result<(), OrchestrationError> {
        if self.unavailable {
            return Err(OrchestrationError::Connection(
                "in-memory orchestrator marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ReplicaInspector for InMemoryOrchestrator {
    async fn running_replicas(&self, role: &str) -> Result<Vec<ReplicaId>, OrchestrationError> {
        let hang = {
            let inner = self.lock();
            inner.check_available()?;
            inner.hang_inspection
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(self.lock().roles.get(role).cloned().unwrap_or_default())
    }

    async fn replica_health(&self, replica: &str) -> Result<ReplicaHealth, OrchestrationError> {
        let hang = {
            let inner = self.lock();
            inner.check_available()?;
            inner.hang_inspection
        };
        if hang {
            std::future::pending::<()>().await;
        }
        self.lock()
            .health
            .get(replica)
            .copied()
            .ok_or_else(|| OrchestrationError::UnknownReplica(replica.to_string()))
    }
}

#[async_trait]
impl ReplicaScaler for InMemoryOrchestrator {
    async fn scale_role(&self, role: &str, replicas: u32) -> Result<(), OrchestrationError> {
        let hang = {
            let mut inner = self.lock();
            inner.scale_calls.push((role.to_string(), replicas));
            inner.check_available()?;
            if inner.rejected_roles.contains(role) {
                return Err(OrchestrationError::Rejected {
                    role: role.to_string(),
                    reason: "rejected by test hook".to_string(),
                });
            }
            inner.hung_roles.contains(role)
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut inner = self.lock();
        let health = inner.new_replica_health;
        inner.resize(role, replicas, health);
        debug!(%role, replicas, "in-memory role scaled");
        Ok(())
    }
}
