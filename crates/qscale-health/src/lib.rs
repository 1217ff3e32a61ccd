//! qscale-health — readiness confirmation for newly started replicas.
//!
//! After a scale-up the controller must not report success until every new
//! replica is ready. Readiness is polled through the orchestrator's
//! [`ReplicaInspector`](qscale_orchestrator::ReplicaInspector) with
//! exponential backoff, a consecutive-failure threshold, and an overall
//! deadline.
//!
//! # Architecture
//!
//! ```text
//! wait_all_ready(replicas)
//!   └── wait_until_ready(replica)   (concurrently, one per replica)
//!       ├── ReadinessTracker (attempts, consecutive failures, backoff)
//!       └── inspector.replica_health() → ProbeResult
//! ```
//!
//! There is no rollback here. A replica that never becomes ready is
//! reported and left running for the operator to diagnose.

pub mod tracker;
pub mod wait;

pub use tracker::{ProbeResult, Readiness, ReadinessPolicy, ReadinessTracker};
pub use wait::{ReadinessError, wait_all_ready, wait_until_ready};
