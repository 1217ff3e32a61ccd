//! qscale-orchestrator — the container-orchestration seam.
//!
//! Two traits split the orchestration layer by side effect:
//!
//! - [`ReplicaInspector`] is read-only: running replicas per role and the
//!   readiness of a single replica.
//! - [`ReplicaScaler`] mutates live infrastructure: scale a role to N.
//!
//! # Backends
//!
//! ```text
//! DockerComposeOrchestrator
//!   ├── Docker Engine API over the unix socket (inspection)
//!   └── `docker compose up --scale` subprocess (actuation)
//! InMemoryOrchestrator
//!   └── replica table with failure injection (dry runs, tests)
//! ```

pub mod docker;
pub mod error;
pub mod group;
pub mod memory;
pub mod traits;

pub use docker::DockerComposeOrchestrator;
pub use error::OrchestrationError;
pub use group::{GroupReplicas, inspect_group};
pub use memory::InMemoryOrchestrator;
pub use traits::{Orchestrator, ReplicaHealth, ReplicaId, ReplicaInspector, ReplicaScaler};
