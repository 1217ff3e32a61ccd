//! qscale-core — shared types for the queue-driven replica autoscaler.
//!
//! Holds the immutable controller configuration (TOML file layered under
//! startup environment overrides), the service group topology, and the small
//! value types passed between the sampler, the decision engine and the
//! control loop.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    ControllerConfig, GroupConfig, OrchestratorConfig, QueueConfig, ScalingConfig, TimeoutConfig,
    env_overrides,
};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
