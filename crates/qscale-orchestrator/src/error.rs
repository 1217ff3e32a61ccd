//! Orchestration error types.

use std::time::Duration;

use thiserror::Error;

/// Errors from the orchestration layer.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("orchestration api unreachable: {0}")]
    Connection(String),

    #[error("orchestration api returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed orchestration response: {0}")]
    Malformed(String),

    #[error("scale request for role {role} rejected: {reason}")]
    Rejected { role: String, reason: String },

    #[error("unknown replica: {0}")]
    UnknownReplica(String),

    #[error("orchestration call timed out after {0:?}")]
    Timeout(Duration),
}
