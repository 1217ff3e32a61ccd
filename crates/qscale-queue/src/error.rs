//! Queue sampling errors.

use std::time::Duration;

use thiserror::Error;

/// Why a queue depth could not be sampled.
///
/// Every variant means the queue is unavailable for this tick.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue backend unreachable: {0}")]
    Connection(String),

    #[error("queue command failed: {0}")]
    Command(String),

    #[error("malformed queue response: {0}")]
    Malformed(String),

    #[error("queue backend did not answer within {0:?}")]
    Timeout(Duration),
}
