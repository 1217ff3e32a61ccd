//! qscale-queue — read-only access to the job queue backend.
//!
//! A [`QueueSampler`] returns the number of pending jobs on a named queue
//! key. Samplers never retry; the control loop decides what a failed sample
//! means for the current tick.
//!
//! - [`RedisQueueSampler`] issues `LLEN` against a Redis list.
//! - [`StaticQueueSampler`] serves preset depths, for dry runs and tests.

pub mod error;
pub mod redis_sampler;
pub mod sampler;

pub use error::QueueError;
pub use redis_sampler::RedisQueueSampler;
pub use sampler::{QueueSampler, StaticQueueSampler};
