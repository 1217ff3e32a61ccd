//! Redis list sampler.
//!
//! Job queues built on Redis lists keep pending jobs in a single list key,
//! so the pending count is one `LLEN`. Connections come from a small
//! deadpool pool: the first sample connects and authenticates, later
//! samples reuse the pooled connection after a `PING` health check.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::Value;
use tracing::debug;

use qscale_core::{QueueConfig, QueueDepth};

use crate::error::QueueError;
use crate::sampler::QueueSampler;

/// Groups are sampled concurrently; one connection each is plenty.
const POOL_SIZE: usize = 4;

/// Samples list lengths from a Redis server.
pub struct RedisQueueSampler {
    pool: Pool,
    timeout: Duration,
}

impl RedisQueueSampler {
    /// Build a sampler from the queue config. Does not connect yet.
    ///
    /// `timeout` bounds each sample, connection checkout included.
    pub fn new(config: &QueueConfig, timeout: Duration) -> Result<Self, QueueError> {
        let url = connection_url(&config.url, config.password.as_deref())?;
        let pool = Config::from_url(url)
            .builder()
            .map_err(|e| QueueError::Connection(e.to_string()))?
            .max_size(POOL_SIZE)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        Ok(Self { pool, timeout })
    }
}

#[async_trait]
impl QueueSampler for RedisQueueSampler {
    async fn sample(&self, key: &str) -> Result<QueueDepth, QueueError> {
        let result = tokio::time::timeout(self.timeout, async {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|e| QueueError::Connection(e.to_string()))?;

            let value: Value = redis::cmd("LLEN")
                .arg(key)
                .query_async(&mut *conn)
                .await
                .map_err(|e| QueueError::Command(e.to_string()))?;

            parse_depth(value)
        })
        .await;

        match result {
            Ok(Ok(depth)) => {
                debug!(%key, depth, "queue sampled");
                Ok(depth)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(QueueError::Timeout(self.timeout)),
        }
    }
}

fn parse_depth(value: Value) -> Result<QueueDepth, QueueError> {
    match value {
        Value::Int(n) if n >= 0 => Ok(n as QueueDepth),
        Value::Int(n) => Err(QueueError::Malformed(format!("negative length {n}"))),
        other => Err(QueueError::Malformed(format!("expected integer, got {other:?}"))),
    }
}

/// Embed the pre-shared password into the Redis URL.
fn connection_url(base: &str, password: Option<&str>) -> Result<String, QueueError> {
    let mut url = url::Url::parse(base)
        .map_err(|e| QueueError::Connection(format!("invalid redis url: {e}")))?;
    if let Some(password) = password {
        url.set_password(Some(password))
            .map_err(|_| QueueError::Connection("redis url cannot carry a password".to_string()))?;
    }
    Ok(url.to_string())
}
