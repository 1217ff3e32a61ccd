//! The sampler seam and an in-memory implementation.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use qscale_core::QueueDepth;

use crate::error::QueueError;

/// Reads the pending job count for a queue key. Side-effect free.
#[async_trait]
pub trait QueueSampler: Send + Sync {
    async fn sample(&self, key: &str) -> Result<QueueDepth, QueueError>;
}

#[derive(Debug, Clone)]
enum Preset {
    Depth(QueueDepth),
    Unavailable(String),
}

/// Serves depths set by the caller. Unknown keys read as empty queues.
#[derive(Debug, Default)]
pub struct StaticQueueSampler {
    presets: Mutex<HashMap<String, Preset>>,
}

impl StaticQueueSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_depth(self, key: &str, depth: QueueDepth) -> Self {
        self.set_depth(key, depth);
        self
    }

    pub fn set_depth(&self, key: &str, depth: QueueDepth) {
        self.presets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), Preset::Depth(depth));
    }

    /// Make subsequent samples of `key` fail.
    pub fn set_unavailable(&self, key: &str, reason: &str) {
        self.presets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), Preset::Unavailable(reason.to_string()));
    }
}

#[async_trait]
impl QueueSampler for StaticQueueSampler {
    async fn sample(&self, key: &str) -> Result<QueueDepth, QueueError> {
        let presets = self.presets.lock().unwrap_or_else(|e| e.into_inner());
        match presets.get(key) {
            Some(Preset::Depth(depth)) => Ok(*depth),
            Some(Preset::Unavailable(reason)) => Err(QueueError::Connection(reason.clone())),
            None => Ok(0),
        }
    }
}
