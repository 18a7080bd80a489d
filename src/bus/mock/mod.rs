//! Mock job queue for testing.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{BusError, JobQueue, PublishOutcome, Result};
use crate::model::JobEnvelope;

/// Records published jobs without delivering them.
#[derive(Default)]
pub struct MockJobQueue {
    published: RwLock<Vec<JobEnvelope>>,
    fail_on_publish: RwLock<bool>,
}

impl MockJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    pub async fn take_published(&self) -> Vec<JobEnvelope> {
        std::mem::take(&mut *self.published.write().await)
    }
}

#[async_trait]
impl JobQueue for MockJobQueue {
    async fn publish(&self, job: JobEnvelope) -> Result<PublishOutcome> {
        if *self.fail_on_publish.read().await {
            return Err(BusError::Publish("Mock publish failure".to_string()));
        }
        self.published.write().await.push(job);
        Ok(PublishOutcome::Enqueued)
    }
}
