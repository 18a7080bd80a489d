use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::check_toggle;
use crate::interfaces::{JobOutbox, Result};
use crate::model::JobEnvelope;

#[derive(Default)]
pub struct MockJobOutbox {
    jobs: RwLock<HashMap<Uuid, (JobEnvelope, DateTime<Utc>)>>,
    unavailable: RwLock<bool>,
}

impl MockJobOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }
}

#[async_trait]
impl JobOutbox for MockJobOutbox {
    async fn insert(&self, job: &JobEnvelope, now: DateTime<Utc>) -> Result<()> {
        check_toggle(&self.unavailable, "job outbox").await?;
        self.jobs
            .write()
            .await
            .entry(job.message_id)
            .or_insert_with(|| (job.clone(), now));
        Ok(())
    }

    async fn ack(&self, message_id: Uuid) -> Result<bool> {
        check_toggle(&self.unavailable, "job outbox").await?;
        Ok(self.jobs.write().await.remove(&message_id).is_some())
    }

    async fn list_unacked(&self, before: DateTime<Utc>, limit: usize) -> Result<Vec<JobEnvelope>> {
        check_toggle(&self.unavailable, "job outbox").await?;
        let jobs = self.jobs.read().await;
        let mut pending: Vec<_> = jobs.values().filter(|(_, at)| *at < before).collect();
        pending.sort_by_key(|(_, at)| *at);
        Ok(pending
            .into_iter()
            .take(limit)
            .map(|(job, _)| job.clone())
            .collect())
    }
}
