//! Durable record of accepted jobs not yet handled.
//!
//! A job is written here before it enters the in-process channel and removed
//! once a consumer has either acked or dead-lettered it. Rows older than the
//! current process are orphans from a crash or an abrupt stop and get
//! republished at startup.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::Result;
use crate::model::JobEnvelope;

#[async_trait]
pub trait JobOutbox: Send + Sync {
    /// Record a job. Inserting the same `message_id` twice is a no-op.
    async fn insert(&self, job: &JobEnvelope, now: DateTime<Utc>) -> Result<()>;

    /// Remove a handled job. Returns false if it was not present.
    async fn ack(&self, message_id: Uuid) -> Result<bool>;

    /// Oldest first, restricted to rows written before `before`.
    async fn list_unacked(&self, before: DateTime<Utc>, limit: usize) -> Result<Vec<JobEnvelope>>;
}
