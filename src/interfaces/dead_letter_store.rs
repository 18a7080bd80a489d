//! Durable storage for dead letters and quarantined payloads.

use async_trait::async_trait;

use super::Result;
use crate::dlq::DeadLetter;
use crate::model::CanonicalTenantId;

#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    async fn insert(&self, dead_letter: &DeadLetter) -> Result<()>;

    /// Most recent first.
    async fn list(&self, site_id: Option<CanonicalTenantId>, limit: usize)
        -> Result<Vec<DeadLetter>>;
}
