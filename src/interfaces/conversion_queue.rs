//! Offline conversion queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::Result;
use crate::model::{CanonicalTenantId, ErrorCategory, NewQueueRow, QueueRow, QueueStatus};

/// `last_error` recorded on rows whose PROCESSING lease ran out.
pub const LEASE_EXPIRED: &str = "lease expired";

/// Durable state machine for conversions awaiting upload.
///
/// `claim` is the only way into PROCESSING and succeeds for exactly one
/// caller. `complete`, `skip`, `fail` and `retry` only apply to PROCESSING
/// rows and return `StoreError::InvalidTransition` otherwise.
#[async_trait]
pub trait ConversionQueue: Send + Sync {
    async fn enqueue(&self, row: NewQueueRow, now: DateTime<Utc>) -> Result<QueueRow>;

    async fn get(&self, id: Uuid) -> Result<Option<QueueRow>>;

    /// Claimable rows for `provider` that are due at `now`, oldest first.
    /// Listing does not claim.
    async fn list_due(&self, provider: &str, now: DateTime<Utc>, limit: usize)
        -> Result<Vec<QueueRow>>;

    /// QUEUED/RETRY → PROCESSING, incrementing `attempt_count`.
    /// Returns `None` if the row was no longer claimable.
    async fn claim(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<QueueRow>>;

    async fn complete(&self, id: Uuid, now: DateTime<Utc>) -> Result<()>;

    /// PROCESSING → COMPLETED without upload, recording why.
    async fn skip(&self, id: Uuid, reason: &str, now: DateTime<Utc>) -> Result<()>;

    async fn fail(
        &self,
        id: Uuid,
        code: &str,
        category: ErrorCategory,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    async fn retry(
        &self,
        id: Uuid,
        code: &str,
        category: ErrorCategory,
        message: &str,
        next_retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    async fn list_for_site(
        &self,
        site_id: CanonicalTenantId,
        statuses: &[QueueStatus],
        limit: usize,
    ) -> Result<Vec<QueueRow>>;

    /// PROCESSING rows for `provider` last touched before `stale_before` →
    /// RETRY, due at `now`. Returns how many rows were released.
    async fn release_stale(
        &self,
        provider: &str,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    /// List due rows and claim each one; rows lost to a concurrent exporter are skipped.
    async fn claim_batch(
        &self,
        provider: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueRow>> {
        let mut claimed = Vec::new();
        for row in self.list_due(provider, now, limit).await? {
            if let Some(row) = self.claim(row.id, now).await? {
                claimed.push(row);
            }
        }
        Ok(claimed)
    }
}
