//! Processed-signal ledger: at-most-once domain effect per dispatched job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::Result;
use crate::model::{CanonicalTenantId, InsertOutcome, ProcessedStatus};

#[async_trait]
pub trait ProcessedSignalLedger: Send + Sync {
    /// Insert `dedup_id` with status `processing`. `Duplicate` means another
    /// delivery already owns (or finished) this unit of work.
    async fn try_claim(
        &self,
        dedup_id: &str,
        tenant: CanonicalTenantId,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome>;

    async fn mark(&self, dedup_id: &str, status: ProcessedStatus, now: DateTime<Utc>)
        -> Result<()>;

    /// Drop a `processing` claim so a redelivery can process the job again.
    /// Rows in any other status are left untouched.
    async fn release(&self, dedup_id: &str) -> Result<bool>;

    async fn status(&self, dedup_id: &str) -> Result<Option<ProcessedStatus>>;
}
