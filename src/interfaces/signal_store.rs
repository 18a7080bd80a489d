//! Mid-funnel signal ledger and V1 observation queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::Result;
use crate::model::{CanonicalTenantId, InsertOutcome, MarketingSignal, Observation};

#[async_trait]
pub trait MarketingSignalStore: Send + Sync {
    async fn insert(&self, signal: &MarketingSignal) -> Result<()>;

    /// Insert a V2 pulse unless a V2 pulse already exists for the same tenant
    /// and the same call or click chain with `signal_time >= since`.
    /// Check and insert are a single atomic operation.
    async fn insert_pulse_if_absent(
        &self,
        signal: &MarketingSignal,
        since: DateTime<Utc>,
    ) -> Result<InsertOutcome>;

    async fn list_pending(&self, tenant: CanonicalTenantId, limit: usize)
        -> Result<Vec<MarketingSignal>>;

    /// PENDING → PROCESSING for the given ids. Returns how many rows moved.
    async fn mark_processing(&self, ids: &[Uuid]) -> Result<u64>;
}

#[async_trait]
pub trait ObservationStore: Send + Sync {
    async fn record(&self, observation: &Observation) -> Result<()>;

    /// Observations whose `expires_at` is after `now`, newest first.
    async fn list_live(
        &self,
        tenant: CanonicalTenantId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Observation>>;
}
