//! Session, event and usage persistence.

use async_trait::async_trait;
use uuid::Uuid;

use super::Result;
use crate::model::{CallRecord, CanonicalTenantId, InsertOutcome, SessionInfo, TrackedEvent};

/// Kept as a distinct name for readability at call sites.
pub type RecordOutcome = InsertOutcome;

/// Idempotent writes for events and calls.
///
/// Uniqueness is enforced on (id, partition), so a retried insert degrades to
/// `Duplicate` instead of writing a second row.
#[async_trait]
pub trait DomainStore: Send + Sync {
    async fn record_event(&self, event: &TrackedEvent) -> Result<RecordOutcome>;

    async fn record_call(&self, call: &CallRecord) -> Result<RecordOutcome>;

    async fn get_call(&self, id: Uuid) -> Result<Option<CallRecord>>;
}

/// Session/attribution matching owned by an external system.
#[async_trait]
pub trait SessionLookup: Send + Sync {
    async fn find_session(
        &self,
        tenant: CanonicalTenantId,
        fingerprint: &str,
    ) -> Result<Option<SessionInfo>>;
}

/// Monthly billable-event counters per tenant.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Returns the new value.
    async fn increment(&self, tenant: CanonicalTenantId, month: &str) -> Result<u64>;

    /// Saturates at zero. Returns the new value.
    async fn decrement(&self, tenant: CanonicalTenantId, month: &str) -> Result<u64>;

    async fn get(&self, tenant: CanonicalTenantId, month: &str) -> Result<u64>;
}
