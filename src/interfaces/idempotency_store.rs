//! Idempotency record storage.

use async_trait::async_trait;

use super::Result;
use crate::model::{CanonicalTenantId, IdempotencyRecord, InsertOutcome};

/// Unique (tenant, key) store.
///
/// Records are never mutated. Expired records are pruned by external
/// housekeeping, never by this interface.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Conditional insert. A uniqueness violation returns `Duplicate`, not an error.
    async fn try_insert(&self, record: &IdempotencyRecord) -> Result<InsertOutcome>;

    /// Remove a key written optimistically by a unit of work that later failed.
    async fn delete(&self, tenant: CanonicalTenantId, key: &str) -> Result<bool>;

    async fn exists(&self, tenant: CanonicalTenantId, key: &str) -> Result<bool>;
}
