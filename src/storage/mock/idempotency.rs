//! Idempotency keys and the processed-signal ledger.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::check_toggle;
use crate::interfaces::{IdempotencyStore, ProcessedSignalLedger, Result, StoreError};
use crate::model::{CanonicalTenantId, IdempotencyRecord, InsertOutcome, ProcessedStatus};

type IdempotencyKey = (CanonicalTenantId, String);

#[derive(Default)]
pub struct MockIdempotencyStore {
    records: RwLock<HashMap<IdempotencyKey, IdempotencyRecord>>,
    unavailable: RwLock<bool>,
    fail_on_delete: RwLock<bool>,
}

impl MockIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }

    pub async fn set_fail_on_delete(&self, fail: bool) {
        *self.fail_on_delete.write().await = fail;
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl IdempotencyStore for MockIdempotencyStore {
    async fn try_insert(&self, record: &IdempotencyRecord) -> Result<InsertOutcome> {
        check_toggle(&self.unavailable, "idempotency store").await?;
        let mut records = self.records.write().await;
        let key = (record.tenant, record.key.clone());
        if records.contains_key(&key) {
            return Ok(InsertOutcome::Duplicate);
        }
        records.insert(key, record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn delete(&self, tenant: CanonicalTenantId, key: &str) -> Result<bool> {
        check_toggle(&self.unavailable, "idempotency store").await?;
        check_toggle(&self.fail_on_delete, "idempotency delete").await?;
        Ok(self
            .records
            .write()
            .await
            .remove(&(tenant, key.to_string()))
            .is_some())
    }

    async fn exists(&self, tenant: CanonicalTenantId, key: &str) -> Result<bool> {
        check_toggle(&self.unavailable, "idempotency store").await?;
        Ok(self
            .records
            .read()
            .await
            .contains_key(&(tenant, key.to_string())))
    }
}

#[derive(Default)]
pub struct MockLedger {
    rows: RwLock<HashMap<String, ProcessedStatus>>,
    unavailable: RwLock<bool>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }
}

#[async_trait]
impl ProcessedSignalLedger for MockLedger {
    async fn try_claim(
        &self,
        dedup_id: &str,
        _tenant: CanonicalTenantId,
        _now: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        check_toggle(&self.unavailable, "ledger").await?;
        let mut rows = self.rows.write().await;
        if rows.contains_key(dedup_id) {
            return Ok(InsertOutcome::Duplicate);
        }
        rows.insert(dedup_id.to_string(), ProcessedStatus::Processing);
        Ok(InsertOutcome::Inserted)
    }

    async fn mark(&self, dedup_id: &str, status: ProcessedStatus, _now: DateTime<Utc>) -> Result<()> {
        check_toggle(&self.unavailable, "ledger").await?;
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(dedup_id)
            .ok_or_else(|| StoreError::Corrupt(format!("no ledger row for {}", dedup_id)))?;
        *row = status;
        Ok(())
    }

    async fn release(&self, dedup_id: &str) -> Result<bool> {
        check_toggle(&self.unavailable, "ledger").await?;
        let mut rows = self.rows.write().await;
        match rows.get(dedup_id) {
            Some(ProcessedStatus::Processing) => {
                rows.remove(dedup_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn status(&self, dedup_id: &str) -> Result<Option<ProcessedStatus>> {
        check_toggle(&self.unavailable, "ledger").await?;
        Ok(self.rows.read().await.get(dedup_id).copied())
    }
}
