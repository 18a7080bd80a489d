//! In-memory domain records, session lookup and usage counters.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::check_toggle;
use crate::interfaces::{DomainStore, RecordOutcome, Result, SessionLookup, UsageStore};
use crate::model::{CallRecord, CanonicalTenantId, SessionInfo, TrackedEvent};

#[derive(Default)]
pub struct MockDomainStore {
    events: RwLock<HashMap<(Uuid, String), TrackedEvent>>,
    calls: RwLock<HashMap<(Uuid, String), CallRecord>>,
    fail_on_record: RwLock<bool>,
}

impl MockDomainStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_record(&self, fail: bool) {
        *self.fail_on_record.write().await = fail;
    }

    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }
}

#[async_trait]
impl DomainStore for MockDomainStore {
    async fn record_event(&self, event: &TrackedEvent) -> Result<RecordOutcome> {
        check_toggle(&self.fail_on_record, "domain store").await?;
        let mut events = self.events.write().await;
        let key = (event.id, event.partition());
        if events.contains_key(&key) {
            return Ok(RecordOutcome::Duplicate);
        }
        events.insert(key, event.clone());
        Ok(RecordOutcome::Inserted)
    }

    async fn record_call(&self, call: &CallRecord) -> Result<RecordOutcome> {
        check_toggle(&self.fail_on_record, "domain store").await?;
        let mut calls = self.calls.write().await;
        let key = (call.id, call.created_at.format("%Y-%m").to_string());
        if calls.contains_key(&key) {
            return Ok(RecordOutcome::Duplicate);
        }
        calls.insert(key, call.clone());
        Ok(RecordOutcome::Inserted)
    }

    async fn get_call(&self, id: Uuid) -> Result<Option<CallRecord>> {
        Ok(self
            .calls
            .read()
            .await
            .iter()
            .find(|((call_id, _), _)| *call_id == id)
            .map(|(_, call)| call.clone()))
    }
}

/// Session table fed by tests. In production sessions are owned elsewhere.
#[derive(Default)]
pub struct MockSessionLookup {
    sessions: RwLock<HashMap<(CanonicalTenantId, String), SessionInfo>>,
    unavailable: RwLock<bool>,
}

impl MockSessionLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, tenant: CanonicalTenantId, fingerprint: &str, session: SessionInfo) {
        self.sessions
            .write()
            .await
            .insert((tenant, fingerprint.to_string()), session);
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }
}

#[async_trait]
impl SessionLookup for MockSessionLookup {
    async fn find_session(
        &self,
        tenant: CanonicalTenantId,
        fingerprint: &str,
    ) -> Result<Option<SessionInfo>> {
        check_toggle(&self.unavailable, "session lookup").await?;
        Ok(self
            .sessions
            .read()
            .await
            .get(&(tenant, fingerprint.to_string()))
            .cloned())
    }
}

#[derive(Default)]
pub struct MockUsageStore {
    counts: RwLock<HashMap<(CanonicalTenantId, String), u64>>,
    unavailable: RwLock<bool>,
    fail_on_decrement: RwLock<bool>,
}

impl MockUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }

    pub async fn set_fail_on_decrement(&self, fail: bool) {
        *self.fail_on_decrement.write().await = fail;
    }

    /// Seed a counter, e.g. to put a tenant at its quota.
    pub async fn set(&self, tenant: CanonicalTenantId, month: &str, count: u64) {
        self.counts
            .write()
            .await
            .insert((tenant, month.to_string()), count);
    }
}

#[async_trait]
impl UsageStore for MockUsageStore {
    async fn increment(&self, tenant: CanonicalTenantId, month: &str) -> Result<u64> {
        check_toggle(&self.unavailable, "usage store").await?;
        let mut counts = self.counts.write().await;
        let count = counts.entry((tenant, month.to_string())).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn decrement(&self, tenant: CanonicalTenantId, month: &str) -> Result<u64> {
        check_toggle(&self.unavailable, "usage store").await?;
        check_toggle(&self.fail_on_decrement, "usage decrement").await?;
        let mut counts = self.counts.write().await;
        let count = counts.entry((tenant, month.to_string())).or_insert(0);
        *count = count.saturating_sub(1);
        Ok(*count)
    }

    async fn get(&self, tenant: CanonicalTenantId, month: &str) -> Result<u64> {
        check_toggle(&self.unavailable, "usage store").await?;
        Ok(self
            .counts
            .read()
            .await
            .get(&(tenant, month.to_string()))
            .copied()
            .unwrap_or(0))
    }
}
