//! In-memory signal ledger and observation queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::check_toggle;
use crate::interfaces::{MarketingSignalStore, ObservationStore, Result};
use crate::model::{
    CanonicalTenantId, Gear, InsertOutcome, MarketingSignal, Observation, SignalStatus,
};

#[derive(Default)]
pub struct MockSignalStore {
    signals: RwLock<Vec<MarketingSignal>>,
    unavailable: RwLock<bool>,
}

impl MockSignalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }

    pub async fn all(&self) -> Vec<MarketingSignal> {
        self.signals.read().await.clone()
    }
}

/// Same tenant, V2, inside the window, and the same call or click chain.
fn is_same_pulse(existing: &MarketingSignal, candidate: &MarketingSignal, since: DateTime<Utc>) -> bool {
    if existing.tenant != candidate.tenant
        || existing.gear != Gear::V2
        || existing.signal_time < since
    {
        return false;
    }
    let same_call = matches!((existing.call_id, candidate.call_id), (Some(a), Some(b)) if a == b);
    let same_chain = matches!(
        (&existing.click_chain, &candidate.click_chain),
        (Some(a), Some(b)) if a == b
    );
    same_call || same_chain
}

#[async_trait]
impl MarketingSignalStore for MockSignalStore {
    async fn insert(&self, signal: &MarketingSignal) -> Result<()> {
        check_toggle(&self.unavailable, "signal store").await?;
        self.signals.write().await.push(signal.clone());
        Ok(())
    }

    async fn insert_pulse_if_absent(
        &self,
        signal: &MarketingSignal,
        since: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        check_toggle(&self.unavailable, "signal store").await?;
        let mut signals = self.signals.write().await;
        if signals.iter().any(|existing| is_same_pulse(existing, signal, since)) {
            return Ok(InsertOutcome::Duplicate);
        }
        signals.push(signal.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn list_pending(
        &self,
        tenant: CanonicalTenantId,
        limit: usize,
    ) -> Result<Vec<MarketingSignal>> {
        check_toggle(&self.unavailable, "signal store").await?;
        let mut pending: Vec<_> = self
            .signals
            .read()
            .await
            .iter()
            .filter(|s| s.tenant == tenant && s.status == SignalStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|s| (s.signal_time, s.id));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_processing(&self, ids: &[Uuid]) -> Result<u64> {
        check_toggle(&self.unavailable, "signal store").await?;
        let mut moved = 0;
        for signal in self.signals.write().await.iter_mut() {
            if ids.contains(&signal.id) && signal.status == SignalStatus::Pending {
                signal.status = SignalStatus::Processing;
                moved += 1;
            }
        }
        Ok(moved)
    }
}

#[derive(Default)]
pub struct MockObservationStore {
    observations: RwLock<Vec<Observation>>,
    unavailable: RwLock<bool>,
}

impl MockObservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }
}

#[async_trait]
impl ObservationStore for MockObservationStore {
    async fn record(&self, observation: &Observation) -> Result<()> {
        check_toggle(&self.unavailable, "observation store").await?;
        self.observations.write().await.push(observation.clone());
        Ok(())
    }

    async fn list_live(
        &self,
        tenant: CanonicalTenantId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Observation>> {
        check_toggle(&self.unavailable, "observation store").await?;
        let mut live: Vec<_> = self
            .observations
            .read()
            .await
            .iter()
            .filter(|o| o.tenant == tenant && o.expires_at > now)
            .cloned()
            .collect();
        live.sort_by(|a, b| b.observed_at.cmp(&a.observed_at));
        live.truncate(limit);
        Ok(live)
    }
}
