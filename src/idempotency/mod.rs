//! Idempotency key engine.
//!
//! Derives a key per billable event and guards it with a conditional insert.
//! A uniqueness violation means the event was already handled and is a
//! successful no-op for the caller.
//!
//! Two schemes exist:
//! - **v1**: unprefixed hex over a flat 5 s server-time bucket.
//! - **v2**: `v2:`-prefixed hex, bucketed per event type (heartbeat 10 s,
//!   page view 2 s, clicks exact).
//!
//! The scheme is chosen per tenant. Keys from different schemes never collide
//! and are never compared, so flipping a tenant between schemes can let at
//! most one duplicate through per event inside the old bucket width.

mod keys;

pub use keys::{
    v1_key, v2_bucket, v2_key, Bucketing, KeyInput, CLIENT_SKEW_LIMIT_MS, DEFAULT_BUCKET_MS,
    HEARTBEAT_BUCKET_MS, PAGE_VIEW_BUCKET_MS, V1_BUCKET_MS, V2_PREFIX,
};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::config::{IdempotencyConfig, TenantConfig};
use crate::interfaces::{IdempotencyStore, Result};
use crate::model::{CanonicalTenantId, IdempotencyRecord, InsertOutcome};

/// Key derivation scheme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyVersion {
    V1,
    #[default]
    V2,
}

impl KeyVersion {
    pub fn derive(self, input: &KeyInput<'_>) -> String {
        match self {
            KeyVersion::V1 => v1_key(input),
            KeyVersion::V2 => v2_key(input),
        }
    }
}

/// Which scheme each tenant uses.
#[derive(Debug, Clone, Default)]
pub struct KeyPolicy {
    default: KeyVersion,
    overrides: HashMap<CanonicalTenantId, KeyVersion>,
}

impl KeyPolicy {
    pub fn new(default: KeyVersion) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn from_config(config: &IdempotencyConfig, tenants: &[TenantConfig]) -> Self {
        let overrides = tenants
            .iter()
            .filter_map(|t| {
                t.idempotency_version
                    .map(|version| (CanonicalTenantId(t.canonical_id), version))
            })
            .collect();
        Self {
            default: config.version,
            overrides,
        }
    }

    pub fn with_override(mut self, tenant: CanonicalTenantId, version: KeyVersion) -> Self {
        self.overrides.insert(tenant, version);
        self
    }

    pub fn version_for(&self, tenant: CanonicalTenantId) -> KeyVersion {
        self.overrides.get(&tenant).copied().unwrap_or(self.default)
    }
}

/// Derives keys and writes them through an [`IdempotencyStore`].
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn IdempotencyStore>,
    policy: KeyPolicy,
    retention: chrono::Duration,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn IdempotencyStore>, policy: KeyPolicy, retention_days: i64) -> Self {
        Self {
            store,
            policy,
            retention: chrono::Duration::days(retention_days.max(90)),
        }
    }

    pub fn derive(&self, input: &KeyInput<'_>) -> String {
        self.policy.version_for(input.tenant).derive(input)
    }

    /// Conditional insert of `key`. `Duplicate` means "already handled".
    pub async fn claim(
        &self,
        tenant: CanonicalTenantId,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        let record = IdempotencyRecord {
            tenant,
            key: key.to_string(),
            created_at: now,
            expires_at: now + self.retention,
        };
        let outcome = self.store.try_insert(&record).await?;
        if !outcome.is_inserted() {
            debug!(tenant = %tenant, key = %key, "Idempotency key already present");
        }
        Ok(outcome)
    }

    /// Undo an optimistic claim.
    pub async fn release(&self, tenant: CanonicalTenantId, key: &str) -> Result<bool> {
        self.store.delete(tenant, key).await
    }
}
