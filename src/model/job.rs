//! Worker job payloads.
//!
//! Queue messages carry a closed tagged union discriminated by `_ingest_type`.
//! The worker matches it exhaustively at the dispatch boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::{AdContext, ClickIds};
use super::signal::Gear;
use super::tenant::CanonicalTenantId;

/// Call intent that passed the ingress gate and matched a consenting session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEventJob {
    pub tenant: CanonicalTenantId,
    pub session_id: String,
    pub fingerprint: String,
    pub lead_score: Option<i32>,
    pub status: Option<String>,
    /// `phone` or `whatsapp`.
    pub intent_action: String,
    pub intent_target: String,
    pub ad_context: Option<AdContext>,
    #[serde(default)]
    pub click_ids: ClickIds,
    pub click_time: Option<DateTime<Utc>>,
    pub event_id: Option<Uuid>,
    pub user_agent: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Raw tenant-scoped page/heartbeat/click event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEventJob {
    pub tenant: CanonicalTenantId,
    pub fingerprint: String,
    pub event_name: String,
    pub url: Option<String>,
    pub session_id: Option<String>,
    pub client_ts_ms: Option<i64>,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub click_ids: ClickIds,
    pub received_at: DateTime<Utc>,
}

/// A call advanced to a mid-funnel gear (V3 or V4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageJob {
    pub tenant: CanonicalTenantId,
    pub call_id: Uuid,
    pub gear: Gear,
    pub click_time: Option<DateTime<Utc>>,
    pub signal_time: DateTime<Utc>,
    #[serde(default)]
    pub click_ids: ClickIds,
    pub currency: String,
}

/// A sealed sale (V5).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealJob {
    pub tenant: CanonicalTenantId,
    pub call_id: Option<Uuid>,
    pub sale_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub session_id: Option<String>,
    #[serde(default)]
    pub click_ids: ClickIds,
    pub sealed_at: DateTime<Utc>,
}

/// Queue message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_ingest_type", rename_all = "snake_case")]
pub enum JobPayload {
    CallEvent(CallEventJob),
    Sync(SyncEventJob),
    Stage(StageJob),
    Seal(SealJob),
}

impl JobPayload {
    pub fn tenant(&self) -> CanonicalTenantId {
        match self {
            JobPayload::CallEvent(job) => job.tenant,
            JobPayload::Sync(job) => job.tenant,
            JobPayload::Stage(job) => job.tenant,
            JobPayload::Seal(job) => job.tenant,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobPayload::CallEvent(_) => "call_event",
            JobPayload::Sync(_) => "sync",
            JobPayload::Stage(_) => "stage",
            JobPayload::Seal(_) => "seal",
        }
    }

    /// Edge-originated jobs pass the fraud, traffic and quota gates and are billable.
    pub fn is_edge_event(&self) -> bool {
        matches!(self, JobPayload::CallEvent(_) | JobPayload::Sync(_))
    }

    /// Fingerprint of the edge client, when the job carries one.
    pub fn fingerprint(&self) -> Option<&str> {
        match self {
            JobPayload::CallEvent(job) => Some(&job.fingerprint),
            JobPayload::Sync(job) => Some(&job.fingerprint),
            JobPayload::Stage(_) | JobPayload::Seal(_) => None,
        }
    }
}

/// A job as it travels through the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub message_id: Uuid,
    /// Canonical dedup id; doubles as the processed-signal ledger key.
    pub dedup_id: String,
    /// Delivery attempt, starting at 1.
    pub attempt: u32,
    pub payload: JobPayload,
}

impl JobEnvelope {
    pub fn new(dedup_id: impl Into<String>, payload: JobPayload) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            dedup_id: dedup_id.into(),
            attempt: 1,
            payload,
        }
    }
}
