//! Domain types shared across the pipeline.

pub mod event;
pub mod job;
pub mod queue;
pub mod signal;
pub mod tenant;

pub use event::{AdContext, CallRecord, ClickIdKind, ClickIds, SessionInfo, TrackedEvent};
pub use job::{CallEventJob, JobEnvelope, JobPayload, SealJob, StageJob, SyncEventJob};
pub use queue::{ErrorCategory, NewQueueRow, QueueRow, QueueStatus};
pub use signal::{Gear, MarketingSignal, Observation, SignalStatus};
pub use tenant::{CanonicalTenantId, TenantRef};

use chrono::{DateTime, Utc};

/// Idempotency proof for one (tenant, key) combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub tenant: CanonicalTenantId,
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Status of a row in the processed-signal ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessedStatus {
    Processing,
    Processed,
    Failed,
}

impl ProcessedStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessedStatus::Processing => "processing",
            ProcessedStatus::Processed => "processed",
            ProcessedStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(ProcessedStatus::Processing),
            "processed" => Some(ProcessedStatus::Processed),
            "failed" => Some(ProcessedStatus::Failed),
            _ => None,
        }
    }
}

/// Outcome of a conditional insert against a unique key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

impl InsertOutcome {
    pub fn is_inserted(self) -> bool {
        matches!(self, InsertOutcome::Inserted)
    }
}

/// Billing month bucket, e.g. `2026-10`.
pub fn usage_month(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}
