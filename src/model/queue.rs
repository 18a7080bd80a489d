//! Offline conversion queue rows.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::ClickIds;
use super::tenant::CanonicalTenantId;

/// Queue row state machine.
///
/// QUEUED/RETRY → PROCESSING → {COMPLETED, FAILED, RETRY}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Queued,
    Processing,
    Retry,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Queued => "QUEUED",
            QueueStatus::Processing => "PROCESSING",
            QueueStatus::Retry => "RETRY",
            QueueStatus::Completed => "COMPLETED",
            QueueStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(QueueStatus::Queued),
            "PROCESSING" => Some(QueueStatus::Processing),
            "RETRY" => Some(QueueStatus::Retry),
            "COMPLETED" => Some(QueueStatus::Completed),
            "FAILED" => Some(QueueStatus::Failed),
            _ => None,
        }
    }

    /// Rows in these states may be claimed by an exporter.
    pub fn is_claimable(self) -> bool {
        matches!(self, QueueStatus::Queued | QueueStatus::Retry)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-agnostic failure bucket recorded on a queue row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Auth,
    Validation,
    RateLimit,
    Transient,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Auth => "AUTH",
            ErrorCategory::Validation => "VALIDATION",
            ErrorCategory::RateLimit => "RATE_LIMIT",
            ErrorCategory::Transient => "TRANSIENT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AUTH" => Some(ErrorCategory::Auth),
            "VALIDATION" => Some(ErrorCategory::Validation),
            "RATE_LIMIT" => Some(ErrorCategory::RateLimit),
            "TRANSIENT" => Some(ErrorCategory::Transient),
            _ => None,
        }
    }

    /// Whether a job failing in this bucket should be requeued.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorCategory::RateLimit | ErrorCategory::Transient)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values needed to append a row to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQueueRow {
    pub site_id: CanonicalTenantId,
    pub provider: String,
    pub call_id: Option<Uuid>,
    pub sale_id: String,
    pub session_id: Option<String>,
    pub click_ids: ClickIds,
    pub value_cents: i64,
    pub currency: String,
    pub conversion_time: DateTime<Utc>,
}

/// One unit of work awaiting upload to an ad provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRow {
    pub id: Uuid,
    pub site_id: CanonicalTenantId,
    pub provider: String,
    pub call_id: Option<Uuid>,
    pub sale_id: String,
    pub session_id: Option<String>,
    pub click_ids: ClickIds,
    pub value_cents: i64,
    pub currency: String,
    pub conversion_time: DateTime<Utc>,
    pub status: QueueStatus,
    pub attempt_count: u32,
    pub provider_error_code: Option<String>,
    pub provider_error_category: Option<ErrorCategory>,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueRow {
    /// Build a fresh QUEUED row.
    pub fn from_new(id: Uuid, row: NewQueueRow, now: DateTime<Utc>) -> Self {
        Self {
            id,
            site_id: row.site_id,
            provider: row.provider,
            call_id: row.call_id,
            sale_id: row.sale_id,
            session_id: row.session_id,
            click_ids: row.click_ids,
            value_cents: row.value_cents,
            currency: row.currency,
            conversion_time: row.conversion_time,
            status: QueueStatus::Queued,
            attempt_count: 0,
            provider_error_code: None,
            provider_error_category: None,
            last_error: None,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Eligible for claim at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.next_retry_at.map_or(true, |at| at <= now)
    }
}
