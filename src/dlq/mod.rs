//! Dead Letter Queue (DLQ) infrastructure.
//!
//! Jobs that fail permanently, exhaust their redelivery budget, or are
//! quarantined by the fraud gate end up here for manual inspection.
//!
//! ## Record Format
//!
//! `{site_id, queue_message_id, stage, error, payload}` plus the error class,
//! delivery attempt count and free-form metadata.
//!
//! ## Stages
//!
//! - `ledger`, `gates`, `domain`, `valuation`: worker pipeline failures
//! - `redelivery`: retry budget exhausted at the queue
//! - `quarantine`: fraud velocity hit (terminal success, not a failure)

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::ErrorClass;
use crate::interfaces::DeadLetterStore;
use crate::model::{CanonicalTenantId, JobEnvelope};

/// Stage name for quarantined payloads.
pub const STAGE_QUARANTINE: &str = "quarantine";
/// Stage name for jobs whose redelivery budget ran out.
pub const STAGE_REDELIVERY: &str = "redelivery";

/// Errors that can occur during DLQ operations.
#[derive(Debug, thiserror::Error)]
pub enum DlqError {
    #[error("Failed to serialize dead letter: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to publish to DLQ: {0}")]
    PublishFailed(String),
}

/// Dead letter entry for a failed or quarantined job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: Uuid,
    pub site_id: CanonicalTenantId,
    pub queue_message_id: Uuid,
    /// Pipeline stage that gave up on the job.
    pub stage: String,
    /// Human-readable error.
    pub error: String,
    pub error_class: String,
    /// Delivery attempts made before the job was dead-lettered.
    pub attempts: u32,
    /// Original job payload.
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl DeadLetter {
    /// Create a dead letter from a failed job.
    pub fn from_job(
        job: &JobEnvelope,
        stage: &str,
        error: &str,
        class: ErrorClass,
        now: DateTime<Utc>,
    ) -> Result<Self, DlqError> {
        Ok(Self {
            id: Uuid::new_v4(),
            site_id: job.payload.tenant(),
            queue_message_id: job.message_id,
            stage: stage.to_string(),
            error: error.to_string(),
            error_class: class.as_str().to_string(),
            attempts: job.attempt,
            payload: serde_json::to_value(&job.payload)?,
            occurred_at: now,
            metadata: HashMap::new(),
        })
    }

    /// Create a quarantine record for a job held back by the fraud gate.
    pub fn quarantine(job: &JobEnvelope, reason: &str, now: DateTime<Utc>) -> Result<Self, DlqError> {
        let mut dead_letter = Self::from_job(job, STAGE_QUARANTINE, reason, ErrorClass::Permanent, now)?;
        dead_letter.error_class = STAGE_QUARANTINE.to_string();
        Ok(dead_letter)
    }

    /// Add metadata to the dead letter.
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn is_quarantine(&self) -> bool {
        self.stage == STAGE_QUARANTINE
    }
}

/// Trait for publishing dead letters.
#[async_trait]
pub trait DeadLetterPublisher: Send + Sync {
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), DlqError>;
}

/// In-memory DLQ publisher using a channel.
///
/// Used for tests that need to observe dead letters as they are produced.
pub struct ChannelDeadLetterPublisher {
    sender: mpsc::UnboundedSender<DeadLetter>,
}

impl ChannelDeadLetterPublisher {
    /// Returns the publisher and a receiver for consuming dead letters.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DeadLetter>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl DeadLetterPublisher for ChannelDeadLetterPublisher {
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), DlqError> {
        info!(
            site_id = %dead_letter.site_id,
            stage = %dead_letter.stage,
            "Publishing to channel DLQ"
        );
        self.sender
            .send(dead_letter)
            .map_err(|e| DlqError::PublishFailed(e.to_string()))
    }
}

/// Publisher that persists dead letters through a [`DeadLetterStore`].
pub struct StoreDeadLetterPublisher {
    store: Arc<dyn DeadLetterStore>,
}

impl StoreDeadLetterPublisher {
    pub fn new(store: Arc<dyn DeadLetterStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DeadLetterPublisher for StoreDeadLetterPublisher {
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), DlqError> {
        if dead_letter.is_quarantine() {
            warn!(
                site_id = %dead_letter.site_id,
                message_id = %dead_letter.queue_message_id,
                reason = %dead_letter.error,
                "Quarantining payload"
            );
        } else {
            error!(
                site_id = %dead_letter.site_id,
                message_id = %dead_letter.queue_message_id,
                stage = %dead_letter.stage,
                error = %dead_letter.error,
                "Dead-lettering job"
            );
        }
        self.store
            .insert(&dead_letter)
            .await
            .map_err(|e| DlqError::PublishFailed(e.to_string()))
    }
}
