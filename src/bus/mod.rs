//! Job queue for async delivery.
//!
//! This module contains:
//! - `JobQueue` trait: at-least-once delivery of worker jobs
//! - `JobHandler` trait: for processing delivered jobs
//! - Implementations: in-process channel queue, mock

use async_trait::async_trait;

use crate::error::{Classify, ErrorClass};
use crate::model::JobEnvelope;

pub mod channel;
pub mod mock;

pub use channel::ChannelJobQueue;
pub use mock::MockJobQueue;

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Queue closed")]
    Closed,

    #[error("Handler failed at {stage}: {message}")]
    HandlerFailed {
        stage: String,
        message: String,
        class: ErrorClass,
    },
}

impl BusError {
    pub fn handler(stage: impl Into<String>, message: impl Into<String>, class: ErrorClass) -> Self {
        BusError::HandlerFailed {
            stage: stage.into(),
            message: message.into(),
            class,
        }
    }
}

impl Classify for BusError {
    fn class(&self) -> ErrorClass {
        match self {
            BusError::Publish(_) | BusError::Closed => ErrorClass::Transient,
            BusError::HandlerFailed { class, .. } => *class,
        }
    }
}

/// What happened to a published job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Enqueued,
    /// Same dedup id was published inside the dedup window.
    Deduplicated,
}

/// Handler for processing jobs from the queue.
///
/// `Ok` acknowledges the delivery. A retryable error asks for redelivery.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &JobEnvelope) -> Result<()>;
}

/// Interface for handing jobs to the worker pool.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn publish(&self, job: JobEnvelope) -> Result<PublishOutcome>;
}
