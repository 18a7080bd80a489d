//! Storage and collaborator interfaces.
//!
//! Every correctness-relevant state transition is a single conditional
//! operation on one of these traits. Implementations live in `storage`.

pub mod collaborators;
pub mod conversion_queue;
pub mod counter_store;
pub mod dead_letter_store;
pub mod domain_store;
pub mod idempotency_store;
pub mod ledger;
pub mod outbox;
pub mod signal_store;

pub use collaborators::{
    CollaboratorError, Entitlements, SignatureVerifier, TenantPlan, TenantResolver, VerifierError,
};
pub use conversion_queue::{ConversionQueue, LEASE_EXPIRED};
pub use counter_store::{CounterSnapshot, CounterStore, ReplayStore};
pub use dead_letter_store::DeadLetterStore;
pub use domain_store::{DomainStore, RecordOutcome, SessionLookup, UsageStore};
pub use idempotency_store::IdempotencyStore;
pub use ledger::ProcessedSignalLedger;
pub use outbox::JobOutbox;
pub use signal_store::{MarketingSignalStore, ObservationStore};

use uuid::Uuid;

use crate::error::{Classify, ErrorClass};
use crate::model::QueueStatus;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Backing store unavailable: {0}")]
    Unavailable(String),

    #[error("Row not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid transition for {id}: row is {actual}")]
    InvalidTransition { id: Uuid, actual: QueueStatus },

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "sqlite")]
    #[error("Query build error: {0}")]
    Query(#[from] sea_query::error::Error),
}

impl Classify for StoreError {
    fn class(&self) -> ErrorClass {
        match self {
            StoreError::Unavailable(_) => ErrorClass::Transient,
            #[cfg(feature = "sqlite")]
            StoreError::Database(_) => ErrorClass::Transient,
            #[cfg(feature = "sqlite")]
            StoreError::Query(_) => ErrorClass::Permanent,
            StoreError::NotFound(_)
            | StoreError::InvalidTransition { .. }
            | StoreError::Corrupt(_)
            | StoreError::Serialization(_) => ErrorClass::Permanent,
        }
    }
}
