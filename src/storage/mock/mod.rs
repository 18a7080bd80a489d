//! Mock storage implementations for testing.
//!
//! Every store keeps its state behind a single tokio lock, so each
//! conditional operation is atomic within the process. The `memory` storage
//! type runs on these too.

mod dead_letters;
mod domain;
mod idempotency;
mod outbox;
mod queue;
mod signals;

pub use dead_letters::MockDeadLetterStore;
pub use domain::{MockDomainStore, MockSessionLookup, MockUsageStore};
pub use idempotency::{MockIdempotencyStore, MockLedger};
pub use outbox::MockJobOutbox;
pub use queue::MockConversionQueue;
pub use signals::{MockObservationStore, MockSignalStore};

use tokio::sync::RwLock;

use crate::interfaces::{Result, StoreError};

/// Fail with `Unavailable` while the toggle is set.
async fn check_toggle(flag: &RwLock<bool>, what: &str) -> Result<()> {
    if *flag.read().await {
        return Err(StoreError::Unavailable(format!("{} unavailable", what)));
    }
    Ok(())
}
