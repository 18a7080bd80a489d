//! SQLite implementations of storage interfaces.
//!
//! Every conditional transition is a single statement (`ON CONFLICT DO
//! NOTHING`, `UPDATE … WHERE status …`) or runs inside `BEGIN IMMEDIATE`, so
//! concurrent workers and exporters never need an in-process lock.

mod dead_letters;
mod domain;
mod idempotency;
mod outbox;
mod queue;
mod signals;

pub use dead_letters::SqliteDeadLetterStore;
pub use domain::{SqliteDomainStore, SqliteSessionStore, SqliteUsageStore};
pub use idempotency::{SqliteIdempotencyStore, SqliteLedger};
pub use outbox::SqliteJobOutbox;
pub use queue::SqliteConversionQueue;
pub use signals::{SqliteObservationStore, SqliteSignalStore};

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::schema::ALL_TABLES;
use crate::interfaces::{Result, StoreError};

/// Create every table and index if missing.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    for ddl in ALL_TABLES {
        sqlx::raw_sql(ddl).execute(pool).await?;
    }
    Ok(())
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {}", ms)))
}

pub(crate) fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Corrupt(format!("bad uuid {:?}: {}", raw, e)))
}

pub(crate) fn parse_opt_uuid(raw: Option<String>) -> Result<Option<Uuid>> {
    raw.as_deref().map(parse_uuid).transpose()
}
