//! Storage implementations.

use std::sync::Arc;

use tracing::info;

use crate::config::{StorageConfig, StorageType};
use crate::interfaces::{
    ConversionQueue, CounterStore, DeadLetterStore, DomainStore, IdempotencyStore, JobOutbox,
    MarketingSignalStore, ObservationStore, ProcessedSignalLedger, ReplayStore, SessionLookup,
    UsageStore,
};

pub mod memory;
pub mod mock;

#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Every store the pipeline talks to.
#[derive(Clone)]
pub struct Stores {
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub ledger: Arc<dyn ProcessedSignalLedger>,
    pub counters: Arc<dyn CounterStore>,
    pub replay: Arc<dyn ReplayStore>,
    pub signals: Arc<dyn MarketingSignalStore>,
    pub observations: Arc<dyn ObservationStore>,
    pub queue: Arc<dyn ConversionQueue>,
    pub domain: Arc<dyn DomainStore>,
    pub sessions: Arc<dyn SessionLookup>,
    pub usage: Arc<dyn UsageStore>,
    pub dead_letters: Arc<dyn DeadLetterStore>,
    pub outbox: Arc<dyn JobOutbox>,
}

impl Stores {
    /// All stores in memory.
    pub fn in_memory() -> Self {
        let counters = Arc::new(memory::MemoryCounterStore::new());
        Self {
            idempotency: Arc::new(mock::MockIdempotencyStore::new()),
            ledger: Arc::new(mock::MockLedger::new()),
            counters: counters.clone(),
            replay: counters,
            signals: Arc::new(mock::MockSignalStore::new()),
            observations: Arc::new(mock::MockObservationStore::new()),
            queue: Arc::new(mock::MockConversionQueue::new()),
            domain: Arc::new(mock::MockDomainStore::new()),
            sessions: Arc::new(mock::MockSessionLookup::new()),
            usage: Arc::new(mock::MockUsageStore::new()),
            dead_letters: Arc::new(mock::MockDeadLetterStore::new()),
            outbox: Arc::new(mock::MockJobOutbox::new()),
        }
    }

    /// Durable stores on one SQLite pool. Counters and replay markers stay in process.
    #[cfg(feature = "sqlite")]
    pub fn sqlite(pool: sqlx::SqlitePool) -> Self {
        let counters = Arc::new(memory::MemoryCounterStore::new());
        Self {
            idempotency: Arc::new(sqlite::SqliteIdempotencyStore::new(pool.clone())),
            ledger: Arc::new(sqlite::SqliteLedger::new(pool.clone())),
            counters: counters.clone(),
            replay: counters,
            signals: Arc::new(sqlite::SqliteSignalStore::new(pool.clone())),
            observations: Arc::new(sqlite::SqliteObservationStore::new(pool.clone())),
            queue: Arc::new(sqlite::SqliteConversionQueue::new(pool.clone())),
            domain: Arc::new(sqlite::SqliteDomainStore::new(pool.clone())),
            sessions: Arc::new(sqlite::SqliteSessionStore::new(pool.clone())),
            usage: Arc::new(sqlite::SqliteUsageStore::new(pool.clone())),
            dead_letters: Arc::new(sqlite::SqliteDeadLetterStore::new(pool.clone())),
            outbox: Arc::new(sqlite::SqliteJobOutbox::new(pool)),
        }
    }
}

/// Initialize storage based on configuration.
pub async fn init_storage(config: &StorageConfig) -> Result<Stores, Box<dyn std::error::Error>> {
    info!("Storage: {} at {}", config.storage_type, config.path);

    match config.storage_type {
        StorageType::Memory => Ok(Stores::in_memory()),
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            let url = if config.path == ":memory:" {
                "sqlite::memory:".to_string()
            } else {
                if let Some(parent) = std::path::Path::new(&config.path).parent() {
                    std::fs::create_dir_all(parent)?;
                }
                format!("sqlite:{}?mode=rwc", config.path)
            };

            // An in-memory database lives and dies with its connection.
            let max_connections = if config.path == ":memory:" {
                1
            } else {
                config.max_connections
            };

            let pool = sqlx::sqlite::SqlitePoolOptions::new()
                .max_connections(max_connections)
                .connect(&url)
                .await?;
            sqlite::init_schema(&pool).await?;

            Ok(Stores::sqlite(pool))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageType::Sqlite => {
            tracing::error!("SQLite storage requested but 'sqlite' feature is not enabled");
            Err("SQLite feature not enabled".into())
        }
    }
}
