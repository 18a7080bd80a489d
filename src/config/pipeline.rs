//! Worker, valuation, idempotency and export settings.

use std::time::Duration;

use serde::Deserialize;

use crate::idempotency::KeyVersion;

/// Idempotency key engine settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    /// Key scheme used for tenants without an override.
    pub version: KeyVersion,
    /// Records are kept at least this long. Pruning is external.
    pub retention_days: i64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            version: KeyVersion::V2,
            retention_days: 90,
        }
    }
}

/// Async worker pool settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent consumers.
    pub concurrency: usize,
    /// Deliveries per job before it is dead-lettered.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// In-process queue capacity.
    pub queue_capacity: usize,
    /// A second publish of the same dedup id inside this window is dropped.
    pub dedup_window_secs: u64,
    /// Events per fingerprint inside the fraud window before quarantine.
    pub fraud_velocity_limit: u64,
    pub fraud_window_secs: u64,
    /// Referrer hosts whose traffic is not billable.
    pub blocked_referrers: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 30_000,
            queue_capacity: 1024,
            dedup_window_secs: 600,
            fraud_velocity_limit: 20,
            fraud_window_secs: 3600,
            blocked_referrers: Vec::new(),
        }
    }
}

impl WorkerConfig {
    pub fn fraud_window(&self) -> Duration {
        Duration::from_secs(self.fraud_window_secs)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }
}

/// Conversion valuation settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValuationConfig {
    /// AOV floor in major currency units.
    pub min_aov_major: f64,
    pub observation_ttl_days: i64,
    pub pulse_dedup_hours: i64,
    /// Provider that V5 rows are queued for.
    pub provider: String,
}

impl Default for ValuationConfig {
    fn default() -> Self {
        Self {
            min_aov_major: 1000.0,
            observation_ttl_days: 7,
            pulse_dedup_hours: 24,
            provider: "google_ads".to_string(),
        }
    }
}

/// Export cycle and export read endpoint settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub batch_size: usize,
    /// Bearer token for `GET /v1/export`. The endpoint answers 401 when unset.
    pub read_token: Option<String>,
    pub providers: Vec<String>,
    /// Rows left in PROCESSING longer than this are handed back to the queue.
    pub lease_secs: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            batch_size: 100,
            read_token: None,
            providers: vec!["google_ads".to_string()],
            lease_secs: 900,
        }
    }
}

impl ExportConfig {
    pub fn lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_secs.min(i64::MAX as u64 / 1_000) as i64)
    }
}
