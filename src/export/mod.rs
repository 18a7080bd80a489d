//! Offline conversion export.
//!
//! [`ExportCycle`] drains the conversion queue into provider adapters:
//!
//! 1. Claim due rows per provider (atomic QUEUED/RETRY → PROCESSING).
//! 2. Skip superseded rows: per matched session only the highest value is
//!    uploaded (ties go to the earliest conversion), the rest complete
//!    without upload.
//! 3. Load tenant credentials and upload through the registry.
//! 4. Apply each [`UploadResult`] to its row.
//!
//! [`ExportReader`] is the pull-based read model served to external readers.

mod read_model;

pub use read_model::{ExportItem, ExportReader};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{ExportConfig, TenantConfig};
use crate::error::{Classify, ErrorClass};
use crate::interfaces::{ConversionQueue, StoreError};
use crate::model::{CanonicalTenantId, ErrorCategory, QueueRow};
use crate::providers::{
    google_ads, ProviderCredentials, ProviderError, ProviderRegistry, UploadOutcome, UploadResult,
};
use crate::utils::clock::Clock;
use crate::utils::retry::export_retry_delay;

/// Error code for rows whose tenant has no credentials for the provider.
pub const MISSING_CREDENTIALS: &str = "MISSING_CREDENTIALS";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl Classify for ExportError {
    fn class(&self) -> ErrorClass {
        match self {
            ExportError::Store(e) => e.class(),
            ExportError::Provider(e) => e.class(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExportError>;

/// Provider credentials per tenant.
#[derive(Debug, Clone, Default)]
pub struct CredentialDirectory {
    credentials: HashMap<(CanonicalTenantId, String), ProviderCredentials>,
}

impl CredentialDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tenants(tenants: &[TenantConfig]) -> Self {
        let mut directory = Self::new();
        for tenant in tenants {
            if let Some(creds) = &tenant.google_ads {
                directory.insert(
                    CanonicalTenantId(tenant.canonical_id),
                    google_ads::PROVIDER_NAME,
                    ProviderCredentials::GoogleAds(creds.clone()),
                );
            }
        }
        directory
    }

    pub fn insert(&mut self, tenant: CanonicalTenantId, provider: &str, credentials: ProviderCredentials) {
        self.credentials
            .insert((tenant, provider.to_string()), credentials);
    }

    pub fn get(&self, tenant: CanonicalTenantId, provider: &str) -> Option<&ProviderCredentials> {
        self.credentials.get(&(tenant, provider.to_string()))
    }

    /// Every `(tenant, provider, credentials)` entry, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (CanonicalTenantId, &str, &ProviderCredentials)> {
        self.credentials
            .iter()
            .map(|((tenant, provider), creds)| (*tenant, provider.as_str(), creds))
    }
}

/// Counts from one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub claimed: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub retried: usize,
}

/// Split claimed rows into uploads and superseded rows.
///
/// Rows without a session always upload. Within a session the highest value
/// wins and ties go to the earliest conversion.
pub fn select_superseded(rows: Vec<QueueRow>) -> (Vec<QueueRow>, Vec<(QueueRow, Uuid)>) {
    let mut winners: HashMap<(CanonicalTenantId, String), usize> = HashMap::new();
    for (i, row) in rows.iter().enumerate() {
        let Some(session) = row.session_id.clone() else {
            continue;
        };
        winners
            .entry((row.site_id, session))
            .and_modify(|best| {
                let current = &rows[*best];
                let better = row.value_cents > current.value_cents
                    || (row.value_cents == current.value_cents
                        && (row.conversion_time, row.created_at)
                            < (current.conversion_time, current.created_at));
                if better {
                    *best = i;
                }
            })
            .or_insert(i);
    }

    let mut upload = Vec::new();
    let mut superseded = Vec::new();
    let winner_ids: HashMap<(CanonicalTenantId, String), Uuid> = winners
        .iter()
        .map(|(key, &i)| (key.clone(), rows[i].id))
        .collect();

    for row in rows {
        match row
            .session_id
            .clone()
            .and_then(|s| winner_ids.get(&(row.site_id, s)).copied())
        {
            Some(winner) if winner != row.id => superseded.push((row, winner)),
            _ => upload.push(row),
        }
    }
    (upload, superseded)
}

/// One export pass over every configured provider.
pub struct ExportCycle {
    queue: Arc<dyn ConversionQueue>,
    registry: ProviderRegistry,
    credentials: CredentialDirectory,
    config: ExportConfig,
    clock: Arc<dyn Clock>,
}

impl ExportCycle {
    pub fn new(
        queue: Arc<dyn ConversionQueue>,
        registry: ProviderRegistry,
        credentials: CredentialDirectory,
        config: ExportConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            registry,
            credentials,
            config,
            clock,
        }
    }

    /// Check every tenant's credentials against its provider.
    ///
    /// Failures are logged, not fatal: rows for a tenant with bad credentials
    /// fail as auth errors at upload time. Returns the number of failures.
    pub async fn verify_credentials(&self) -> usize {
        let mut failures = 0;
        for (tenant, provider, creds) in self.credentials.iter() {
            if !self.config.providers.iter().any(|p| p == provider) {
                continue;
            }
            let adapter = match self.registry.get(provider) {
                Ok(adapter) => adapter,
                Err(e) => {
                    warn!(site_id = %tenant, provider = %provider, error = %e, "No adapter for credentials");
                    failures += 1;
                    continue;
                }
            };
            match adapter.verify_credentials(creds).await {
                Ok(()) => info!(site_id = %tenant, provider = %provider, "Provider credentials verified"),
                Err(e) => {
                    warn!(site_id = %tenant, provider = %provider, error = %e, "Provider credentials rejected");
                    failures += 1;
                }
            }
        }
        failures
    }

    pub async fn run_once(&self) -> Result<ExportSummary> {
        let mut summary = ExportSummary::default();
        for provider in &self.config.providers {
            let provider_summary = self.run_provider(provider).await?;
            summary.claimed += provider_summary.claimed;
            summary.completed += provider_summary.completed;
            summary.skipped += provider_summary.skipped;
            summary.failed += provider_summary.failed;
            summary.retried += provider_summary.retried;
        }
        Ok(summary)
    }

    async fn run_provider(&self, provider: &str) -> Result<ExportSummary> {
        let adapter = self.registry.get(provider)?;
        let now = self.clock.now();

        let stale_before = now
            .checked_sub_signed(self.config.lease())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let released = self.queue.release_stale(provider, stale_before, now).await?;
        if released > 0 {
            warn!(provider = %provider, released, "Released conversions stuck in PROCESSING");
        }

        let claimed = self
            .queue
            .claim_batch(provider, now, self.config.batch_size)
            .await?;

        let mut summary = ExportSummary {
            claimed: claimed.len(),
            ..Default::default()
        };
        if claimed.is_empty() {
            debug!(provider = %provider, "No conversions due");
            return Ok(summary);
        }

        let (upload, superseded) = select_superseded(claimed);
        for (row, winner) in superseded {
            let reason = format!("superseded by {}", winner);
            match self.queue.skip(row.id, &reason, now).await {
                Ok(()) => summary.skipped += 1,
                Err(e) => error!(id = %row.id, error = %e, "Failed to skip superseded row"),
            }
        }

        let mut by_site: HashMap<CanonicalTenantId, Vec<QueueRow>> = HashMap::new();
        for row in upload {
            by_site.entry(row.site_id).or_default().push(row);
        }

        for (site_id, rows) in by_site {
            let results = match self.credentials.get(site_id, provider) {
                Some(creds) => match adapter.upload_conversions(&rows, creds).await {
                    Ok(results) => results,
                    Err(e) => {
                        warn!(site_id = %site_id, provider = %provider, error = %e, "Upload failed");
                        rows.iter()
                            .map(|row| UploadResult::from_error(row.id, "UPLOAD_FAILED", &e))
                            .collect()
                    }
                },
                None => {
                    warn!(site_id = %site_id, provider = %provider, "No provider credentials for tenant");
                    rows.iter()
                        .map(|row| {
                            UploadResult::classified(
                                row.id,
                                MISSING_CREDENTIALS,
                                ErrorCategory::Auth,
                                "tenant has no credentials for provider",
                                None,
                            )
                        })
                        .collect()
                }
            };

            let rows_by_id: HashMap<Uuid, &QueueRow> = rows.iter().map(|r| (r.id, r)).collect();
            for result in results {
                let Some(row) = rows_by_id.get(&result.job_id) else {
                    warn!(job_id = %result.job_id, "Provider returned result for unknown row");
                    continue;
                };
                self.apply(row, result.outcome, now, &mut summary).await;
            }
        }

        info!(
            provider = %provider,
            claimed = summary.claimed,
            completed = summary.completed,
            skipped = summary.skipped,
            failed = summary.failed,
            retried = summary.retried,
            "Export cycle finished"
        );
        Ok(summary)
    }

    async fn apply(
        &self,
        row: &QueueRow,
        outcome: UploadOutcome,
        now: DateTime<Utc>,
        summary: &mut ExportSummary,
    ) {
        let applied = match outcome {
            UploadOutcome::Completed => {
                let r = self.queue.complete(row.id, now).await;
                if r.is_ok() {
                    summary.completed += 1;
                }
                r
            }
            UploadOutcome::Failed {
                code,
                category,
                message,
            } => {
                warn!(id = %row.id, code = %code, category = %category, "Conversion failed");
                let r = self.queue.fail(row.id, &code, category, &message, now).await;
                if r.is_ok() {
                    summary.failed += 1;
                }
                r
            }
            UploadOutcome::Retry {
                code,
                category,
                message,
                retry_after,
            } => {
                let delay = retry_after.unwrap_or_else(|| export_retry_delay(row.attempt_count));
                let next_retry_at = now
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::hours(6));
                debug!(id = %row.id, code = %code, next_retry_at = %next_retry_at, "Conversion deferred");
                let r = self
                    .queue
                    .retry(row.id, &code, category, &message, next_retry_at, now)
                    .await;
                if r.is_ok() {
                    summary.retried += 1;
                }
                r
            }
        };
        if let Err(e) = applied {
            error!(id = %row.id, error = %e, "Failed to record upload result");
        }
    }
}

/// Run the export cycle every `interval` until `shutdown` flips to true.
pub async fn run_export_loop(cycle: Arc<ExportCycle>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = cycle.run_once().await {
                    error!(error = %e, "Export cycle failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Export loop stopping");
                    return;
                }
            }
        }
    }
}
