//! In-memory offline conversion queue.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::check_toggle;
use crate::interfaces::{ConversionQueue, Result, StoreError, LEASE_EXPIRED};
use crate::model::{CanonicalTenantId, ErrorCategory, NewQueueRow, QueueRow, QueueStatus};

#[derive(Default)]
pub struct MockConversionQueue {
    rows: RwLock<HashMap<Uuid, QueueRow>>,
    unavailable: RwLock<bool>,
    fail_transitions: RwLock<bool>,
}

impl MockConversionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }

    /// Fail `complete`, `skip`, `fail` and `retry` while set; claims still work.
    pub async fn set_fail_transitions(&self, fail: bool) {
        *self.fail_transitions.write().await = fail;
    }

    pub async fn all(&self) -> Vec<QueueRow> {
        let mut rows: Vec<_> = self.rows.read().await.values().cloned().collect();
        rows.sort_by_key(|row| (row.created_at, row.id));
        rows
    }

    /// Apply `f` to a PROCESSING row under the write lock.
    async fn transition(&self, id: Uuid, f: impl FnOnce(&mut QueueRow) + Send) -> Result<()> {
        check_toggle(&self.unavailable, "conversion queue").await?;
        check_toggle(&self.fail_transitions, "conversion queue").await?;
        let mut rows = self.rows.write().await;
        let row = rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if row.status != QueueStatus::Processing {
            return Err(StoreError::InvalidTransition {
                id,
                actual: row.status,
            });
        }
        f(row);
        Ok(())
    }
}

#[async_trait]
impl ConversionQueue for MockConversionQueue {
    async fn enqueue(&self, row: NewQueueRow, now: DateTime<Utc>) -> Result<QueueRow> {
        check_toggle(&self.unavailable, "conversion queue").await?;
        let row = QueueRow::from_new(Uuid::new_v4(), row, now);
        self.rows.write().await.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<QueueRow>> {
        check_toggle(&self.unavailable, "conversion queue").await?;
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn list_due(
        &self,
        provider: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueRow>> {
        check_toggle(&self.unavailable, "conversion queue").await?;
        let mut due: Vec<_> = self
            .rows
            .read()
            .await
            .values()
            .filter(|row| row.provider == provider && row.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|row| (row.created_at, row.id));
        due.truncate(limit);
        Ok(due)
    }

    async fn claim(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<QueueRow>> {
        check_toggle(&self.unavailable, "conversion queue").await?;
        let mut rows = self.rows.write().await;
        match rows.get_mut(&id) {
            Some(row) if row.is_due(now) => {
                row.status = QueueStatus::Processing;
                row.attempt_count += 1;
                row.updated_at = now;
                Ok(Some(row.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn complete(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        self.transition(id, |row| {
            row.status = QueueStatus::Completed;
            row.next_retry_at = None;
            row.updated_at = now;
        })
        .await
    }

    async fn skip(&self, id: Uuid, reason: &str, now: DateTime<Utc>) -> Result<()> {
        let reason = reason.to_string();
        self.transition(id, move |row| {
            row.status = QueueStatus::Completed;
            row.last_error = Some(reason);
            row.next_retry_at = None;
            row.updated_at = now;
        })
        .await
    }

    async fn fail(
        &self,
        id: Uuid,
        code: &str,
        category: ErrorCategory,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let (code, message) = (code.to_string(), message.to_string());
        self.transition(id, move |row| {
            row.status = QueueStatus::Failed;
            row.provider_error_code = Some(code);
            row.provider_error_category = Some(category);
            row.last_error = Some(message);
            row.next_retry_at = None;
            row.updated_at = now;
        })
        .await
    }

    async fn retry(
        &self,
        id: Uuid,
        code: &str,
        category: ErrorCategory,
        message: &str,
        next_retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let (code, message) = (code.to_string(), message.to_string());
        self.transition(id, move |row| {
            row.status = QueueStatus::Retry;
            row.provider_error_code = Some(code);
            row.provider_error_category = Some(category);
            row.last_error = Some(message);
            row.next_retry_at = Some(next_retry_at);
            row.updated_at = now;
        })
        .await
    }

    async fn list_for_site(
        &self,
        site_id: CanonicalTenantId,
        statuses: &[QueueStatus],
        limit: usize,
    ) -> Result<Vec<QueueRow>> {
        check_toggle(&self.unavailable, "conversion queue").await?;
        let mut rows: Vec<_> = self
            .rows
            .read()
            .await
            .values()
            .filter(|row| row.site_id == site_id && statuses.contains(&row.status))
            .cloned()
            .collect();
        rows.sort_by_key(|row| (row.created_at, row.id));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn release_stale(
        &self,
        provider: &str,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        check_toggle(&self.unavailable, "conversion queue").await?;
        let mut released = 0;
        for row in self.rows.write().await.values_mut() {
            if row.provider == provider
                && row.status == QueueStatus::Processing
                && row.updated_at < stale_before
            {
                row.status = QueueStatus::Retry;
                row.last_error = Some(LEASE_EXPIRED.to_string());
                row.next_retry_at = Some(now);
                row.updated_at = now;
                released += 1;
            }
        }
        Ok(released)
    }
}
