//! SQLite idempotency keys and processed-signal ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, OnConflict, Query, SqliteQueryBuilder};
use sqlx::{Row, SqlitePool};

use super::to_millis;
use crate::interfaces::{IdempotencyStore, ProcessedSignalLedger, Result, StoreError};
use crate::model::{CanonicalTenantId, IdempotencyRecord, InsertOutcome, ProcessedStatus};
use crate::storage::schema::{IdempotencyKeys, ProcessedSignals};

fn outcome(rows_affected: u64) -> InsertOutcome {
    if rows_affected == 1 {
        InsertOutcome::Inserted
    } else {
        InsertOutcome::Duplicate
    }
}

pub struct SqliteIdempotencyStore {
    pool: SqlitePool,
}

impl SqliteIdempotencyStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyStore for SqliteIdempotencyStore {
    async fn try_insert(&self, record: &IdempotencyRecord) -> Result<InsertOutcome> {
        let query = Query::insert()
            .into_table(IdempotencyKeys::Table)
            .columns([
                IdempotencyKeys::TenantId,
                IdempotencyKeys::Key,
                IdempotencyKeys::CreatedAt,
                IdempotencyKeys::ExpiresAt,
            ])
            .values([
                record.tenant.to_string().into(),
                record.key.clone().into(),
                to_millis(record.created_at).into(),
                to_millis(record.expires_at).into(),
            ])?
            .on_conflict(
                OnConflict::columns([IdempotencyKeys::TenantId, IdempotencyKeys::Key])
                    .do_nothing()
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(outcome(result.rows_affected()))
    }

    async fn delete(&self, tenant: CanonicalTenantId, key: &str) -> Result<bool> {
        let query = Query::delete()
            .from_table(IdempotencyKeys::Table)
            .and_where(Expr::col(IdempotencyKeys::TenantId).eq(tenant.to_string()))
            .and_where(Expr::col(IdempotencyKeys::Key).eq(key))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn exists(&self, tenant: CanonicalTenantId, key: &str) -> Result<bool> {
        let query = Query::select()
            .column(IdempotencyKeys::Key)
            .from(IdempotencyKeys::Table)
            .and_where(Expr::col(IdempotencyKeys::TenantId).eq(tenant.to_string()))
            .and_where(Expr::col(IdempotencyKeys::Key).eq(key))
            .to_string(SqliteQueryBuilder);

        Ok(sqlx::query(&query)
            .fetch_optional(&self.pool)
            .await?
            .is_some())
    }
}

pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcessedSignalLedger for SqliteLedger {
    async fn try_claim(
        &self,
        dedup_id: &str,
        tenant: CanonicalTenantId,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        let now = to_millis(now);
        let query = Query::insert()
            .into_table(ProcessedSignals::Table)
            .columns([
                ProcessedSignals::DedupId,
                ProcessedSignals::TenantId,
                ProcessedSignals::Status,
                ProcessedSignals::CreatedAt,
                ProcessedSignals::UpdatedAt,
            ])
            .values([
                dedup_id.into(),
                tenant.to_string().into(),
                ProcessedStatus::Processing.as_str().into(),
                now.into(),
                now.into(),
            ])?
            .on_conflict(
                OnConflict::column(ProcessedSignals::DedupId)
                    .do_nothing()
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(outcome(result.rows_affected()))
    }

    async fn mark(&self, dedup_id: &str, status: ProcessedStatus, now: DateTime<Utc>) -> Result<()> {
        let query = Query::update()
            .table(ProcessedSignals::Table)
            .value(ProcessedSignals::Status, status.as_str())
            .value(ProcessedSignals::UpdatedAt, to_millis(now))
            .and_where(Expr::col(ProcessedSignals::DedupId).eq(dedup_id))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Corrupt(format!("no ledger row for {}", dedup_id)));
        }
        Ok(())
    }

    async fn release(&self, dedup_id: &str) -> Result<bool> {
        let query = Query::delete()
            .from_table(ProcessedSignals::Table)
            .and_where(Expr::col(ProcessedSignals::DedupId).eq(dedup_id))
            .and_where(Expr::col(ProcessedSignals::Status).eq(ProcessedStatus::Processing.as_str()))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn status(&self, dedup_id: &str) -> Result<Option<ProcessedStatus>> {
        let query = Query::select()
            .column(ProcessedSignals::Status)
            .from(ProcessedSignals::Table)
            .and_where(Expr::col(ProcessedSignals::DedupId).eq(dedup_id))
            .to_string(SqliteQueryBuilder);

        match sqlx::query(&query).fetch_optional(&self.pool).await? {
            Some(row) => {
                let raw: String = row.try_get("status")?;
                ProcessedStatus::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| StoreError::Corrupt(format!("unknown ledger status {:?}", raw)))
            }
            None => Ok(None),
        }
    }
}
