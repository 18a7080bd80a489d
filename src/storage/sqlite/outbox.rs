//! SQLite job outbox.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::to_millis;
use crate::interfaces::{JobOutbox, Result};
use crate::model::JobEnvelope;
use crate::storage::schema::JobOutbox as JobOutboxTable;

pub struct SqliteJobOutbox {
    pool: SqlitePool,
}

impl SqliteJobOutbox {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobOutbox for SqliteJobOutbox {
    async fn insert(&self, job: &JobEnvelope, now: DateTime<Utc>) -> Result<()> {
        let query = Query::insert()
            .into_table(JobOutboxTable::Table)
            .columns([
                JobOutboxTable::MessageId,
                JobOutboxTable::DedupId,
                JobOutboxTable::TenantId,
                JobOutboxTable::Job,
                JobOutboxTable::CreatedAt,
            ])
            .values([
                job.message_id.to_string().into(),
                job.dedup_id.clone().into(),
                job.payload.tenant().to_string().into(),
                serde_json::to_string(job)?.into(),
                to_millis(now).into(),
            ])?
            .on_conflict(
                OnConflict::column(JobOutboxTable::MessageId)
                    .do_nothing()
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn ack(&self, message_id: Uuid) -> Result<bool> {
        let query = Query::delete()
            .from_table(JobOutboxTable::Table)
            .and_where(Expr::col(JobOutboxTable::MessageId).eq(message_id.to_string()))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_unacked(&self, before: DateTime<Utc>, limit: usize) -> Result<Vec<JobEnvelope>> {
        let query = Query::select()
            .column(JobOutboxTable::Job)
            .from(JobOutboxTable::Table)
            .and_where(Expr::col(JobOutboxTable::CreatedAt).lt(to_millis(before)))
            .order_by(JobOutboxTable::CreatedAt, Order::Asc)
            .limit(limit as u64)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| -> Result<JobEnvelope> {
                let job: String = row.try_get("job")?;
                Ok(serde_json::from_str(&job)?)
            })
            .collect()
    }
}
