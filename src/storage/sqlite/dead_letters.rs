//! SQLite dead-letter store.

use std::collections::HashMap;

use async_trait::async_trait;
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sqlx::{Row, SqlitePool};

use super::{from_millis, parse_uuid, to_millis};
use crate::dlq::DeadLetter;
use crate::interfaces::{DeadLetterStore, Result, StoreError};
use crate::model::CanonicalTenantId;
use crate::storage::schema::DeadLetters;

pub struct SqliteDeadLetterStore {
    pool: SqlitePool,
}

impl SqliteDeadLetterStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeadLetterStore for SqliteDeadLetterStore {
    async fn insert(&self, dead_letter: &DeadLetter) -> Result<()> {
        let query = Query::insert()
            .into_table(DeadLetters::Table)
            .columns([
                DeadLetters::Id,
                DeadLetters::SiteId,
                DeadLetters::QueueMessageId,
                DeadLetters::Stage,
                DeadLetters::Error,
                DeadLetters::ErrorClass,
                DeadLetters::Attempts,
                DeadLetters::Payload,
                DeadLetters::Metadata,
                DeadLetters::OccurredAt,
            ])
            .values([
                dead_letter.id.to_string().into(),
                dead_letter.site_id.to_string().into(),
                dead_letter.queue_message_id.to_string().into(),
                dead_letter.stage.clone().into(),
                dead_letter.error.clone().into(),
                dead_letter.error_class.clone().into(),
                i64::from(dead_letter.attempts).into(),
                serde_json::to_string(&dead_letter.payload)?.into(),
                serde_json::to_string(&dead_letter.metadata)?.into(),
                to_millis(dead_letter.occurred_at).into(),
            ])?
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn list(
        &self,
        site_id: Option<CanonicalTenantId>,
        limit: usize,
    ) -> Result<Vec<DeadLetter>> {
        let mut select = Query::select();
        select
            .column(sea_query::Asterisk)
            .from(DeadLetters::Table)
            .order_by(DeadLetters::OccurredAt, Order::Desc)
            .limit(limit as u64);
        if let Some(site_id) = site_id {
            select.and_where(Expr::col(DeadLetters::SiteId).eq(site_id.to_string()));
        }
        let query = select.to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| -> Result<DeadLetter> {
                let payload: String = row.try_get("payload")?;
                let metadata: String = row.try_get("metadata")?;
                let attempts: i64 = row.try_get("attempts")?;
                Ok(DeadLetter {
                    id: parse_uuid(&row.try_get::<String, _>("id")?)?,
                    site_id: CanonicalTenantId(parse_uuid(&row.try_get::<String, _>("site_id")?)?),
                    queue_message_id: parse_uuid(&row.try_get::<String, _>("queue_message_id")?)?,
                    stage: row.try_get("stage")?,
                    error: row.try_get("error")?,
                    error_class: row.try_get("error_class")?,
                    attempts: u32::try_from(attempts)
                        .map_err(|_| StoreError::Corrupt(format!("bad attempts {}", attempts)))?,
                    payload: serde_json::from_str(&payload)?,
                    metadata: serde_json::from_str::<HashMap<String, String>>(&metadata)?,
                    occurred_at: from_millis(row.try_get("occurred_at")?)?,
                })
            })
            .collect()
    }
}
