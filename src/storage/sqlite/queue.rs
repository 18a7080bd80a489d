//! SQLite offline conversion queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Cond, Expr, Order, Query, SqliteQueryBuilder, UpdateStatement};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{from_millis, parse_opt_uuid, parse_uuid, to_millis};
use crate::interfaces::{ConversionQueue, Result, StoreError, LEASE_EXPIRED};
use crate::model::{
    CanonicalTenantId, ClickIds, ErrorCategory, NewQueueRow, QueueRow, QueueStatus,
};
use crate::storage::schema::ConversionQueue as Q;

pub struct SqliteConversionQueue {
    pool: SqlitePool,
}

impl SqliteConversionQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Run an update guarded by `status = 'PROCESSING'`.
    ///
    /// When nothing matched, re-read the row to tell "missing" from "wrong state".
    async fn transition(&self, id: Uuid, mut update: UpdateStatement) -> Result<()> {
        let query = update
            .table(Q::Table)
            .and_where(Expr::col(Q::Id).eq(id.to_string()))
            .and_where(Expr::col(Q::Status).eq(QueueStatus::Processing.as_str()))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.get(id).await? {
            Some(row) => Err(StoreError::InvalidTransition {
                id,
                actual: row.status,
            }),
            None => Err(StoreError::NotFound(id)),
        }
    }
}

fn decode_row(row: &SqliteRow) -> Result<QueueRow> {
    let status: String = row.try_get("status")?;
    let category: Option<String> = row.try_get("provider_error_category")?;
    let next_retry_at: Option<i64> = row.try_get("next_retry_at")?;
    let attempt_count: i64 = row.try_get("attempt_count")?;

    Ok(QueueRow {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        site_id: CanonicalTenantId(parse_uuid(&row.try_get::<String, _>("site_id")?)?),
        provider: row.try_get("provider")?,
        call_id: parse_opt_uuid(row.try_get("call_id")?)?,
        sale_id: row.try_get("sale_id")?,
        session_id: row.try_get("session_id")?,
        click_ids: ClickIds {
            gclid: row.try_get("gclid")?,
            wbraid: row.try_get("wbraid")?,
            gbraid: row.try_get("gbraid")?,
        },
        value_cents: row.try_get("value_cents")?,
        currency: row.try_get("currency")?,
        conversion_time: from_millis(row.try_get("conversion_time")?)?,
        status: QueueStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown queue status {:?}", status)))?,
        attempt_count: u32::try_from(attempt_count)
            .map_err(|_| StoreError::Corrupt(format!("bad attempt_count {}", attempt_count)))?,
        provider_error_code: row.try_get("provider_error_code")?,
        provider_error_category: category.as_deref().and_then(ErrorCategory::parse),
        last_error: row.try_get("last_error")?,
        next_retry_at: next_retry_at.map(from_millis).transpose()?,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}

/// Claimable and due at `now`.
fn due_condition(now: i64) -> Cond {
    Cond::all()
        .add(Expr::col(Q::Status).is_in([QueueStatus::Queued.as_str(), QueueStatus::Retry.as_str()]))
        .add(
            Cond::any()
                .add(Expr::col(Q::NextRetryAt).is_null())
                .add(Expr::col(Q::NextRetryAt).lte(now)),
        )
}

#[async_trait]
impl ConversionQueue for SqliteConversionQueue {
    async fn enqueue(&self, row: NewQueueRow, now: DateTime<Utc>) -> Result<QueueRow> {
        let row = QueueRow::from_new(Uuid::new_v4(), row, now);
        let query = Query::insert()
            .into_table(Q::Table)
            .columns([
                Q::Id,
                Q::SiteId,
                Q::Provider,
                Q::CallId,
                Q::SaleId,
                Q::SessionId,
                Q::Gclid,
                Q::Wbraid,
                Q::Gbraid,
                Q::ValueCents,
                Q::Currency,
                Q::ConversionTime,
                Q::Status,
                Q::AttemptCount,
                Q::CreatedAt,
                Q::UpdatedAt,
            ])
            .values([
                row.id.to_string().into(),
                row.site_id.to_string().into(),
                row.provider.clone().into(),
                row.call_id.map(|id| id.to_string()).into(),
                row.sale_id.clone().into(),
                row.session_id.clone().into(),
                row.click_ids.gclid.clone().into(),
                row.click_ids.wbraid.clone().into(),
                row.click_ids.gbraid.clone().into(),
                row.value_cents.into(),
                row.currency.clone().into(),
                to_millis(row.conversion_time).into(),
                row.status.as_str().into(),
                0_i64.into(),
                to_millis(row.created_at).into(),
                to_millis(row.updated_at).into(),
            ])?
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<QueueRow>> {
        let query = Query::select()
            .column(sea_query::Asterisk)
            .from(Q::Table)
            .and_where(Expr::col(Q::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(decode_row)
            .transpose()
    }

    async fn list_due(
        &self,
        provider: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueRow>> {
        let query = Query::select()
            .column(sea_query::Asterisk)
            .from(Q::Table)
            .and_where(Expr::col(Q::Provider).eq(provider))
            .cond_where(due_condition(to_millis(now)))
            .order_by(Q::CreatedAt, Order::Asc)
            .order_by(Q::Id, Order::Asc)
            .limit(limit as u64)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn claim(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<QueueRow>> {
        let now = to_millis(now);
        let query = Query::update()
            .table(Q::Table)
            .value(Q::Status, QueueStatus::Processing.as_str())
            .value(Q::AttemptCount, Expr::col(Q::AttemptCount).add(1))
            .value(Q::UpdatedAt, now)
            .and_where(Expr::col(Q::Id).eq(id.to_string()))
            .cond_where(due_condition(now))
            .returning_all()
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(decode_row)
            .transpose()
    }

    async fn complete(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let mut update = Query::update();
        update
            .value(Q::Status, QueueStatus::Completed.as_str())
            .value(Q::NextRetryAt, Option::<i64>::None)
            .value(Q::UpdatedAt, to_millis(now));
        self.transition(id, update).await
    }

    async fn skip(&self, id: Uuid, reason: &str, now: DateTime<Utc>) -> Result<()> {
        let mut update = Query::update();
        update
            .value(Q::Status, QueueStatus::Completed.as_str())
            .value(Q::LastError, reason)
            .value(Q::NextRetryAt, Option::<i64>::None)
            .value(Q::UpdatedAt, to_millis(now));
        self.transition(id, update).await
    }

    async fn fail(
        &self,
        id: Uuid,
        code: &str,
        category: ErrorCategory,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut update = Query::update();
        update
            .value(Q::Status, QueueStatus::Failed.as_str())
            .value(Q::ProviderErrorCode, code)
            .value(Q::ProviderErrorCategory, category.as_str())
            .value(Q::LastError, message)
            .value(Q::NextRetryAt, Option::<i64>::None)
            .value(Q::UpdatedAt, to_millis(now));
        self.transition(id, update).await
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
        let mut update = Query::update();
        update
            .value(Q::Status, QueueStatus::Retry.as_str())
            .value(Q::ProviderErrorCode, code)
            .value(Q::ProviderErrorCategory, category.as_str())
            .value(Q::LastError, message)
            .value(Q::NextRetryAt, to_millis(next_retry_at))
            .value(Q::UpdatedAt, to_millis(now));
        self.transition(id, update).await
    }

    async fn list_for_site(
        &self,
        site_id: CanonicalTenantId,
        statuses: &[QueueStatus],
        limit: usize,
    ) -> Result<Vec<QueueRow>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let query = Query::select()
            .column(sea_query::Asterisk)
            .from(Q::Table)
            .and_where(Expr::col(Q::SiteId).eq(site_id.to_string()))
            .and_where(Expr::col(Q::Status).is_in(statuses.iter().map(|s| s.as_str())))
            .order_by(Q::CreatedAt, Order::Asc)
            .order_by(Q::Id, Order::Asc)
            .limit(limit as u64)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn release_stale(
        &self,
        provider: &str,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let now = to_millis(now);
        let query = Query::update()
            .table(Q::Table)
            .value(Q::Status, QueueStatus::Retry.as_str())
            .value(Q::LastError, LEASE_EXPIRED)
            .value(Q::NextRetryAt, now)
            .value(Q::UpdatedAt, now)
            .and_where(Expr::col(Q::Provider).eq(provider))
            .and_where(Expr::col(Q::Status).eq(QueueStatus::Processing.as_str()))
            .and_where(Expr::col(Q::UpdatedAt).lt(to_millis(stale_before)))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
