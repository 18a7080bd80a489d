//! SQLite mid-funnel signal ledger and V1 observation queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Cond, Expr, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{from_millis, parse_opt_uuid, parse_uuid, to_millis};
use crate::interfaces::{MarketingSignalStore, ObservationStore, Result, StoreError};
use crate::model::{
    CanonicalTenantId, Gear, InsertOutcome, MarketingSignal, Observation, SignalStatus,
};
use crate::storage::schema::{MarketingSignals, Observations};

pub struct SqliteSignalStore {
    pool: SqlitePool,
}

impl SqliteSignalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn insert_on(conn: &mut SqliteConnection, signal: &MarketingSignal) -> Result<()> {
        let query = Query::insert()
            .into_table(MarketingSignals::Table)
            .columns([
                MarketingSignals::Id,
                MarketingSignals::TenantId,
                MarketingSignals::CallId,
                MarketingSignals::ClickChain,
                MarketingSignals::Gear,
                MarketingSignals::ValueCents,
                MarketingSignals::Currency,
                MarketingSignals::SignalTime,
                MarketingSignals::Status,
                MarketingSignals::CreatedAt,
            ])
            .values([
                signal.id.to_string().into(),
                signal.tenant.to_string().into(),
                signal.call_id.map(|id| id.to_string()).into(),
                signal.click_chain.clone().into(),
                signal.gear.as_str().into(),
                signal.value_cents.into(),
                signal.currency.clone().into(),
                to_millis(signal.signal_time).into(),
                signal.status.as_str().into(),
                to_millis(signal.created_at).into(),
            ])?
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&mut *conn).await?;
        Ok(())
    }

    /// Check for a matching pulse and insert within an already-started transaction.
    async fn insert_pulse_on(
        conn: &mut SqliteConnection,
        signal: &MarketingSignal,
        since: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        let mut same_chain = Cond::any();
        if let Some(call_id) = signal.call_id {
            same_chain = same_chain.add(Expr::col(MarketingSignals::CallId).eq(call_id.to_string()));
        }
        if let Some(chain) = &signal.click_chain {
            same_chain = same_chain.add(Expr::col(MarketingSignals::ClickChain).eq(chain.as_str()));
        }

        if !same_chain.is_empty() {
            let query = Query::select()
                .column(MarketingSignals::Id)
                .from(MarketingSignals::Table)
                .and_where(Expr::col(MarketingSignals::TenantId).eq(signal.tenant.to_string()))
                .and_where(Expr::col(MarketingSignals::Gear).eq(Gear::V2.as_str()))
                .and_where(Expr::col(MarketingSignals::SignalTime).gte(to_millis(since)))
                .cond_where(same_chain)
                .limit(1)
                .to_string(SqliteQueryBuilder);

            if sqlx::query(&query).fetch_optional(&mut *conn).await?.is_some() {
                return Ok(InsertOutcome::Duplicate);
            }
        }

        Self::insert_on(conn, signal).await?;
        Ok(InsertOutcome::Inserted)
    }
}

fn decode_signal(row: &SqliteRow) -> Result<MarketingSignal> {
    let gear: String = row.try_get("gear")?;
    let status: String = row.try_get("status")?;
    Ok(MarketingSignal {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        tenant: CanonicalTenantId(parse_uuid(&row.try_get::<String, _>("tenant_id")?)?),
        call_id: parse_opt_uuid(row.try_get("call_id")?)?,
        click_chain: row.try_get("click_chain")?,
        gear: Gear::parse(&gear)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown gear {:?}", gear)))?,
        value_cents: row.try_get("value_cents")?,
        currency: row.try_get("currency")?,
        signal_time: from_millis(row.try_get("signal_time")?)?,
        status: SignalStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown signal status {:?}", status)))?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

#[async_trait]
impl MarketingSignalStore for SqliteSignalStore {
    async fn insert(&self, signal: &MarketingSignal) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_on(&mut conn, signal).await
    }

    async fn insert_pulse_if_absent(
        &self,
        signal: &MarketingSignal,
        since: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        // BEGIN IMMEDIATE takes the write lock before the existence check.
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        match Self::insert_pulse_on(&mut conn, signal, since).await {
            Ok(outcome) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(outcome)
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    async fn list_pending(
        &self,
        tenant: CanonicalTenantId,
        limit: usize,
    ) -> Result<Vec<MarketingSignal>> {
        let query = Query::select()
            .column(sea_query::Asterisk)
            .from(MarketingSignals::Table)
            .and_where(Expr::col(MarketingSignals::TenantId).eq(tenant.to_string()))
            .and_where(Expr::col(MarketingSignals::Status).eq(SignalStatus::Pending.as_str()))
            .order_by(MarketingSignals::SignalTime, Order::Asc)
            .order_by(MarketingSignals::Id, Order::Asc)
            .limit(limit as u64)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(decode_signal).collect()
    }

    async fn mark_processing(&self, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let query = Query::update()
            .table(MarketingSignals::Table)
            .value(MarketingSignals::Status, SignalStatus::Processing.as_str())
            .and_where(Expr::col(MarketingSignals::Id).is_in(ids.iter().map(|id| id.to_string())))
            .and_where(Expr::col(MarketingSignals::Status).eq(SignalStatus::Pending.as_str()))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

pub struct SqliteObservationStore {
    pool: SqlitePool,
}

impl SqliteObservationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ObservationStore for SqliteObservationStore {
    async fn record(&self, observation: &Observation) -> Result<()> {
        let query = Query::insert()
            .into_table(Observations::Table)
            .columns([
                Observations::Id,
                Observations::TenantId,
                Observations::SessionId,
                Observations::Fingerprint,
                Observations::Url,
                Observations::ObservedAt,
                Observations::ExpiresAt,
            ])
            .values([
                observation.id.to_string().into(),
                observation.tenant.to_string().into(),
                observation.session_id.clone().into(),
                observation.fingerprint.clone().into(),
                observation.url.clone().into(),
                to_millis(observation.observed_at).into(),
                to_millis(observation.expires_at).into(),
            ])?
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn list_live(
        &self,
        tenant: CanonicalTenantId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Observation>> {
        let query = Query::select()
            .column(sea_query::Asterisk)
            .from(Observations::Table)
            .and_where(Expr::col(Observations::TenantId).eq(tenant.to_string()))
            .and_where(Expr::col(Observations::ExpiresAt).gt(to_millis(now)))
            .order_by(Observations::ObservedAt, Order::Desc)
            .limit(limit as u64)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| -> Result<Observation> {
                Ok(Observation {
                    id: parse_uuid(&row.try_get::<String, _>("id")?)?,
                    tenant: CanonicalTenantId(parse_uuid(&row.try_get::<String, _>("tenant_id")?)?),
                    session_id: row.try_get("session_id")?,
                    fingerprint: row.try_get("fingerprint")?,
                    url: row.try_get("url")?,
                    observed_at: from_millis(row.try_get("observed_at")?)?,
                    expires_at: from_millis(row.try_get("expires_at")?)?,
                })
            })
            .collect()
    }
}
