//! SQLite domain records, session lookup and usage counters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, OnConflict, Query, SqliteQueryBuilder};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{from_millis, parse_uuid, to_millis};
use crate::interfaces::{DomainStore, RecordOutcome, Result, SessionLookup, UsageStore};
use crate::model::{CallRecord, CanonicalTenantId, ClickIds, SessionInfo, TrackedEvent};
use crate::storage::schema::{Calls, Sessions, TrackedEvents, UsageCounters};

fn outcome(rows_affected: u64) -> RecordOutcome {
    if rows_affected == 1 {
        RecordOutcome::Inserted
    } else {
        RecordOutcome::Duplicate
    }
}

pub struct SqliteDomainStore {
    pool: SqlitePool,
}

impl SqliteDomainStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DomainStore for SqliteDomainStore {
    async fn record_event(&self, event: &TrackedEvent) -> Result<RecordOutcome> {
        let query = Query::insert()
            .into_table(TrackedEvents::Table)
            .columns([
                TrackedEvents::Id,
                TrackedEvents::Partition,
                TrackedEvents::TenantId,
                TrackedEvents::SessionId,
                TrackedEvents::Fingerprint,
                TrackedEvents::EventName,
                TrackedEvents::Url,
                TrackedEvents::OccurredAt,
            ])
            .values([
                event.id.to_string().into(),
                event.partition().into(),
                event.tenant.to_string().into(),
                event.session_id.clone().into(),
                event.fingerprint.clone().into(),
                event.event_name.clone().into(),
                event.url.clone().into(),
                to_millis(event.occurred_at).into(),
            ])?
            .on_conflict(
                OnConflict::columns([TrackedEvents::Id, TrackedEvents::Partition])
                    .do_nothing()
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(outcome(result.rows_affected()))
    }

    async fn record_call(&self, call: &CallRecord) -> Result<RecordOutcome> {
        let ad_context = call
            .ad_context
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let query = Query::insert()
            .into_table(Calls::Table)
            .columns([
                Calls::Id,
                Calls::Partition,
                Calls::TenantId,
                Calls::SessionId,
                Calls::Fingerprint,
                Calls::IntentAction,
                Calls::IntentTarget,
                Calls::LeadScore,
                Calls::AdContext,
                Calls::ClickIds,
                Calls::CreatedAt,
            ])
            .values([
                call.id.to_string().into(),
                call.created_at.format("%Y-%m").to_string().into(),
                call.tenant.to_string().into(),
                call.session_id.clone().into(),
                call.fingerprint.clone().into(),
                call.intent_action.clone().into(),
                call.intent_target.clone().into(),
                call.lead_score.into(),
                ad_context.into(),
                serde_json::to_string(&call.click_ids)?.into(),
                to_millis(call.created_at).into(),
            ])?
            .on_conflict(
                OnConflict::columns([Calls::Id, Calls::Partition])
                    .do_nothing()
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(outcome(result.rows_affected()))
    }

    async fn get_call(&self, id: Uuid) -> Result<Option<CallRecord>> {
        let query = Query::select()
            .column(sea_query::Asterisk)
            .from(Calls::Table)
            .and_where(Expr::col(Calls::Id).eq(id.to_string()))
            .limit(1)
            .to_string(SqliteQueryBuilder);

        let Some(row) = sqlx::query(&query).fetch_optional(&self.pool).await? else {
            return Ok(None);
        };

        let ad_context: Option<String> = row.try_get("ad_context")?;
        let click_ids: String = row.try_get("click_ids")?;
        Ok(Some(CallRecord {
            id: parse_uuid(&row.try_get::<String, _>("id")?)?,
            tenant: CanonicalTenantId(parse_uuid(&row.try_get::<String, _>("tenant_id")?)?),
            session_id: row.try_get("session_id")?,
            fingerprint: row.try_get("fingerprint")?,
            intent_action: row.try_get("intent_action")?,
            intent_target: row.try_get("intent_target")?,
            lead_score: row.try_get("lead_score")?,
            ad_context: ad_context
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            click_ids: serde_json::from_str(&click_ids)?,
            created_at: from_millis(row.try_get("created_at")?)?,
        }))
    }
}

/// Read side of the session table, plus the upsert used to seed it.
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(
        &self,
        tenant: CanonicalTenantId,
        fingerprint: &str,
        session: &SessionInfo,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let query = Query::insert()
            .into_table(Sessions::Table)
            .columns([
                Sessions::TenantId,
                Sessions::Fingerprint,
                Sessions::SessionId,
                Sessions::AnalyticsConsent,
                Sessions::Gclid,
                Sessions::Wbraid,
                Sessions::Gbraid,
                Sessions::ClickTime,
                Sessions::UpdatedAt,
            ])
            .values([
                tenant.to_string().into(),
                fingerprint.into(),
                session.session_id.clone().into(),
                session.analytics_consent.into(),
                session.click_ids.gclid.clone().into(),
                session.click_ids.wbraid.clone().into(),
                session.click_ids.gbraid.clone().into(),
                session.click_time.map(to_millis).into(),
                to_millis(now).into(),
            ])?
            .on_conflict(
                OnConflict::columns([Sessions::TenantId, Sessions::Fingerprint])
                    .update_columns([
                        Sessions::SessionId,
                        Sessions::AnalyticsConsent,
                        Sessions::Gclid,
                        Sessions::Wbraid,
                        Sessions::Gbraid,
                        Sessions::ClickTime,
                        Sessions::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionLookup for SqliteSessionStore {
    async fn find_session(
        &self,
        tenant: CanonicalTenantId,
        fingerprint: &str,
    ) -> Result<Option<SessionInfo>> {
        let query = Query::select()
            .column(sea_query::Asterisk)
            .from(Sessions::Table)
            .and_where(Expr::col(Sessions::TenantId).eq(tenant.to_string()))
            .and_where(Expr::col(Sessions::Fingerprint).eq(fingerprint))
            .to_string(SqliteQueryBuilder);

        let Some(row) = sqlx::query(&query).fetch_optional(&self.pool).await? else {
            return Ok(None);
        };

        let click_time: Option<i64> = row.try_get("click_time")?;
        Ok(Some(SessionInfo {
            session_id: row.try_get("session_id")?,
            analytics_consent: row.try_get("analytics_consent")?,
            click_ids: ClickIds {
                gclid: row.try_get("gclid")?,
                wbraid: row.try_get("wbraid")?,
                gbraid: row.try_get("gbraid")?,
            },
            click_time: click_time.map(from_millis).transpose()?,
        }))
    }
}

pub struct SqliteUsageStore {
    pool: SqlitePool,
}

impl SqliteUsageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageStore for SqliteUsageStore {
    async fn increment(&self, tenant: CanonicalTenantId, month: &str) -> Result<u64> {
        let query = Query::insert()
            .into_table(UsageCounters::Table)
            .columns([UsageCounters::TenantId, UsageCounters::Month, UsageCounters::Count])
            .values([tenant.to_string().into(), month.into(), 1_i64.into()])?
            .on_conflict(
                OnConflict::columns([UsageCounters::TenantId, UsageCounters::Month])
                    .value(UsageCounters::Count, Expr::col(UsageCounters::Count).add(1))
                    .to_owned(),
            )
            .returning_col(UsageCounters::Count)
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_one(&self.pool).await?;
        let count: i64 = row.try_get("event_count")?;
        Ok(count.max(0) as u64)
    }

    async fn decrement(&self, tenant: CanonicalTenantId, month: &str) -> Result<u64> {
        let query = Query::update()
            .table(UsageCounters::Table)
            .value(UsageCounters::Count, Expr::col(UsageCounters::Count).sub(1))
            .and_where(Expr::col(UsageCounters::TenantId).eq(tenant.to_string()))
            .and_where(Expr::col(UsageCounters::Month).eq(month))
            .and_where(Expr::col(UsageCounters::Count).gt(0))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        self.get(tenant, month).await
    }

    async fn get(&self, tenant: CanonicalTenantId, month: &str) -> Result<u64> {
        let query = Query::select()
            .column(UsageCounters::Count)
            .from(UsageCounters::Table)
            .and_where(Expr::col(UsageCounters::TenantId).eq(tenant.to_string()))
            .and_where(Expr::col(UsageCounters::Month).eq(month))
            .to_string(SqliteQueryBuilder);

        match sqlx::query(&query).fetch_optional(&self.pool).await? {
            Some(row) => {
                let count: i64 = row.try_get("event_count")?;
                Ok(count.max(0) as u64)
            }
            None => Ok(0),
        }
    }
}
