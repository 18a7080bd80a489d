//! Async worker pipeline.
//!
//! Each delivered job runs:
//! 1. Ledger claim. A duplicate claim is acknowledged without work.
//! 2. Gates, for edge events only: fingerprint velocity (quarantine),
//!    traffic quality (non-billable skip), quota (soft refusal).
//! 3. Idempotency insert and usage count for billable events.
//! 4. Domain writes and valuation.
//!
//! A domain failure after a billable outcome undoes the usage count and the
//! idempotency key before the error is raised. Retryable errors release the
//! ledger claim and go back to the queue; anything else is dead-lettered and
//! acknowledged.

mod gates;

pub use gates::{is_blocked_referrer, is_bot_user_agent};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::{BusError, JobHandler};
use crate::config::WorkerConfig;
use crate::dlq::{DeadLetter, DeadLetterPublisher, DlqError};
use crate::error::{Classify, ErrorClass};
use crate::idempotency::{IdempotencyGuard, KeyInput};
use crate::interfaces::{
    CollaboratorError, CounterStore, DomainStore, Entitlements, ProcessedSignalLedger,
    SessionLookup, StoreError, TenantPlan, UsageStore,
};
use crate::model::{
    usage_month, CallEventJob, CallRecord, CanonicalTenantId, ClickIds, Gear, InsertOutcome, JobEnvelope,
    JobPayload, ProcessedStatus, SealJob, StageJob, SyncEventJob, TrackedEvent,
};
use crate::utils::clock::Clock;
use crate::utils::compensation::Compensation;
use crate::valuation::{SignalRequest, ValuationEngine, ValuationError, ValuationOutcome};

pub const STAGE_LEDGER: &str = "ledger";
pub const STAGE_GATES: &str = "gates";
pub const STAGE_DOMAIN: &str = "domain";
pub const STAGE_VALUATION: &str = "valuation";

/// Event name used to key call intents. Buckets exactly.
const CALL_INTENT_EVENT: &str = "call_intent";

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("{stage} store error: {source}")]
    Store {
        stage: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("Entitlement lookup failed: {0}")]
    Entitlements(#[from] CollaboratorError),

    #[error(transparent)]
    Valuation(#[from] ValuationError),

    #[error("Dead letter failed: {0}")]
    DeadLetter(#[from] DlqError),
}

impl WorkerError {
    fn store(stage: &'static str) -> impl FnOnce(StoreError) -> WorkerError {
        move |source| WorkerError::Store { stage, source }
    }

    /// Pipeline stage recorded on the dead letter.
    pub fn stage(&self) -> &'static str {
        match self {
            WorkerError::Store { stage, .. } => stage,
            WorkerError::Entitlements(_) => STAGE_GATES,
            WorkerError::Valuation(_) => STAGE_VALUATION,
            WorkerError::DeadLetter(_) => STAGE_GATES,
        }
    }
}

impl Classify for WorkerError {
    fn class(&self) -> ErrorClass {
        match self {
            WorkerError::Store { source, .. } => source.class(),
            WorkerError::Entitlements(e) => e.class(),
            WorkerError::Valuation(e) => e.class(),
            WorkerError::DeadLetter(_) => ErrorClass::Transient,
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;

/// How a delivery was acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    Processed(Option<ValuationOutcome>),
    /// Another delivery already claimed this dedup id.
    AlreadyClaimed,
    /// Idempotency key already present.
    Duplicate,
    /// Fingerprint velocity exceeded. Written to the dead-letter store.
    Quarantined,
    /// Bot or blocked referrer. Idempotency record written, nothing billed.
    NonBillable,
    /// Tenant is at its monthly quota. Acknowledged without work.
    QuotaExceeded,
    /// Non-retryable failure, dead-lettered.
    DeadLettered { stage: &'static str },
}

/// Every collaborator the pipeline writes through.
#[derive(Clone)]
pub struct WorkerDeps {
    pub ledger: Arc<dyn ProcessedSignalLedger>,
    pub counters: Arc<dyn CounterStore>,
    pub idempotency: IdempotencyGuard,
    pub usage: Arc<dyn UsageStore>,
    pub domain: Arc<dyn DomainStore>,
    pub sessions: Arc<dyn SessionLookup>,
    pub valuation: ValuationEngine,
    pub entitlements: Arc<dyn Entitlements>,
    pub dead_letters: Arc<dyn DeadLetterPublisher>,
    pub clock: Arc<dyn Clock>,
}

pub struct WorkerPipeline {
    deps: WorkerDeps,
    config: WorkerConfig,
}

impl WorkerPipeline {
    pub fn new(deps: WorkerDeps, config: WorkerConfig) -> Self {
        Self { deps, config }
    }

    /// Process one delivery. `Err` asks the queue for redelivery.
    #[tracing::instrument(
        name = "worker.process",
        skip_all,
        fields(message_id = %job.message_id, kind = job.payload.kind(), attempt = job.attempt)
    )]
    pub async fn process(&self, job: &JobEnvelope) -> Result<WorkerOutcome> {
        let now = self.deps.clock.now();
        let tenant = job.payload.tenant();

        let claim = self
            .deps
            .ledger
            .try_claim(&job.dedup_id, tenant, now)
            .await
            .map_err(WorkerError::store(STAGE_LEDGER))?;
        if claim == InsertOutcome::Duplicate {
            debug!(dedup_id = %job.dedup_id, "Job already claimed, acknowledging");
            return Ok(WorkerOutcome::AlreadyClaimed);
        }

        match self.execute(job, now).await {
            Ok(outcome) => {
                self.mark(&job.dedup_id, ProcessedStatus::Processed, now).await;
                Ok(outcome)
            }
            Err(e) if e.is_retryable() => {
                warn!(tenant = %tenant, stage = e.stage(), error = %e, "Retryable failure");
                self.release(&job.dedup_id).await;
                Err(e)
            }
            Err(e) => {
                let stage = e.stage();
                let published = match DeadLetter::from_job(job, stage, &e.to_string(), e.class(), now)
                {
                    Ok(dead_letter) => self.deps.dead_letters.publish(dead_letter).await,
                    Err(build_err) => Err(build_err),
                };
                if let Err(dlq_err) = published {
                    self.release(&job.dedup_id).await;
                    return Err(dlq_err.into());
                }
                self.mark(&job.dedup_id, ProcessedStatus::Failed, now).await;
                Ok(WorkerOutcome::DeadLettered { stage })
            }
        }
    }

    async fn mark(&self, dedup_id: &str, status: ProcessedStatus, now: DateTime<Utc>) {
        if let Err(e) = self.deps.ledger.mark(dedup_id, status, now).await {
            error!(dedup_id = %dedup_id, status = status.as_str(), error = %e, "Failed to update ledger");
        }
    }

    async fn release(&self, dedup_id: &str) {
        if let Err(e) = self.deps.ledger.release(dedup_id).await {
            error!(dedup_id = %dedup_id, error = %e, "Failed to release ledger claim");
        }
    }

    async fn execute(&self, job: &JobEnvelope, now: DateTime<Utc>) -> Result<WorkerOutcome> {
        let tenant = job.payload.tenant();
        let plan = self.deps.entitlements.plan(tenant).await?;

        match &job.payload {
            JobPayload::CallEvent(call) => {
                let key_input = KeyInput {
                    tenant,
                    event_name: CALL_INTENT_EVENT,
                    url: Some(call.intent_target.as_str()),
                    fingerprint: &call.fingerprint,
                    server_time: call.received_at,
                    client_time: None,
                };
                let gate = EdgeGate {
                    fingerprint: &call.fingerprint,
                    user_agent: call.user_agent.as_deref(),
                    referrer: None,
                };
                self.run_billable(job, gate, key_input, plan.as_ref(), now, || {
                    self.handle_call(job, call, plan.as_ref(), now)
                })
                .await
            }
            JobPayload::Sync(event) => {
                let client_time = event
                    .client_ts_ms
                    .and_then(DateTime::from_timestamp_millis);
                let key_input = KeyInput {
                    tenant,
                    event_name: &event.event_name,
                    url: event.url.as_deref(),
                    fingerprint: &event.fingerprint,
                    server_time: event.received_at,
                    client_time,
                };
                let gate = EdgeGate {
                    fingerprint: &event.fingerprint,
                    user_agent: event.user_agent.as_deref(),
                    referrer: event.referrer.as_deref(),
                };
                self.run_billable(job, gate, key_input, plan.as_ref(), now, || {
                    self.handle_sync(job, event, now)
                })
                .await
            }
            JobPayload::Stage(stage) => {
                let outcome = self.handle_stage(stage, plan.as_ref(), now).await?;
                Ok(WorkerOutcome::Processed(Some(outcome)))
            }
            JobPayload::Seal(seal) => {
                let outcome = self.handle_seal(seal, now).await?;
                Ok(WorkerOutcome::Processed(Some(outcome)))
            }
        }
    }

    /// Gates, idempotency, usage and compensation around an edge event.
    async fn run_billable<'a, F, Fut>(
        &'a self,
        job: &'a JobEnvelope,
        gate: EdgeGate<'a>,
        key_input: KeyInput<'a>,
        plan: Option<&TenantPlan>,
        now: DateTime<Utc>,
        work: F,
    ) -> Result<WorkerOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Option<ValuationOutcome>>>,
    {
        let tenant = job.payload.tenant();

        if self.exceeds_velocity(tenant, gate.fingerprint, now).await {
            let reason = format!(
                "fingerprint velocity above {} per {}s",
                self.config.fraud_velocity_limit, self.config.fraud_window_secs
            );
            self.deps
                .dead_letters
                .publish(DeadLetter::quarantine(job, &reason, now)?)
                .await?;
            return Ok(WorkerOutcome::Quarantined);
        }

        let billable = !is_bot_user_agent(gate.user_agent)
            && !is_blocked_referrer(gate.referrer, &self.config.blocked_referrers);

        let month = usage_month(now);
        if billable {
            if let Some(limit) = plan.and_then(|p| p.monthly_event_limit) {
                let used = self
                    .deps
                    .usage
                    .get(tenant, &month)
                    .await
                    .map_err(WorkerError::store(STAGE_GATES))?;
                if used >= limit {
                    info!(tenant = %tenant, used, limit, "Monthly quota reached, acknowledging without work");
                    return Ok(WorkerOutcome::QuotaExceeded);
                }
            }
        }

        let key = self.deps.idempotency.derive(&key_input);
        let claim = self
            .deps
            .idempotency
            .claim(tenant, &key, now)
            .await
            .map_err(WorkerError::store(STAGE_DOMAIN))?;
        if claim == InsertOutcome::Duplicate {
            return Ok(WorkerOutcome::Duplicate);
        }

        if !billable {
            debug!(tenant = %tenant, "Non-billable traffic, skipping domain work");
            return Ok(WorkerOutcome::NonBillable);
        }

        let mut compensation = Compensation::new();
        let idempotency = &self.deps.idempotency;
        let key_ref = key.as_str();
        compensation.push("delete_idempotency_key", move || {
            Box::pin(async move {
                idempotency
                    .release(tenant, key_ref)
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            })
        });

        if let Err(e) = self.deps.usage.increment(tenant, &month).await {
            compensation.run(&job.dedup_id).await;
            return Err(WorkerError::Store {
                stage: STAGE_DOMAIN,
                source: e,
            });
        }
        let usage = &self.deps.usage;
        let month_ref = month.as_str();
        compensation.push("decrement_usage", move || {
            Box::pin(async move {
                usage
                    .decrement(tenant, month_ref)
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            })
        });

        match work().await {
            Ok(outcome) => Ok(WorkerOutcome::Processed(outcome)),
            Err(e) => {
                let report = compensation.run(&job.dedup_id).await;
                if !report.is_clean() {
                    error!(
                        tenant = %tenant,
                        failed = report.failed.len(),
                        "Compensation incomplete"
                    );
                }
                Err(e)
            }
        }
    }

    /// Count this event against the fingerprint. Counter failures fail open.
    async fn exceeds_velocity(
        &self,
        tenant: CanonicalTenantId,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let key = format!("fraud:{}:{}", tenant, fingerprint);
        match self
            .deps
            .counters
            .increment(&key, self.config.fraud_window(), now)
            .await
        {
            Ok(snapshot) => snapshot.count > self.config.fraud_velocity_limit,
            Err(e) => {
                warn!(tenant = %tenant, error = %e, "Velocity counter unavailable, skipping fraud gate");
                false
            }
        }
    }

    async fn handle_call(
        &self,
        job: &JobEnvelope,
        call: &CallEventJob,
        plan: Option<&TenantPlan>,
        now: DateTime<Utc>,
    ) -> Result<Option<ValuationOutcome>> {
        let record = CallRecord {
            id: call.event_id.unwrap_or_else(|| stable_id(&job.dedup_id)),
            tenant: call.tenant,
            session_id: Some(call.session_id.clone()),
            fingerprint: call.fingerprint.clone(),
            intent_action: call.intent_action.clone(),
            intent_target: call.intent_target.clone(),
            lead_score: call.lead_score,
            ad_context: call.ad_context.clone(),
            click_ids: call.click_ids.clone(),
            created_at: call.received_at,
        };
        self.deps
            .domain
            .record_call(&record)
            .await
            .map_err(WorkerError::store(STAGE_DOMAIN))?;

        let outcome = self
            .deps
            .valuation
            .record_signal(
                SignalRequest {
                    tenant: call.tenant,
                    gear: Gear::V2,
                    call_id: Some(record.id),
                    click_chain: call.click_ids.primary().map(|(_, id)| id.to_string()),
                    aov_major: plan.map_or(0.0, |p| p.aov_major),
                    currency: currency_for(plan),
                    click_time: call.click_time,
                    signal_time: call.received_at,
                },
                now,
            )
            .await?;
        Ok(Some(outcome))
    }

    async fn handle_sync(
        &self,
        job: &JobEnvelope,
        event: &SyncEventJob,
        now: DateTime<Utc>,
    ) -> Result<Option<ValuationOutcome>> {
        let tracked = TrackedEvent {
            id: stable_id(&job.dedup_id),
            tenant: event.tenant,
            session_id: event.session_id.clone(),
            fingerprint: event.fingerprint.clone(),
            event_name: event.event_name.clone(),
            url: event.url.clone(),
            occurred_at: event.received_at,
        };
        self.deps
            .domain
            .record_event(&tracked)
            .await
            .map_err(WorkerError::store(STAGE_DOMAIN))?;

        if !is_page_view(&event.event_name) {
            return Ok(None);
        }
        let outcome = self
            .deps
            .valuation
            .observe(
                event.tenant,
                event.session_id.clone(),
                &event.fingerprint,
                event.url.clone(),
                now,
            )
            .await?;
        Ok(Some(outcome))
    }

    async fn handle_stage(
        &self,
        stage: &StageJob,
        plan: Option<&TenantPlan>,
        now: DateTime<Utc>,
    ) -> Result<ValuationOutcome> {
        let (click_ids, click_time) = self.call_attribution(stage).await?;
        let outcome = self
            .deps
            .valuation
            .record_signal(
                SignalRequest {
                    tenant: stage.tenant,
                    gear: stage.gear,
                    call_id: Some(stage.call_id),
                    click_chain: click_ids.primary().map(|(_, id)| id.to_string()),
                    aov_major: plan.map_or(0.0, |p| p.aov_major),
                    currency: if stage.currency.is_empty() {
                        currency_for(plan)
                    } else {
                        stage.currency.clone()
                    },
                    click_time,
                    signal_time: stage.signal_time,
                },
                now,
            )
            .await?;
        Ok(outcome)
    }

    /// Click ids and click time for a staged call. Falls back to the stored
    /// call and its session when the job carries none. An unknown call is
    /// valued as a same-day signal.
    async fn call_attribution(
        &self,
        stage: &StageJob,
    ) -> Result<(ClickIds, Option<DateTime<Utc>>)> {
        if !stage.click_ids.is_empty() {
            return Ok((stage.click_ids.clone(), stage.click_time));
        }
        let call = self
            .deps
            .domain
            .get_call(stage.call_id)
            .await
            .map_err(WorkerError::store(STAGE_DOMAIN))?
            .filter(|call| call.tenant == stage.tenant);
        let Some(call) = call else {
            debug!(call_id = %stage.call_id, "Staged call not found, valuing without click");
            return Ok((stage.click_ids.clone(), stage.click_time));
        };
        let session = self
            .deps
            .sessions
            .find_session(stage.tenant, &call.fingerprint)
            .await
            .map_err(WorkerError::store(STAGE_DOMAIN))?;
        let click_time = stage
            .click_time
            .or_else(|| session.and_then(|s| s.click_time));
        Ok((call.click_ids, click_time))
    }

    async fn handle_seal(&self, seal: &SealJob, now: DateTime<Utc>) -> Result<ValuationOutcome> {
        Ok(self.deps.valuation.queue_sale(seal, now).await?)
    }
}

struct EdgeGate<'a> {
    fingerprint: &'a str,
    user_agent: Option<&'a str>,
    referrer: Option<&'a str>,
}

/// Deterministic row id for jobs without a client event id, so a redelivery
/// hits the same unique key.
fn stable_id(dedup_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, dedup_id.as_bytes())
}

fn is_page_view(event_name: &str) -> bool {
    matches!(
        event_name.trim().to_ascii_lowercase().as_str(),
        "page_view" | "pageview"
    )
}

fn currency_for(plan: Option<&TenantPlan>) -> String {
    plan.map_or_else(|| "EUR".to_string(), |p| p.currency.clone())
}

#[async_trait]
impl JobHandler for WorkerPipeline {
    async fn handle(&self, job: &JobEnvelope) -> std::result::Result<(), BusError> {
        self.process(job)
            .await
            .map(|_| ())
            .map_err(|e| BusError::handler(e.stage(), e.to_string(), e.class()))
    }
}
