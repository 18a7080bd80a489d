//! Signed ingest endpoints.
//!
//! Order per request: gate, replay check, rate limits, then (call events
//! only) the session/consent gate, then publish. Nothing tenant-scoped is
//! touched before the gate accepts the envelope.
//!
//! The replay marker is recorded atomically at the replay check and released
//! again when the request ends in an error (429, 4xx, 5xx), so a client's
//! retry of the same envelope is processed rather than answered as a replay.

use std::future::Future;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use super::response::{self, ApiError};
use super::{AppContext, AppState};
use crate::bus::PublishOutcome;
use crate::error::{Classify, ErrorClass};
use crate::ingress::{
    Authorized, CallEventPayload, Envelope, IngressPayload, SealPayload, StagePayload,
    SyncEventPayload,
};
use crate::model::{
    CallEventJob, CanonicalTenantId, ClickIds, JobEnvelope, JobPayload, SealJob, StageJob,
    SyncEventJob,
};
use crate::ratelimit::Scope;

/// Payloads that name the edge client they came from.
trait Fingerprinted {
    fn fingerprint(&self) -> Option<&str>;
}

impl Fingerprinted for CallEventPayload {
    fn fingerprint(&self) -> Option<&str> {
        Some(&self.fingerprint)
    }
}

impl Fingerprinted for SyncEventPayload {
    fn fingerprint(&self) -> Option<&str> {
        Some(&self.fingerprint)
    }
}

impl Fingerprinted for StagePayload {
    fn fingerprint(&self) -> Option<&str> {
        None
    }
}

impl Fingerprinted for SealPayload {
    fn fingerprint(&self) -> Option<&str> {
        None
    }
}

struct Admitted<P> {
    envelope: Envelope,
    authorized: Authorized<P>,
    now: DateTime<Utc>,
}

/// Gate, replay and rate limit. `None` means the envelope is a replay.
async fn admit<P>(
    state: &AppContext,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Option<Admitted<P>>, ApiError>
where
    P: IngressPayload + Fingerprinted,
{
    let envelope = Envelope::from_parts(headers, body);
    let now = state.clock.now();

    let authorized = match state.gate.authorize::<P>(&envelope, now).await {
        Ok(authorized) => authorized,
        Err(rejection) => {
            if rejection.class() == ErrorClass::Auth {
                warn!(
                    tenant = envelope.tenant.as_deref().unwrap_or("-"),
                    client_ip = %envelope.client_ip,
                    reason = %rejection,
                    "Ingress rejected"
                );
                state
                    .limiter
                    .record_auth_failure(&envelope.client_ip, now)
                    .await?;
            } else {
                debug!(client_ip = %envelope.client_ip, reason = %rejection, "Ingress rejected");
            }
            return Err(rejection.into());
        }
    };

    let recorded = match state
        .replay
        .check_and_record(&authorized.replay_key, state.gate.config().replay_ttl(), now)
        .await
    {
        Ok(true) => {
            debug!(tenant = %authorized.tenant, "Replayed envelope");
            return Ok(None);
        }
        Ok(false) => true,
        Err(e) => {
            warn!(tenant = %authorized.tenant, error = %e, "Replay store unavailable, proceeding");
            false
        }
    };

    let scopes = match authorized.payload.fingerprint() {
        Some(fingerprint) => {
            state
                .limiter
                .request_scopes(authorized.tenant, &envelope.client_ip, fingerprint)
        }
        None => {
            let limits = state.limiter.limits();
            vec![
                Scope::ip(&envelope.client_ip, limits.per_ip),
                Scope::tenant_ip(authorized.tenant, &envelope.client_ip, limits.per_tenant_ip),
            ]
        }
    };
    if let Err(e) = state.limiter.check_all(&scopes, now).await {
        if recorded {
            release(state, &authorized.replay_key).await;
        }
        return Err(e.into());
    }

    Ok(Some(Admitted {
        envelope,
        authorized,
        now,
    }))
}

/// Drop the replay marker of an envelope that was not accepted.
async fn release(state: &AppContext, replay_key: &str) {
    if let Err(e) = state.replay.forget(replay_key).await {
        warn!(error = %e, "Failed to release replay marker");
    }
}

/// Admit the envelope, then run `accept` on it. Errors from `accept` release
/// the replay marker.
async fn ingest<P, F, Fut>(
    state: &AppContext,
    headers: &HeaderMap,
    body: Bytes,
    accept: F,
) -> Result<Response, ApiError>
where
    P: IngressPayload + Fingerprinted,
    F: FnOnce(Admitted<P>) -> Fut,
    Fut: Future<Output = Result<Response, ApiError>>,
{
    let Some(admitted) = admit::<P>(state, headers, body).await? else {
        return Ok(response::noop());
    };
    let replay_key = admitted.authorized.replay_key.clone();
    let result = accept(admitted).await;
    if result.is_err() {
        release(state, &replay_key).await;
    }
    result
}

/// Client event id, or a digest of the signed body.
fn event_ref(event_id: Option<Uuid>, body: &[u8]) -> String {
    event_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| hex::encode(Sha256::digest(body)))
}

fn millis(value: Option<i64>, field: &str, fallback: DateTime<Utc>) -> Result<DateTime<Utc>, ApiError> {
    match value {
        None => Ok(fallback),
        Some(ms) => DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| ApiError::bad_request(format!("invalid body: {} out of range", field))),
    }
}

async fn enqueue(
    state: &AppContext,
    dedup_id: String,
    payload: JobPayload,
) -> Result<Response, ApiError> {
    let tenant: CanonicalTenantId = payload.tenant();
    let kind = payload.kind();
    let outcome = state.jobs.publish(JobEnvelope::new(dedup_id, payload)).await?;
    if outcome == PublishOutcome::Deduplicated {
        debug!(tenant = %tenant, kind, "Job already queued");
    }
    Ok(response::queued())
}

/// `POST /v1/call-event`
pub async fn call_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    ingest::<CallEventPayload, _, _>(&state, &headers, body, |admitted| {
        accept_call_event(&state, admitted)
    })
    .await
}

async fn accept_call_event(
    state: &AppContext,
    admitted: Admitted<CallEventPayload>,
) -> Result<Response, ApiError> {
    let Admitted {
        envelope,
        authorized,
        now,
    } = admitted;
    let tenant = authorized.tenant;
    let payload = authorized.payload;

    let session = state
        .sessions
        .find_session(tenant, &payload.fingerprint)
        .await?
        .filter(|session| session.analytics_consent);
    let Some(session) = session else {
        debug!(tenant = %tenant, "No consenting session, call event gated");
        return Ok(response::gated(&state.gate.config().skip_header));
    };

    let dedup_id = format!(
        "call:{}:{}",
        tenant,
        event_ref(payload.event_id, &envelope.body)
    );
    let job = JobPayload::CallEvent(CallEventJob {
        tenant,
        session_id: session.session_id,
        fingerprint: payload.fingerprint,
        lead_score: payload.lead_score,
        status: payload.status,
        intent_action: payload.action.as_str().to_string(),
        intent_target: payload.target,
        ad_context: payload.ad_context,
        click_ids: session.click_ids,
        click_time: session.click_time,
        event_id: payload.event_id,
        user_agent: envelope.user_agent,
        received_at: now,
    });
    enqueue(state, dedup_id, job).await
}

/// `POST /v1/events`
pub async fn sync_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    ingest::<SyncEventPayload, _, _>(&state, &headers, body, |admitted| {
        accept_sync_event(&state, admitted)
    })
    .await
}

async fn accept_sync_event(
    state: &AppContext,
    admitted: Admitted<SyncEventPayload>,
) -> Result<Response, ApiError> {
    let Admitted {
        envelope,
        authorized,
        now,
    } = admitted;
    let tenant = authorized.tenant;
    let payload = authorized.payload;

    let dedup_id = format!(
        "evt:{}:{}",
        tenant,
        event_ref(payload.event_id, &envelope.body)
    );
    let click_ids = payload.click_ids();
    let job = JobPayload::Sync(SyncEventJob {
        tenant,
        fingerprint: payload.fingerprint,
        event_name: payload.event_name,
        url: payload.url,
        session_id: payload.session_id,
        client_ts_ms: payload.client_ts,
        referrer: payload.referrer,
        user_agent: envelope.user_agent,
        click_ids,
        received_at: now,
    });
    enqueue(state, dedup_id, job).await
}

/// `POST /v1/stage`
pub async fn stage(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    ingest::<StagePayload, _, _>(&state, &headers, body, |admitted| {
        accept_stage(&state, admitted)
    })
    .await
}

async fn accept_stage(
    state: &AppContext,
    admitted: Admitted<StagePayload>,
) -> Result<Response, ApiError> {
    let Admitted {
        authorized, now, ..
    } = admitted;
    let tenant = authorized.tenant;
    let payload = authorized.payload;

    let signal_time = millis(payload.signal_time, "signal_time", now)?;
    let dedup_id = format!("stage:{}:{}:{}", tenant, payload.call_id, payload.gear);
    let job = JobPayload::Stage(StageJob {
        tenant,
        call_id: payload.call_id,
        gear: payload.gear,
        click_time: None,
        signal_time,
        click_ids: ClickIds::default(),
        currency: String::new(),
    });
    enqueue(state, dedup_id, job).await
}

/// `POST /v1/seal`
pub async fn seal(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    ingest::<SealPayload, _, _>(&state, &headers, body, |admitted| {
        accept_seal(&state, admitted)
    })
    .await
}

async fn accept_seal(
    state: &AppContext,
    admitted: Admitted<SealPayload>,
) -> Result<Response, ApiError> {
    let Admitted {
        authorized, now, ..
    } = admitted;
    let tenant = authorized.tenant;
    let payload = authorized.payload;

    let sealed_at = millis(payload.sealed_at, "sealed_at", now)?;
    let dedup_id = format!("seal:{}:{}", tenant, payload.sale_id);
    let click_ids = payload.click_ids();
    let job = JobPayload::Seal(SealJob {
        tenant,
        call_id: payload.call_id,
        sale_id: payload.sale_id,
        amount_cents: payload.amount_cents,
        currency: payload.currency,
        session_id: payload.session_id,
        click_ids,
        sealed_at,
    });
    enqueue(state, dedup_id, job).await
}
