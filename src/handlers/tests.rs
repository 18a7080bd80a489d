use super::*;

use axum::body::Body;
use axum::http::{header, Request};
use axum::response::Response;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tower::ServiceExt;
use uuid::Uuid;

use crate::bus::MockJobQueue;
use crate::config::{IngressConfig, RateLimitsConfig, TenantConfig, WindowLimit};
use crate::ingress::{
    sign, HmacSignatureVerifier, StaticTenantDirectory, FORWARDED_FOR_HEADER, SIGNATURE_HEADER,
    TENANT_HEADER, TIMESTAMP_HEADER,
};
use crate::model::{CanonicalTenantId, ClickIds, JobPayload, SessionInfo};
use crate::storage::memory::MemoryCounterStore;
use crate::storage::mock::{
    MockConversionQueue, MockObservationStore, MockSessionLookup, MockSignalStore,
};
use crate::utils::clock::FixedClock;

const SECRET: &str = "s3cret";
const SLUG: &str = "acme-dental";
const TOKEN: &str = "export-token";

struct Harness {
    app: Router,
    tenant: CanonicalTenantId,
    jobs: Arc<MockJobQueue>,
    sessions: Arc<MockSessionLookup>,
    counters: Arc<MemoryCounterStore>,
    now: DateTime<Utc>,
}

fn harness_with(rate_limits: RateLimitsConfig) -> Harness {
    let id = Uuid::new_v4();
    let tenants: Vec<TenantConfig> = vec![serde_json::from_value(serde_json::json!({
        "canonical_id": id,
        "public_id": SLUG,
        "signing_secret": SECRET,
    }))
    .unwrap()];
    let now = DateTime::from_timestamp(1_760_000_000, 0).unwrap();
    let directory = Arc::new(StaticTenantDirectory::from_tenants(&tenants));
    let jobs = Arc::new(MockJobQueue::new());
    let sessions = Arc::new(MockSessionLookup::new());
    let counters = Arc::new(MemoryCounterStore::new());
    let queue = Arc::new(MockConversionQueue::new());

    let state = Arc::new(AppContext {
        gate: SignedIngressGate::new(
            Arc::new(HmacSignatureVerifier::from_tenants(&tenants)),
            directory.clone(),
            IngressConfig::default(),
        ),
        limiter: RateLimiter::new(counters.clone(), rate_limits),
        replay: counters.clone(),
        sessions: sessions.clone(),
        resolver: directory,
        jobs: jobs.clone(),
        export: ExportReader::new(
            queue,
            Arc::new(MockSignalStore::new()),
            Arc::new(MockObservationStore::new()),
            100,
        ),
        export_token: Some(TOKEN.to_string()),
        clock: Arc::new(FixedClock::new(now)),
    });

    Harness {
        app: router(state),
        tenant: CanonicalTenantId(id),
        jobs,
        sessions,
        counters,
        now,
    }
}

fn harness() -> Harness {
    harness_with(RateLimitsConfig::default())
}

impl Harness {
    async fn consenting_session(&self, fingerprint: &str, consent: bool) {
        self.sessions
            .insert(
                self.tenant,
                fingerprint,
                SessionInfo {
                    session_id: "sess-1".to_string(),
                    analytics_consent: consent,
                    click_ids: ClickIds {
                        gclid: Some("gclid-1".to_string()),
                        ..Default::default()
                    },
                    click_time: Some(self.now),
                },
            )
            .await;
    }

    fn signed(&self, path: &str, body: &str) -> Request<Body> {
        let timestamp = self.now.timestamp().to_string();
        let signature = sign(SECRET.as_bytes(), &timestamp, body.as_bytes()).unwrap();
        Request::builder()
            .method("POST")
            .uri(path)
            .header(TENANT_HEADER, SLUG)
            .header(TIMESTAMP_HEADER, timestamp)
            .header(SIGNATURE_HEADER, signature)
            .header(FORWARDED_FOR_HEADER, "203.0.113.7")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(&self, req: Request<Body>) -> Response {
        self.app.clone().oneshot(req).await.unwrap()
    }
}

fn call_body(fingerprint: &str, extra: &str) -> String {
    format!(
        r#"{{"site_id":"{}","fingerprint":"{}","action":"phone","target":"+4930123"{}}}"#,
        SLUG, fingerprint, extra
    )
}

async fn body_bytes(resp: Response) -> Bytes {
    axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap()
}

async fn body_json(resp: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(resp).await).unwrap()
}

#[tokio::test]
async fn test_health() {
    let h = harness();
    let resp = h
        .send(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_call_event_with_consent_is_queued() {
    let h = harness();
    h.consenting_session("fp-1", true).await;

    let resp = h.send(h.signed("/v1/call-event", &call_body("fp-1", ""))).await;

    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(resp).await["status"], "queued");
    let published = h.jobs.take_published().await;
    assert_eq!(published.len(), 1);
    match &published[0].payload {
        JobPayload::CallEvent(job) => {
            assert_eq!(job.tenant, h.tenant);
            assert_eq!(job.session_id, "sess-1");
            assert_eq!(job.click_ids.gclid.as_deref(), Some("gclid-1"));
            assert_eq!(job.intent_action, "phone");
            assert_eq!(job.received_at, h.now);
        }
        other => panic!("unexpected job {:?}", other),
    }
    assert!(published[0].dedup_id.starts_with(&format!("call:{}:", h.tenant)));
}

#[tokio::test]
async fn test_no_session_and_no_consent_are_indistinguishable() {
    let h = harness();
    h.consenting_session("fp-denied", false).await;

    let missing = h.send(h.signed("/v1/call-event", &call_body("fp-none", ""))).await;
    let denied = h
        .send(h.signed("/v1/call-event", &call_body("fp-denied", "")))
        .await;

    assert_eq!(missing.status(), StatusCode::NO_CONTENT);
    assert_eq!(denied.status(), StatusCode::NO_CONTENT);
    assert_eq!(missing.headers(), denied.headers());
    assert!(body_bytes(missing).await.is_empty());
    assert!(body_bytes(denied).await.is_empty());
    assert_eq!(h.jobs.published_count().await, 0);
}

#[tokio::test]
async fn test_replayed_envelope_is_noop() {
    let h = harness();
    h.consenting_session("fp-1", true).await;
    let body = call_body("fp-1", "");

    let first = h.send(h.signed("/v1/call-event", &body)).await;
    let second = h.send(h.signed("/v1/call-event", &body)).await;

    assert_eq!(first.status(), StatusCode::ACCEPTED);
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(body_json(second).await["status"], "noop");
    assert_eq!(h.jobs.published_count().await, 1);
}

#[tokio::test]
async fn test_bad_signature_is_bare_401() {
    let h = harness();
    let mut req = h.signed("/v1/call-event", &call_body("fp-1", ""));
    req.headers_mut()
        .insert(SIGNATURE_HEADER, "00".repeat(32).parse().unwrap());

    let resp = h.send(req).await;

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(resp).await, serde_json::json!({"error": "unauthorized"}));
}

#[tokio::test]
async fn test_repeated_auth_failures_answer_429() {
    let h = harness_with(RateLimitsConfig {
        auth_failures: WindowLimit::new(2, 60_000),
        ..Default::default()
    });
    let unsigned = || {
        Request::builder()
            .method("POST")
            .uri("/v1/call-event")
            .header(FORWARDED_FOR_HEADER, "198.51.100.9")
            .body(Body::from(call_body("fp-1", "")))
            .unwrap()
    };

    assert_eq!(h.send(unsigned()).await.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(h.send(unsigned()).await.status(), StatusCode::UNAUTHORIZED);
    let resp = h.send(unsigned()).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(resp.headers().contains_key(header::RETRY_AFTER));
}

#[tokio::test]
async fn test_forbidden_consent_field_rejected_with_hint() {
    let h = harness();
    h.consenting_session("fp-1", true).await;

    let resp = h
        .send(h.signed(
            "/v1/call-event",
            &call_body("fp-1", r#","analytics_consent":true"#),
        ))
        .await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["error"], "forbidden field: analytics_consent");
    assert!(body["hint"].is_string());
}

#[tokio::test]
async fn test_counter_store_down_degrades_and_still_queues() {
    let h = harness();
    h.consenting_session("fp-1", true).await;
    h.counters.set_unavailable(true).await;

    let resp = h.send(h.signed("/v1/call-event", &call_body("fp-1", ""))).await;

    assert_eq!(resp.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_stage_and_seal_are_queued() {
    let h = harness();
    let call_id = Uuid::new_v4();

    let stage = h
        .send(h.signed(
            "/v1/stage",
            &format!(r#"{{"site_id":"{}","call_id":"{}","gear":"V3"}}"#, SLUG, call_id),
        ))
        .await;
    let seal = h
        .send(h.signed(
            "/v1/seal",
            &format!(
                r#"{{"site_id":"{}","sale_id":"S-1","call_id":"{}","amount_cents":7500,"currency":"EUR"}}"#,
                SLUG, call_id
            ),
        ))
        .await;

    assert_eq!(stage.status(), StatusCode::ACCEPTED);
    assert_eq!(seal.status(), StatusCode::ACCEPTED);
    let published = h.jobs.take_published().await;
    assert_eq!(published.len(), 2);
    assert_eq!(
        published[0].dedup_id,
        format!("stage:{}:{}:V3", h.tenant, call_id)
    );
    match &published[1].payload {
        JobPayload::Seal(job) => {
            assert_eq!(job.amount_cents, 7500);
            assert_eq!(job.sealed_at, h.now);
        }
        other => panic!("unexpected job {:?}", other),
    }
}

#[tokio::test]
async fn test_publish_failure_is_500() {
    let h = harness();
    h.jobs.set_fail_on_publish(true).await;

    let resp = h
        .send(h.signed(
            "/v1/events",
            &format!(
                r#"{{"site_id":"{}","fingerprint":"fp-1","event_name":"page_view"}}"#,
                SLUG
            ),
        ))
        .await;

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(resp).await["error"], "internal error");
}

fn sync_body(event_name: &str) -> String {
    format!(
        r#"{{"site_id":"{}","fingerprint":"fp-1","event_name":"{}"}}"#,
        SLUG, event_name
    )
}

#[tokio::test]
async fn test_retry_after_publish_failure_is_processed() {
    let h = harness();
    let body = sync_body("page_view");
    h.jobs.set_fail_on_publish(true).await;

    let failed = h.send(h.signed("/v1/events", &body)).await;
    assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);

    h.jobs.set_fail_on_publish(false).await;
    let retried = h.send(h.signed("/v1/events", &body)).await;

    assert_eq!(retried.status(), StatusCode::ACCEPTED);
    assert_eq!(h.jobs.published_count().await, 1);

    let replayed = h.send(h.signed("/v1/events", &body)).await;
    assert_eq!(body_json(replayed).await["status"], "noop");
}

#[tokio::test]
async fn test_rate_limited_envelope_is_not_marked_replayed() {
    let h = harness_with(RateLimitsConfig {
        per_ip: WindowLimit::new(1, 60_000),
        ..Default::default()
    });
    let first = sync_body("page_view");
    let second = sync_body("form_submit");

    assert_eq!(
        h.send(h.signed("/v1/events", &first)).await.status(),
        StatusCode::ACCEPTED
    );
    assert_eq!(
        h.send(h.signed("/v1/events", &second)).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    // Still limited, not swallowed as a replay of the rejected envelope.
    assert_eq!(
        h.send(h.signed("/v1/events", &second)).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(h.jobs.published_count().await, 1);
}

#[tokio::test]
async fn test_gated_call_event_keeps_replay_marker() {
    let h = harness();
    let body = call_body("fp-unknown", "");

    let first = h.send(h.signed("/v1/call-event", &body)).await;
    let second = h.send(h.signed("/v1/call-event", &body)).await;

    assert_eq!(first.status(), StatusCode::NO_CONTENT);
    assert_eq!(second.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_export_requires_bearer_token() {
    let h = harness();
    let uri = format!("/v1/export?site_id={}", SLUG);

    let missing = h
        .send(Request::builder().uri(&uri).body(Body::empty()).unwrap())
        .await;
    let wrong = h
        .send(
            Request::builder()
                .uri(&uri)
                .header(header::AUTHORIZATION, "Bearer nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_export_resolves_site_and_lists_items() {
    let h = harness();

    let resp = h
        .send(
            Request::builder()
                .uri(format!("/v1/export?site_id={}", SLUG))
                .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["site_id"], h.tenant.to_string());
    assert_eq!(body["items"], serde_json::json!([]));
}

#[tokio::test]
async fn test_export_unknown_site_is_404() {
    let h = harness();

    let resp = h
        .send(
            Request::builder()
                .uri("/v1/export?site_id=unknown-site")
                .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
