//! Shared utilities for integration tests.
//!
//! Builds a full runtime on in-memory stores with a fixed clock and a
//! recording provider adapter, and signs requests the way a site edge does.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, Response};
use axum::Router;
use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tower::ServiceExt;
use uuid::Uuid;

use callsignal::config::{Config, TenantConfig};
use callsignal::ingress::{
    sign, FORWARDED_FOR_HEADER, SIGNATURE_HEADER, TENANT_HEADER, TIMESTAMP_HEADER,
};
use callsignal::model::{CanonicalTenantId, ClickIds, QueueRow, SessionInfo};
use callsignal::providers::{
    ProviderAdapter, ProviderCredentials, ProviderError, ProviderRegistry, UploadResult,
};
use callsignal::runtime::Runtime;
use callsignal::storage::mock::MockSessionLookup;
use callsignal::storage::Stores;
use callsignal::utils::clock::FixedClock;

pub const SECRET: &str = "edge-secret";
pub const SLUG: &str = "acme-dental";
pub const EXPORT_TOKEN: &str = "export-token";

/// Provider adapter that completes every row and remembers what it saw.
#[derive(Default)]
pub struct RecordingAdapter {
    pub uploaded: Mutex<Vec<QueueRow>>,
}

#[async_trait]
impl ProviderAdapter for RecordingAdapter {
    fn name(&self) -> &'static str {
        "google_ads"
    }

    async fn verify_credentials(&self, _credentials: &ProviderCredentials) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn upload_conversions(
        &self,
        jobs: &[QueueRow],
        _credentials: &ProviderCredentials,
    ) -> Result<Vec<UploadResult>, ProviderError> {
        self.uploaded.lock().await.extend_from_slice(jobs);
        Ok(jobs.iter().map(|job| UploadResult::completed(job.id)).collect())
    }
}

pub struct TestApp {
    pub runtime: Runtime,
    pub app: Router,
    pub tenant: CanonicalTenantId,
    pub sessions: Arc<MockSessionLookup>,
    pub adapter: Arc<RecordingAdapter>,
    pub now: DateTime<Utc>,
    shutdown: watch::Sender<bool>,
}

pub fn tenant_config(id: Uuid) -> TenantConfig {
    serde_json::from_value(serde_json::json!({
        "canonical_id": id,
        "public_id": SLUG,
        "signing_secret": SECRET,
        "aov_major": 1500.0,
        "currency": "EUR",
        "google_ads": {
            "customer_id": "1234567890",
            "developer_token": "dev-token",
            "client_id": "cid",
            "client_secret": "csecret",
            "refresh_token": "rtoken",
            "conversion_action": "customers/1234567890/conversionActions/1"
        }
    }))
    .expect("valid tenant config")
}

/// Start a runtime with job consumers running. The export loop stays off;
/// tests drive the export cycle directly.
pub async fn spawn_app() -> TestApp {
    let id = Uuid::new_v4();
    let now = DateTime::from_timestamp(1_760_000_000, 0).expect("valid timestamp");

    let mut config = Config::default();
    config.tenants.push(tenant_config(id));
    config.export.enabled = false;
    config.export.read_token = Some(EXPORT_TOKEN.to_string());
    config.worker.concurrency = 2;

    let sessions = Arc::new(MockSessionLookup::new());
    let mut stores = Stores::in_memory();
    stores.sessions = sessions.clone();

    let adapter = Arc::new(RecordingAdapter::default());
    let runtime = Runtime::builder()
        .with_config(config)
        .with_stores(stores)
        .with_clock(Arc::new(FixedClock::new(now)))
        .with_registry(ProviderRegistry::new().with(adapter.clone()))
        .build()
        .await
        .expect("runtime builds");

    let (shutdown, shutdown_rx) = watch::channel(false);
    runtime.start(shutdown_rx);

    TestApp {
        app: runtime.router(),
        runtime,
        tenant: CanonicalTenantId(id),
        sessions,
        adapter,
        now,
        shutdown,
    }
}

impl TestApp {
    pub async fn add_session(&self, fingerprint: &str, consent: bool, gclid: Option<&str>) {
        self.sessions
            .insert(
                self.tenant,
                fingerprint,
                SessionInfo {
                    session_id: format!("sess-{}", fingerprint),
                    analytics_consent: consent,
                    click_ids: ClickIds {
                        gclid: gclid.map(str::to_string),
                        ..Default::default()
                    },
                    click_time: Some(self.now),
                },
            )
            .await;
    }

    pub fn signed(&self, path: &str, body: &str) -> Request<Body> {
        let timestamp = self.now.timestamp().to_string();
        let signature = sign(SECRET.as_bytes(), &timestamp, body.as_bytes()).expect("sign");
        Request::builder()
            .method("POST")
            .uri(path)
            .header(TENANT_HEADER, SLUG)
            .header(TIMESTAMP_HEADER, timestamp)
            .header(SIGNATURE_HEADER, signature)
            .header(FORWARDED_FOR_HEADER, "203.0.113.7")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    pub fn export_request(&self, mark_processing: bool) -> Request<Body> {
        Request::builder()
            .uri(format!(
                "/v1/export?site_id={}&mark_processing={}",
                SLUG, mark_processing
            ))
            .header(header::AUTHORIZATION, format!("Bearer {}", EXPORT_TOKEN))
            .body(Body::empty())
            .expect("request")
    }

    pub async fn send(&self, req: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(req).await.expect("infallible")
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

pub async fn body_json(resp: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
