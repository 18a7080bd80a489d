//! End-to-end: signed HTTP ingress through the job queue, worker, valuation
//! and export, on in-memory stores.

mod common;

use axum::http::StatusCode;
use uuid::Uuid;

use callsignal::export::ExportSummary;
use callsignal::interfaces::{ConversionQueue, DomainStore, JobOutbox, MarketingSignalStore};
use callsignal::model::{Gear, QueueStatus};

use common::{body_json, eventually, spawn_app, SLUG};

fn call_body(fingerprint: &str, event_id: Uuid) -> String {
    format!(
        r#"{{"site_id":"{}","fingerprint":"{}","event_id":"{}","action":"phone","target":"+4930123"}}"#,
        SLUG, fingerprint, event_id
    )
}

#[tokio::test]
async fn test_gated_responses_are_identical() {
    let app = spawn_app().await;
    app.add_session("fp-denied", false, Some("gclid-1")).await;

    let no_session = app
        .send(app.signed("/v1/call-event", &call_body("fp-none", Uuid::new_v4())))
        .await;
    let no_consent = app
        .send(app.signed("/v1/call-event", &call_body("fp-denied", Uuid::new_v4())))
        .await;

    assert_eq!(no_session.status(), StatusCode::NO_CONTENT);
    assert_eq!(no_consent.status(), no_session.status());
    assert_eq!(no_consent.headers(), no_session.headers());
    app.stop();
}

#[tokio::test]
async fn test_call_event_produces_one_pulse() {
    let app = spawn_app().await;
    app.add_session("fp-1", true, Some("gclid-1")).await;
    let body = call_body("fp-1", Uuid::new_v4());

    let first = app.send(app.signed("/v1/call-event", &body)).await;
    let replay = app.send(app.signed("/v1/call-event", &body)).await;

    assert_eq!(first.status(), StatusCode::ACCEPTED);
    assert_eq!(replay.status(), StatusCode::OK);
    assert_eq!(body_json(replay).await["status"], "noop");

    let signals = app.runtime.stores().signals.clone();
    let tenant = app.tenant;
    assert!(
        eventually(|| {
            let signals = signals.clone();
            async move { signals.list_pending(tenant, 10).await.unwrap().len() == 1 }
        })
        .await,
        "worker should record one V2 signal"
    );
    let pending = signals.list_pending(tenant, 10).await.unwrap();
    assert_eq!(pending[0].gear, Gear::V2);
    assert_eq!(pending[0].click_chain.as_deref(), Some("gclid-1"));
    assert!(pending[0].value_cents > 0);

    let outbox = app.runtime.stores().outbox.clone();
    let later = chrono::Utc::now() + chrono::Duration::days(1);
    assert!(
        eventually(|| {
            let outbox = outbox.clone();
            async move { outbox.list_unacked(later, 10).await.unwrap().is_empty() }
        })
        .await,
        "handled jobs should leave the outbox"
    );
    app.stop();
}

#[tokio::test]
async fn test_stage_after_call_is_valued() {
    let app = spawn_app().await;
    app.add_session("fp-2", true, Some("gclid-2")).await;
    let call_id = Uuid::new_v4();

    let call = app
        .send(app.signed("/v1/call-event", &call_body("fp-2", call_id)))
        .await;
    assert_eq!(call.status(), StatusCode::ACCEPTED);

    let domain = app.runtime.stores().domain.clone();
    assert!(
        eventually(|| {
            let domain = domain.clone();
            async move { domain.get_call(call_id).await.unwrap().is_some() }
        })
        .await,
        "call record should be stored under the client event id"
    );

    let stage = app
        .send(app.signed(
            "/v1/stage",
            &format!(r#"{{"site_id":"{}","call_id":"{}","gear":"V3"}}"#, SLUG, call_id),
        ))
        .await;
    assert_eq!(stage.status(), StatusCode::ACCEPTED);

    let signals = app.runtime.stores().signals.clone();
    let tenant = app.tenant;
    assert!(
        eventually(|| {
            let signals = signals.clone();
            async move {
                signals
                    .list_pending(tenant, 10)
                    .await
                    .unwrap()
                    .iter()
                    .any(|s| s.gear == Gear::V3 && s.call_id == Some(call_id))
            }
        })
        .await
    );
    app.stop();
}

#[tokio::test]
async fn test_sealed_sale_is_queued_exported_and_uploaded() {
    let app = spawn_app().await;
    let seal = app
        .send(app.signed(
            "/v1/seal",
            &format!(
                r#"{{"site_id":"{}","sale_id":"S-100","amount_cents":7500,"currency":"EUR","gclid":"gclid-9"}}"#,
                SLUG
            ),
        ))
        .await;
    assert_eq!(seal.status(), StatusCode::ACCEPTED);

    let queue = app.runtime.stores().queue.clone();
    let tenant = app.tenant;
    assert!(
        eventually(|| {
            let queue = queue.clone();
            async move {
                !queue
                    .list_for_site(tenant, &[QueueStatus::Queued], 10)
                    .await
                    .unwrap()
                    .is_empty()
            }
        })
        .await,
        "seal should land in the conversion queue"
    );
    let rows = queue
        .list_for_site(tenant, &[QueueStatus::Queued], 10)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value_cents, 7500);
    assert_eq!(rows[0].click_ids.gclid.as_deref(), Some("gclid-9"));

    let export = body_json(app.send(app.export_request(false)).await).await;
    let items = export["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], format!("seal:{}", rows[0].id));
    assert_eq!(items[0]["value_cents"], 7500);

    let summary = app.runtime.export_cycle().run_once().await.unwrap();
    assert_eq!(
        summary,
        ExportSummary {
            claimed: 1,
            completed: 1,
            ..Default::default()
        }
    );
    assert_eq!(app.adapter.uploaded.lock().await.len(), 1);
    assert_eq!(
        queue.get(rows[0].id).await.unwrap().unwrap().status,
        QueueStatus::Completed
    );
    app.stop();
}

#[tokio::test]
async fn test_export_read_marks_signals_processing() {
    let app = spawn_app().await;
    app.add_session("fp-3", true, Some("gclid-3")).await;
    app.send(app.signed("/v1/call-event", &call_body("fp-3", Uuid::new_v4())))
        .await;

    let signals = app.runtime.stores().signals.clone();
    let tenant = app.tenant;
    assert!(
        eventually(|| {
            let signals = signals.clone();
            async move { !signals.list_pending(tenant, 10).await.unwrap().is_empty() }
        })
        .await
    );

    let first = body_json(app.send(app.export_request(true)).await).await;
    let signal_items: Vec<_> = first["items"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|item| item["id"].as_str().unwrap().starts_with("signal:"))
        .cloned()
        .collect();
    assert_eq!(signal_items.len(), 1);
    assert_eq!(signal_items[0]["status"], "PROCESSING");
    assert_eq!(signal_items[0]["action"], "V2");

    assert!(signals.list_pending(tenant, 10).await.unwrap().is_empty());
    app.stop();
}
