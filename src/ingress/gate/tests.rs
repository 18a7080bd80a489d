use super::*;
use crate::config::TenantConfig;
use crate::ingress::payload::CallEventPayload;
use crate::ingress::verifier::{sign, HmacSignatureVerifier};
use crate::ingress::StaticTenantDirectory;
use bytes::Bytes;
use uuid::Uuid;

const SECRET: &str = "s3cret";
const SLUG: &str = "acme-dental";

struct Fixture {
    gate: SignedIngressGate,
    tenant: CanonicalTenantId,
    now: DateTime<Utc>,
}

fn fixture(config: IngressConfig) -> Fixture {
    let id = Uuid::new_v4();
    let tenants: Vec<TenantConfig> = vec![serde_json::from_value(serde_json::json!({
        "canonical_id": id,
        "public_id": SLUG,
        "signing_secret": SECRET,
    }))
    .unwrap()];
    let gate = SignedIngressGate::new(
        Arc::new(HmacSignatureVerifier::from_tenants(&tenants)),
        Arc::new(StaticTenantDirectory::from_tenants(&tenants)),
        config,
    );
    Fixture {
        gate,
        tenant: CanonicalTenantId(id),
        now: DateTime::from_timestamp(1_760_000_000, 0).unwrap(),
    }
}

fn body(site_id: &str, extra: &str) -> Vec<u8> {
    format!(
        r#"{{"site_id":"{}","fingerprint":"fp-1","action":"phone","target":"+4930123"{}}}"#,
        site_id, extra
    )
    .into_bytes()
}

fn signed(tenant: &str, ts: i64, body: Vec<u8>) -> Envelope {
    let timestamp = ts.to_string();
    let signature = sign(SECRET.as_bytes(), &timestamp, &body).unwrap();
    Envelope {
        tenant: Some(tenant.to_string()),
        timestamp: Some(timestamp),
        signature: Some(signature),
        body: Bytes::from(body),
        client_ip: "203.0.113.7".to_string(),
        user_agent: None,
    }
}

async fn authorize(f: &Fixture, envelope: &Envelope) -> Result<Authorized<CallEventPayload>, GateRejection> {
    f.gate.authorize::<CallEventPayload>(envelope, f.now).await
}

#[tokio::test]
async fn test_signed_request_authorized() {
    let f = fixture(IngressConfig::default());
    let envelope = signed(SLUG, f.now.timestamp(), body(SLUG, ""));
    let authorized = authorize(&f, &envelope).await.unwrap();
    assert_eq!(authorized.tenant, f.tenant);
    assert!(authorized.replay_key.contains(":sig:"));
}

#[tokio::test]
async fn test_canonical_body_binds_to_slug_header() {
    let f = fixture(IngressConfig::default());
    let envelope = signed(SLUG, f.now.timestamp(), body(&f.tenant.to_string(), ""));
    assert_eq!(authorize(&f, &envelope).await.unwrap().tenant, f.tenant);
}

#[tokio::test]
async fn test_event_id_keys_replay() {
    let f = fixture(IngressConfig::default());
    let event_id = Uuid::new_v4();
    let extra = format!(r#","event_id":"{}""#, event_id);
    let envelope = signed(SLUG, f.now.timestamp(), body(SLUG, &extra));
    let authorized = authorize(&f, &envelope).await.unwrap();
    assert!(authorized.replay_key.ends_with(&event_id.to_string()));
}

#[tokio::test]
async fn test_oversize_rejected_before_headers() {
    let f = fixture(IngressConfig::default());
    let mut envelope = signed(SLUG, f.now.timestamp(), vec![b' '; 65_537]);
    envelope.tenant = None;
    assert!(matches!(
        authorize(&f, &envelope).await,
        Err(GateRejection::PayloadTooLarge { limit: 65_536 })
    ));
}

#[tokio::test]
async fn test_malformed_headers_unauthorized() {
    let f = fixture(IngressConfig::default());
    let good = signed(SLUG, f.now.timestamp(), body(SLUG, ""));

    let mut missing = good.clone();
    missing.signature = None;
    assert!(matches!(authorize(&f, &missing).await, Err(GateRejection::Unauthorized(_))));

    let mut upper = good.clone();
    upper.signature = upper.signature.map(|s| s.to_uppercase());
    assert!(matches!(authorize(&f, &upper).await, Err(GateRejection::Unauthorized(_))));

    let mut bad_tenant = good.clone();
    bad_tenant.tenant = Some("Acme Dental".to_string());
    assert!(matches!(authorize(&f, &bad_tenant).await, Err(GateRejection::Unauthorized(_))));

    let mut short_ts = good;
    short_ts.timestamp = Some("12345".to_string());
    assert!(matches!(authorize(&f, &short_ts).await, Err(GateRejection::Unauthorized(_))));
}

#[tokio::test]
async fn test_timestamp_window() {
    let f = fixture(IngressConfig::default());
    let now = f.now.timestamp();

    assert!(authorize(&f, &signed(SLUG, now - 300, body(SLUG, ""))).await.is_ok());
    assert!(authorize(&f, &signed(SLUG, now + 60, body(SLUG, ""))).await.is_ok());
    assert_eq!(
        authorize(&f, &signed(SLUG, now - 301, body(SLUG, ""))).await.unwrap_err(),
        GateRejection::Unauthorized("timestamp too old")
    );
    assert_eq!(
        authorize(&f, &signed(SLUG, now + 61, body(SLUG, ""))).await.unwrap_err(),
        GateRejection::Unauthorized("timestamp in the future")
    );
}

#[tokio::test]
async fn test_signature_checked_before_body() {
    let f = fixture(IngressConfig::default());
    let mut envelope = signed(SLUG, f.now.timestamp(), body(SLUG, r#","consent":true"#));
    envelope.signature = Some("0".repeat(64));
    assert_eq!(
        authorize(&f, &envelope).await.unwrap_err(),
        GateRejection::Unauthorized("bad signature")
    );
}

#[tokio::test]
async fn test_forbidden_field_after_valid_signature() {
    let f = fixture(IngressConfig::default());
    let envelope = signed(SLUG, f.now.timestamp(), body(SLUG, r#","marketing_consent":true"#));
    let err = authorize(&f, &envelope).await.unwrap_err();
    assert_eq!(err, GateRejection::Forbidden("marketing_consent".to_string()));
    assert_eq!(err.class(), ErrorClass::Validation);
}

#[tokio::test]
async fn test_tenant_binding_mismatch() {
    let f = fixture(IngressConfig::default());
    let other = Uuid::new_v4().to_string();
    let envelope = signed(SLUG, f.now.timestamp(), body(&other, ""));
    assert!(matches!(authorize(&f, &envelope).await, Err(GateRejection::Unauthorized(_))));
}

#[tokio::test]
async fn test_kill_switch_skips_authentication() {
    let config = IngressConfig {
        verification_disabled: true,
        ..Default::default()
    };
    let f = fixture(config);
    let envelope = Envelope {
        tenant: None,
        timestamp: None,
        signature: None,
        body: Bytes::from(body(SLUG, "")),
        client_ip: "203.0.113.7".to_string(),
        user_agent: None,
    };
    assert_eq!(authorize(&f, &envelope).await.unwrap().tenant, f.tenant);

    // Body validation still applies.
    let forbidden = Envelope {
        body: Bytes::from(body(SLUG, r#","consent":true"#)),
        ..envelope
    };
    assert!(matches!(authorize(&f, &forbidden).await, Err(GateRejection::Forbidden(_))));
}
