//! Deterministic idempotency key derivation.
//!
//! Keys are SHA-256 over the identifying parts, each terminated by a NUL byte
//! so adjacent parts can never run together.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::model::CanonicalTenantId;

/// v1 bucket width.
pub const V1_BUCKET_MS: i64 = 5_000;
/// Heartbeat bucket width.
pub const HEARTBEAT_BUCKET_MS: i64 = 10_000;
/// Page view bucket width.
pub const PAGE_VIEW_BUCKET_MS: i64 = 2_000;
/// Bucket width for event names without a dedicated rule.
pub const DEFAULT_BUCKET_MS: i64 = 5_000;
/// A client timestamp further than this from server time is ignored.
pub const CLIENT_SKEW_LIMIT_MS: i64 = 5 * 60 * 1000;

/// Prefix carried by v2 keys.
pub const V2_PREFIX: &str = "v2:";

/// How an event name is bucketed under v2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucketing {
    /// Floor to a multiple of the width in milliseconds.
    Window(i64),
    /// Exact server milliseconds. Client timestamps are never consulted.
    Exact,
}

impl Bucketing {
    pub fn for_event(event_name: &str) -> Self {
        let name = event_name.trim().to_ascii_lowercase();
        match name.as_str() {
            "heartbeat" | "ping" => Bucketing::Window(HEARTBEAT_BUCKET_MS),
            "page_view" | "pageview" => Bucketing::Window(PAGE_VIEW_BUCKET_MS),
            "click" | "call_intent" | "phone_click" | "whatsapp_click" => Bucketing::Exact,
            _ if name.ends_with("_click") || name.ends_with("_intent") => Bucketing::Exact,
            _ => Bucketing::Window(DEFAULT_BUCKET_MS),
        }
    }
}

/// The values a key is derived from.
#[derive(Debug, Clone, Copy)]
pub struct KeyInput<'a> {
    pub tenant: CanonicalTenantId,
    pub event_name: &'a str,
    pub url: Option<&'a str>,
    pub fingerprint: &'a str,
    pub server_time: DateTime<Utc>,
    pub client_time: Option<DateTime<Utc>>,
}

fn floor_to(ms: i64, width: i64) -> i64 {
    ms.div_euclid(width) * width
}

fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Fixed-width, unprefixed hex over a 5 s server-time bucket.
pub fn v1_key(input: &KeyInput<'_>) -> String {
    let bucket = floor_to(input.server_time.timestamp_millis(), V1_BUCKET_MS).to_string();
    let tenant = input.tenant.to_string();
    digest(&[
        &tenant,
        input.event_name,
        input.url.unwrap_or_default(),
        input.fingerprint,
        &bucket,
    ])
}

/// Time component of a v2 key.
pub fn v2_bucket(input: &KeyInput<'_>) -> i64 {
    let server_ms = input.server_time.timestamp_millis();
    match Bucketing::for_event(input.event_name) {
        Bucketing::Exact => server_ms,
        Bucketing::Window(width) => {
            let reference = input
                .client_time
                .map(|t| t.timestamp_millis())
                .filter(|client_ms| (client_ms - server_ms).abs() <= CLIENT_SKEW_LIMIT_MS)
                .unwrap_or(server_ms);
            floor_to(reference, width)
        }
    }
}

/// `"v2:"` + hex over per-event-type buckets.
pub fn v2_key(input: &KeyInput<'_>) -> String {
    let bucket = v2_bucket(input).to_string();
    let tenant = input.tenant.to_string();
    let hash = digest(&[
        &tenant,
        input.event_name,
        input.url.unwrap_or_default(),
        input.fingerprint,
        &bucket,
    ]);
    format!("{}{}", V2_PREFIX, hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    fn input(event_name: &'static str, server_ms: i64) -> KeyInput<'static> {
        KeyInput {
            tenant: CanonicalTenantId(Uuid::from_u128(42)),
            event_name,
            url: Some("https://example.com/contact"),
            fingerprint: "fp-1",
            server_time: at(server_ms),
            client_time: None,
        }
    }

    #[test]
    fn test_v1_is_deterministic_and_fixed_width() {
        let a = v1_key(&input("page_view", 1_700_000_001_000));
        let b = v1_key(&input("page_view", 1_700_000_001_000));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_v1_any_input_change_changes_key() {
        let base = input("page_view", 1_700_000_001_000);
        let key = v1_key(&base);

        let mut other_tenant = base;
        other_tenant.tenant = CanonicalTenantId(Uuid::from_u128(43));
        let mut other_url = base;
        other_url.url = Some("https://example.com/");
        let mut other_fp = base;
        other_fp.fingerprint = "fp-2";
        let mut other_bucket = base;
        other_bucket.server_time = at(1_700_000_006_000);

        for changed in [
            v1_key(&other_tenant),
            v1_key(&input("heartbeat", 1_700_000_001_000)),
            v1_key(&other_url),
            v1_key(&other_fp),
            v1_key(&other_bucket),
        ] {
            assert_ne!(changed, key);
        }
    }

    #[test]
    fn test_parts_do_not_run_together() {
        let mut a = input("page_view", 0);
        a.url = Some("ab");
        a.fingerprint = "c";
        let mut b = a;
        b.url = Some("a");
        b.fingerprint = "bc";
        assert_ne!(v2_key(&a), v2_key(&b));
    }

    #[test]
    fn test_v2_prefix() {
        let key = v2_key(&input("page_view", 0));
        assert!(key.starts_with("v2:"));
        assert_eq!(key.len(), 3 + 64);
    }

    #[test]
    fn test_heartbeat_buckets() {
        let base = 1_700_000_000_000;
        assert_eq!(
            v2_key(&input("heartbeat", base)),
            v2_key(&input("heartbeat", base + 5_000))
        );
        assert_ne!(
            v2_key(&input("heartbeat", base)),
            v2_key(&input("heartbeat", base + 15_000))
        );
    }

    #[test]
    fn test_page_view_buckets() {
        let base = 1_700_000_000_000;
        assert_eq!(
            v2_key(&input("page_view", base)),
            v2_key(&input("page_view", base + 1_000))
        );
        assert_ne!(
            v2_key(&input("page_view", base)),
            v2_key(&input("page_view", base + 3_000))
        );
    }

    #[test]
    fn test_clicks_with_different_server_times_differ() {
        let base = 1_700_000_000_000;
        assert_ne!(
            v2_key(&input("phone_click", base)),
            v2_key(&input("phone_click", base + 1))
        );
    }

    #[test]
    fn test_click_keys_ignore_client_timestamp() {
        let base = 1_700_000_000_000;
        let mut a = input("whatsapp_click", base);
        a.client_time = Some(at(base - 1_000));
        let mut b = input("whatsapp_click", base);
        b.client_time = Some(at(base - 60_000));
        assert_eq!(v2_key(&a), v2_key(&b));
        assert_eq!(v2_bucket(&a), base);
    }

    #[test]
    fn test_client_timestamp_within_skew_picks_bucket() {
        let server = 1_700_000_000_000;
        let mut with_client = input("page_view", server);
        with_client.client_time = Some(at(server - 60_000));
        assert_eq!(v2_bucket(&with_client), server - 60_000);
    }

    #[test]
    fn test_client_timestamp_outside_skew_is_clamped() {
        let server = 1_700_000_000_000;
        let mut skewed = input("page_view", server);
        skewed.client_time = Some(at(server - CLIENT_SKEW_LIMIT_MS - 1));
        assert_eq!(v2_bucket(&skewed), server);
    }

    #[test]
    fn test_bucketing_rules() {
        assert_eq!(Bucketing::for_event("ping"), Bucketing::Window(10_000));
        assert_eq!(Bucketing::for_event("PageView"), Bucketing::Window(2_000));
        assert_eq!(Bucketing::for_event("email_click"), Bucketing::Exact);
        assert_eq!(Bucketing::for_event("scroll"), Bucketing::Window(5_000));
    }
}
