//! Strict request bodies.
//!
//! Bodies are decoded in two passes. The first rejects consent-escalation
//! fields anywhere in the document; the second deserializes with
//! `deny_unknown_fields`, so any other unexpected key is also a hard 400.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::model::{AdContext, ClickIds, Gear};

/// Keys that would let an edge client assert consent on its own.
pub const FORBIDDEN_FIELDS: &[&str] = &[
    "consent",
    "consent_scopes",
    "analytics_consent",
    "marketing_consent",
];

pub const CONSENT_HINT: &str = "consent is read from the matched session and cannot be set by the client";

const MAX_FINGERPRINT_LEN: usize = 128;
const MAX_TARGET_LEN: usize = 64;
const MAX_EVENT_NAME_LEN: usize = 64;
const MAX_URL_LEN: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("Forbidden field {0}")]
    Forbidden(String),

    #[error("Invalid body: {0}")]
    Invalid(String),
}

/// A body accepted by the signed ingress.
pub trait IngressPayload: DeserializeOwned + Send {
    /// Tenant identifier carried in the body.
    fn site_id(&self) -> &str;

    fn event_id(&self) -> Option<Uuid>;

    /// Semantic checks beyond the schema.
    fn validate(&self) -> Result<(), String>;
}

/// Decode and validate `body` as `P`.
pub fn decode<P: IngressPayload>(body: &[u8]) -> Result<P, PayloadError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| PayloadError::Invalid(e.to_string()))?;
    if !value.is_object() {
        return Err(PayloadError::Invalid("body must be a JSON object".to_string()));
    }
    if let Some(field) = find_forbidden(&value) {
        return Err(PayloadError::Forbidden(field));
    }
    let payload: P =
        serde_json::from_value(value).map_err(|e| PayloadError::Invalid(e.to_string()))?;
    payload.validate().map_err(PayloadError::Invalid)?;
    Ok(payload)
}

fn find_forbidden(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => map.iter().find_map(|(key, nested)| {
            if FORBIDDEN_FIELDS.contains(&key.as_str()) {
                Some(key.clone())
            } else {
                find_forbidden(nested)
            }
        }),
        Value::Array(items) => items.iter().find_map(find_forbidden),
        _ => None,
    }
}

fn check_fingerprint(fingerprint: &str) -> Result<(), String> {
    if fingerprint.trim().is_empty() || fingerprint.len() > MAX_FINGERPRINT_LEN {
        return Err("fingerprint must be 1-128 characters".to_string());
    }
    Ok(())
}

fn check_url(url: Option<&str>) -> Result<(), String> {
    match url {
        Some(url) if url.len() > MAX_URL_LEN => Err("url too long".to_string()),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentAction {
    Phone,
    Whatsapp,
}

impl IntentAction {
    pub fn as_str(self) -> &'static str {
        match self {
            IntentAction::Phone => "phone",
            IntentAction::Whatsapp => "whatsapp",
        }
    }
}

/// `POST /v1/call-event`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallEventPayload {
    pub site_id: String,
    pub fingerprint: String,
    #[serde(default)]
    pub event_id: Option<Uuid>,
    pub action: IntentAction,
    /// Phone number or contact handle.
    pub target: String,
    #[serde(default)]
    pub ad_context: Option<AdContext>,
    #[serde(default)]
    pub lead_score: Option<i32>,
    #[serde(default)]
    pub status: Option<String>,
}

impl IngressPayload for CallEventPayload {
    fn site_id(&self) -> &str {
        &self.site_id
    }

    fn event_id(&self) -> Option<Uuid> {
        self.event_id
    }

    fn validate(&self) -> Result<(), String> {
        check_fingerprint(&self.fingerprint)?;
        if self.target.trim().is_empty() || self.target.len() > MAX_TARGET_LEN {
            return Err("target must be 1-64 characters".to_string());
        }
        if matches!(self.lead_score, Some(score) if !(0..=100).contains(&score)) {
            return Err("lead_score must be between 0 and 100".to_string());
        }
        Ok(())
    }
}

/// `POST /v1/events`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncEventPayload {
    pub site_id: String,
    pub fingerprint: String,
    #[serde(default)]
    pub event_id: Option<Uuid>,
    pub event_name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Client clock in epoch milliseconds.
    #[serde(default)]
    pub client_ts: Option<i64>,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub gclid: Option<String>,
    #[serde(default)]
    pub wbraid: Option<String>,
    #[serde(default)]
    pub gbraid: Option<String>,
}

impl SyncEventPayload {
    pub fn click_ids(&self) -> ClickIds {
        ClickIds {
            gclid: self.gclid.clone(),
            wbraid: self.wbraid.clone(),
            gbraid: self.gbraid.clone(),
        }
    }
}

impl IngressPayload for SyncEventPayload {
    fn site_id(&self) -> &str {
        &self.site_id
    }

    fn event_id(&self) -> Option<Uuid> {
        self.event_id
    }

    fn validate(&self) -> Result<(), String> {
        check_fingerprint(&self.fingerprint)?;
        let name_ok = !self.event_name.is_empty()
            && self.event_name.len() <= MAX_EVENT_NAME_LEN
            && self
                .event_name
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
        if !name_ok {
            return Err("event_name must be 1-64 of [a-z0-9_]".to_string());
        }
        check_url(self.url.as_deref())?;
        check_url(self.referrer.as_deref())
    }
}

/// `POST /v1/stage`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StagePayload {
    pub site_id: String,
    pub call_id: Uuid,
    pub gear: Gear,
    #[serde(default)]
    pub event_id: Option<Uuid>,
    /// Epoch milliseconds; defaults to receipt time.
    #[serde(default)]
    pub signal_time: Option<i64>,
}

impl IngressPayload for StagePayload {
    fn site_id(&self) -> &str {
        &self.site_id
    }

    fn event_id(&self) -> Option<Uuid> {
        self.event_id
    }

    fn validate(&self) -> Result<(), String> {
        match self.gear {
            Gear::V3 | Gear::V4 => Ok(()),
            other => Err(format!("gear {} cannot be staged", other)),
        }
    }
}

/// `POST /v1/seal`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SealPayload {
    pub site_id: String,
    pub sale_id: String,
    #[serde(default)]
    pub call_id: Option<Uuid>,
    pub amount_cents: i64,
    pub currency: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub gclid: Option<String>,
    #[serde(default)]
    pub wbraid: Option<String>,
    #[serde(default)]
    pub gbraid: Option<String>,
    /// Epoch milliseconds; defaults to receipt time.
    #[serde(default)]
    pub sealed_at: Option<i64>,
    #[serde(default)]
    pub event_id: Option<Uuid>,
}

impl SealPayload {
    pub fn click_ids(&self) -> ClickIds {
        ClickIds {
            gclid: self.gclid.clone(),
            wbraid: self.wbraid.clone(),
            gbraid: self.gbraid.clone(),
        }
    }
}

impl IngressPayload for SealPayload {
    fn site_id(&self) -> &str {
        &self.site_id
    }

    fn event_id(&self) -> Option<Uuid> {
        self.event_id
    }

    fn validate(&self) -> Result<(), String> {
        if self.sale_id.trim().is_empty() || self.sale_id.len() > MAX_TARGET_LEN {
            return Err("sale_id must be 1-64 characters".to_string());
        }
        if self.amount_cents < 0 {
            return Err("amount_cents must be non-negative".to_string());
        }
        if self.currency.len() != 3 || !self.currency.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err("currency must be an ISO 4217 code".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call_body(extra: Value) -> Vec<u8> {
        let mut body = json!({
            "site_id": "acme-dental",
            "fingerprint": "fp-1",
            "action": "phone",
            "target": "+49301234567",
            "ad_context": {"keyword": "dentist", "match_type": "exact"}
        });
        if let (Some(map), Value::Object(extra)) = (body.as_object_mut(), extra) {
            map.extend(extra);
        }
        serde_json::to_vec(&body).unwrap()
    }

    #[test]
    fn test_call_event_decodes() {
        let payload: CallEventPayload = decode(&call_body(json!({}))).unwrap();
        assert_eq!(payload.action, IntentAction::Phone);
        assert_eq!(payload.ad_context.unwrap().keyword.as_deref(), Some("dentist"));
    }

    #[test]
    fn test_forbidden_consent_field_rejected() {
        let err = decode::<CallEventPayload>(&call_body(json!({"analytics_consent": true})))
            .unwrap_err();
        assert_eq!(err, PayloadError::Forbidden("analytics_consent".to_string()));
    }

    #[test]
    fn test_nested_forbidden_field_rejected() {
        let body = call_body(json!({"ad_context": {"consent": "granted"}}));
        assert!(matches!(
            decode::<CallEventPayload>(&body),
            Err(PayloadError::Forbidden(_))
        ));
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(matches!(
            decode::<CallEventPayload>(&call_body(json!({"priority": 1}))),
            Err(PayloadError::Invalid(_))
        ));
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(decode::<CallEventPayload>(b"[]").is_err());
        assert!(decode::<CallEventPayload>(b"not json").is_err());
    }

    #[test]
    fn test_stage_only_accepts_v3_v4() {
        let body = json!({"site_id": "acme", "call_id": Uuid::new_v4(), "gear": "V2"});
        assert!(decode::<StagePayload>(&serde_json::to_vec(&body).unwrap()).is_err());
        let body = json!({"site_id": "acme", "call_id": Uuid::new_v4(), "gear": "V4"});
        assert!(decode::<StagePayload>(&serde_json::to_vec(&body).unwrap()).is_ok());
    }

    #[test]
    fn test_seal_validation() {
        let ok = json!({"site_id": "acme", "sale_id": "s-1", "amount_cents": 7500, "currency": "EUR"});
        assert!(decode::<SealPayload>(&serde_json::to_vec(&ok).unwrap()).is_ok());

        let negative = json!({"site_id": "acme", "sale_id": "s-1", "amount_cents": -1, "currency": "EUR"});
        assert!(decode::<SealPayload>(&serde_json::to_vec(&negative).unwrap()).is_err());

        let currency = json!({"site_id": "acme", "sale_id": "s-1", "amount_cents": 1, "currency": "eur"});
        assert!(decode::<SealPayload>(&serde_json::to_vec(&currency).unwrap()).is_err());
    }

    #[test]
    fn test_sync_event_name_shape() {
        let bad = json!({"site_id": "acme", "fingerprint": "fp", "event_name": "Page View"});
        assert!(decode::<SyncEventPayload>(&serde_json::to_vec(&bad).unwrap()).is_err());
    }
}
