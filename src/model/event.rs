//! Edge events, call records and session context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tenant::CanonicalTenantId;

/// Free-form ad context attached to a call intent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdContext {
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub match_type: Option<String>,
    #[serde(default)]
    pub device_model: Option<String>,
    #[serde(default)]
    pub geo_target_id: Option<String>,
}

/// Which kind of click identifier a conversion is attributed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickIdKind {
    Gclid,
    Wbraid,
    Gbraid,
}

impl ClickIdKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ClickIdKind::Gclid => "gclid",
            ClickIdKind::Wbraid => "wbraid",
            ClickIdKind::Gbraid => "gbraid",
        }
    }
}

/// Provider-issued click identifiers. At most one is used per conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickIds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gclid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wbraid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gbraid: Option<String>,
}

impl ClickIds {
    /// The identifier to attribute through: gclid first, then wbraid, then gbraid.
    /// Blank values are ignored.
    pub fn primary(&self) -> Option<(ClickIdKind, &str)> {
        fn usable(v: &Option<String>) -> Option<&str> {
            v.as_deref().map(str::trim).filter(|s| !s.is_empty())
        }
        usable(&self.gclid)
            .map(|v| (ClickIdKind::Gclid, v))
            .or_else(|| usable(&self.wbraid).map(|v| (ClickIdKind::Wbraid, v)))
            .or_else(|| usable(&self.gbraid).map(|v| (ClickIdKind::Gbraid, v)))
    }

    pub fn is_empty(&self) -> bool {
        self.primary().is_none()
    }
}

/// Matched session returned by the external session lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: String,
    pub analytics_consent: bool,
    pub click_ids: ClickIds,
    pub click_time: Option<DateTime<Utc>>,
}

/// A generic page/heartbeat/click event recorded for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedEvent {
    pub id: Uuid,
    pub tenant: CanonicalTenantId,
    pub session_id: Option<String>,
    pub fingerprint: String,
    pub event_name: String,
    pub url: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl TrackedEvent {
    /// Monthly partition the event belongs to. Uniqueness is on (id, partition).
    pub fn partition(&self) -> String {
        self.occurred_at.format("%Y-%m").to_string()
    }
}

/// A phone/WhatsApp call intent after it has been accepted by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: Uuid,
    pub tenant: CanonicalTenantId,
    pub session_id: Option<String>,
    pub fingerprint: String,
    pub intent_action: String,
    pub intent_target: String,
    pub lead_score: Option<i32>,
    pub ad_context: Option<AdContext>,
    pub click_ids: ClickIds,
    pub created_at: DateTime<Utc>,
}
