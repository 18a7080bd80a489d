//! Funnel gears and the records the valuation engine produces.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tenant::CanonicalTenantId;

/// Funnel stage, ordered from page observation (V1) to sealed sale (V5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Gear {
    V1,
    V2,
    V3,
    V4,
    V5,
}

impl Gear {
    pub fn as_str(self) -> &'static str {
        match self {
            Gear::V1 => "V1",
            Gear::V2 => "V2",
            Gear::V3 => "V3",
            Gear::V4 => "V4",
            Gear::V5 => "V5",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "V1" => Some(Gear::V1),
            "V2" => Some(Gear::V2),
            "V3" => Some(Gear::V3),
            "V4" => Some(Gear::V4),
            "V5" => Some(Gear::V5),
            _ => None,
        }
    }

    /// Gears stored in the durable signal ledger.
    pub fn is_mid_funnel(self) -> bool {
        matches!(self, Gear::V2 | Gear::V3 | Gear::V4)
    }
}

impl fmt::Display for Gear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dispatch status of a mid-funnel signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalStatus {
    Pending,
    Processing,
    Exported,
}

impl SignalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalStatus::Pending => "PENDING",
            SignalStatus::Processing => "PROCESSING",
            SignalStatus::Exported => "EXPORTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(SignalStatus::Pending),
            "PROCESSING" => Some(SignalStatus::Processing),
            "EXPORTED" => Some(SignalStatus::Exported),
            _ => None,
        }
    }
}

/// Decayed, non-final valuation for gears V2–V4.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketingSignal {
    pub id: Uuid,
    pub tenant: CanonicalTenantId,
    pub call_id: Option<Uuid>,
    /// Click identifier linking the session chain, used for V2 dedup.
    pub click_chain: Option<String>,
    pub gear: Gear,
    pub value_cents: i64,
    pub currency: String,
    pub signal_time: DateTime<Utc>,
    pub status: SignalStatus,
    pub created_at: DateTime<Utc>,
}

/// Value-less V1 attribution sample with a bounded lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub id: Uuid,
    pub tenant: CanonicalTenantId,
    pub session_id: Option<String>,
    pub fingerprint: String,
    pub url: Option<String>,
    pub observed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
