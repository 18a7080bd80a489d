//! Conversion valuation engine.
//!
//! Maps a funnel gear and the time since the ad click to a monetary value and
//! routes the result:
//!
//! | Gear | Destination | Value |
//! |---|---|---|
//! | V1 | observation queue (short TTL) | none |
//! | V2 | signal ledger, one pulse per call/click chain per dedup window | AOV × 0.02 × decay |
//! | V3 | signal ledger | AOV × 0.10 × decay |
//! | V4 | signal ledger | AOV × 0.30 × decay |
//! | V5 | offline conversion queue | exact sale amount |
//!
//! AOV is the tenant's average order value, raised to the configured floor.
//! Decay never exceeds 0.5, so a mid-funnel value always stays strictly
//! below `AOV × ratio`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ValuationConfig;
use crate::error::{Classify, ErrorClass};
use crate::interfaces::{ConversionQueue, MarketingSignalStore, ObservationStore, StoreError};
use crate::model::{
    CanonicalTenantId, Gear, MarketingSignal, NewQueueRow, Observation, QueueRow, SealJob,
    SignalStatus,
};

const MS_PER_DAY: i64 = 86_400_000;

#[derive(Debug, thiserror::Error)]
pub enum ValuationError {
    #[error("Gear {0} is not valued as a mid-funnel signal")]
    NotMidFunnel(Gear),

    #[error("Sale amount must be non-negative, got {0}")]
    NegativeAmount(i64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Classify for ValuationError {
    fn class(&self) -> ErrorClass {
        match self {
            ValuationError::NotMidFunnel(_) | ValuationError::NegativeAmount(_) => {
                ErrorClass::Validation
            }
            ValuationError::Store(e) => e.class(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ValuationError>;

/// Share of AOV a gear is worth before decay.
pub fn gear_ratio(gear: Gear) -> Option<f64> {
    match gear {
        Gear::V2 => Some(0.02),
        Gear::V3 => Some(0.10),
        Gear::V4 => Some(0.30),
        Gear::V1 | Gear::V5 => None,
    }
}

/// Whole days between click and signal, rounded up, never negative.
pub fn elapsed_days(click_time: Option<DateTime<Utc>>, signal_time: DateTime<Utc>) -> i64 {
    let Some(click_time) = click_time else {
        return 0;
    };
    let elapsed_ms = (signal_time - click_time).num_milliseconds();
    if elapsed_ms <= 0 {
        return 0;
    }
    (elapsed_ms + MS_PER_DAY - 1) / MS_PER_DAY
}

/// Time decay for a mid-funnel gear.
pub fn decay_factor(gear: Gear, days: i64) -> f64 {
    if days <= 3 {
        return 0.50;
    }
    let recent = days <= 10;
    match (gear, recent) {
        (Gear::V2, true) => 0.30,
        (Gear::V3, true) => 0.25,
        (Gear::V4, true) => 0.20,
        (Gear::V2, false) => 0.15,
        (Gear::V3, false) => 0.10,
        (Gear::V4, false) => 0.05,
        (Gear::V1 | Gear::V5, _) => 0.0,
    }
}

/// Mid-funnel value in minor units. V1 is always zero; V5 is not decayed
/// and is valued from the sale amount instead.
pub fn signal_value_cents(gear: Gear, aov_major: f64, min_aov_major: f64, days: i64) -> i64 {
    let Some(ratio) = gear_ratio(gear) else {
        return 0;
    };
    let aov = if aov_major.is_finite() {
        aov_major.max(min_aov_major)
    } else {
        min_aov_major
    };
    let value = (aov * 100.0 * ratio * decay_factor(gear, days)).round();
    (value as i64).max(0)
}

/// A mid-funnel signal to value and store.
#[derive(Debug, Clone)]
pub struct SignalRequest {
    pub tenant: CanonicalTenantId,
    pub gear: Gear,
    pub call_id: Option<Uuid>,
    pub click_chain: Option<String>,
    pub aov_major: f64,
    pub currency: String,
    pub click_time: Option<DateTime<Utc>>,
    pub signal_time: DateTime<Utc>,
}

/// Where a valuation ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum ValuationOutcome {
    Observed(Observation),
    Signal(MarketingSignal),
    /// V2 pulse dropped because one already exists inside the dedup window.
    PulseSuppressed,
    Queued(QueueRow),
}

/// Values signals and routes them to the right store.
#[derive(Clone)]
pub struct ValuationEngine {
    signals: Arc<dyn MarketingSignalStore>,
    observations: Arc<dyn ObservationStore>,
    queue: Arc<dyn ConversionQueue>,
    config: ValuationConfig,
}

impl ValuationEngine {
    pub fn new(
        signals: Arc<dyn MarketingSignalStore>,
        observations: Arc<dyn ObservationStore>,
        queue: Arc<dyn ConversionQueue>,
        config: ValuationConfig,
    ) -> Self {
        Self {
            signals,
            observations,
            queue,
            config,
        }
    }

    pub fn config(&self) -> &ValuationConfig {
        &self.config
    }

    /// V1: record a value-less sample that expires after the observation TTL.
    pub async fn observe(
        &self,
        tenant: CanonicalTenantId,
        session_id: Option<String>,
        fingerprint: &str,
        url: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ValuationOutcome> {
        let observation = Observation {
            id: Uuid::new_v4(),
            tenant,
            session_id,
            fingerprint: fingerprint.to_string(),
            url,
            observed_at: now,
            expires_at: now + chrono::Duration::days(self.config.observation_ttl_days),
        };
        self.observations.record(&observation).await?;
        debug!(tenant = %tenant, id = %observation.id, "V1 observation recorded");
        Ok(ValuationOutcome::Observed(observation))
    }

    /// V2–V4: value with decay and append to the signal ledger as PENDING.
    pub async fn record_signal(
        &self,
        request: SignalRequest,
        now: DateTime<Utc>,
    ) -> Result<ValuationOutcome> {
        if !request.gear.is_mid_funnel() {
            return Err(ValuationError::NotMidFunnel(request.gear));
        }

        let days = elapsed_days(request.click_time, request.signal_time);
        let value_cents = signal_value_cents(
            request.gear,
            request.aov_major,
            self.config.min_aov_major,
            days,
        );

        let signal = MarketingSignal {
            id: Uuid::new_v4(),
            tenant: request.tenant,
            call_id: request.call_id,
            click_chain: request.click_chain,
            gear: request.gear,
            value_cents,
            currency: request.currency,
            signal_time: request.signal_time,
            status: SignalStatus::Pending,
            created_at: now,
        };

        if request.gear == Gear::V2 {
            let since =
                request.signal_time - chrono::Duration::hours(self.config.pulse_dedup_hours);
            if !self
                .signals
                .insert_pulse_if_absent(&signal, since)
                .await?
                .is_inserted()
            {
                debug!(tenant = %signal.tenant, "V2 pulse suppressed inside dedup window");
                return Ok(ValuationOutcome::PulseSuppressed);
            }
        } else {
            self.signals.insert(&signal).await?;
        }

        info!(
            tenant = %signal.tenant,
            gear = %signal.gear,
            days,
            value_cents,
            "Signal valued"
        );
        Ok(ValuationOutcome::Signal(signal))
    }

    /// V5: queue the exact sale amount for upload.
    pub async fn queue_sale(&self, seal: &SealJob, now: DateTime<Utc>) -> Result<ValuationOutcome> {
        if seal.amount_cents < 0 {
            return Err(ValuationError::NegativeAmount(seal.amount_cents));
        }
        let row = self
            .queue
            .enqueue(
                NewQueueRow {
                    site_id: seal.tenant,
                    provider: self.config.provider.clone(),
                    call_id: seal.call_id,
                    sale_id: seal.sale_id.clone(),
                    session_id: seal.session_id.clone(),
                    click_ids: seal.click_ids.clone(),
                    value_cents: seal.amount_cents,
                    currency: seal.currency.clone(),
                    conversion_time: seal.sealed_at,
                },
                now,
            )
            .await?;
        info!(
            tenant = %seal.tenant,
            sale_id = %seal.sale_id,
            value_cents = row.value_cents,
            "Sale queued for upload"
        );
        Ok(ValuationOutcome::Queued(row))
    }
}
