//! Pull-based export read model.
//!
//! Items carry a provenance prefix in their id: `seal:` for sealed sales
//! waiting in the conversion queue, `signal:` for pending mid-funnel signals,
//! `pv:` for live page-view observations. Only signals can be marked
//! PROCESSING by a reader; queue rows stay owned by the export cycle.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use super::Result;
use crate::interfaces::{ConversionQueue, MarketingSignalStore, ObservationStore};
use crate::model::{CanonicalTenantId, ClickIds, QueueStatus, SignalStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportItem {
    pub id: String,
    pub call_id: Option<Uuid>,
    #[serde(flatten)]
    pub click_ids: ClickIds,
    /// Click identifier a mid-funnel signal was chained through.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub click_chain: Option<String>,
    pub conversion_time: DateTime<Utc>,
    pub value_cents: i64,
    pub currency: Option<String>,
    pub action: String,
    pub status: String,
}

#[derive(Clone)]
pub struct ExportReader {
    queue: Arc<dyn ConversionQueue>,
    signals: Arc<dyn MarketingSignalStore>,
    observations: Arc<dyn ObservationStore>,
    limit: usize,
}

impl ExportReader {
    pub fn new(
        queue: Arc<dyn ConversionQueue>,
        signals: Arc<dyn MarketingSignalStore>,
        observations: Arc<dyn ObservationStore>,
        limit: usize,
    ) -> Self {
        Self {
            queue,
            signals,
            observations,
            limit,
        }
    }

    pub async fn read(
        &self,
        site_id: CanonicalTenantId,
        mark_processing: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExportItem>> {
        let mut items = Vec::new();

        let rows = self
            .queue
            .list_for_site(site_id, &[QueueStatus::Queued, QueueStatus::Retry], self.limit)
            .await?;
        items.extend(rows.into_iter().map(|row| ExportItem {
            id: format!("seal:{}", row.id),
            call_id: row.call_id,
            click_ids: row.click_ids,
            click_chain: None,
            conversion_time: row.conversion_time,
            value_cents: row.value_cents,
            currency: Some(row.currency),
            action: "sale".to_string(),
            status: row.status.as_str().to_string(),
        }));

        let signals = self.signals.list_pending(site_id, self.limit).await?;
        let marked = if mark_processing && !signals.is_empty() {
            let ids: Vec<Uuid> = signals.iter().map(|s| s.id).collect();
            let moved = self.signals.mark_processing(&ids).await?;
            debug!(site_id = %site_id, moved, "Signals marked processing");
            true
        } else {
            false
        };
        items.extend(signals.into_iter().map(|signal| ExportItem {
            id: format!("signal:{}", signal.id),
            call_id: signal.call_id,
            click_ids: ClickIds::default(),
            click_chain: signal.click_chain,
            conversion_time: signal.signal_time,
            value_cents: signal.value_cents,
            currency: Some(signal.currency),
            action: signal.gear.to_string(),
            status: if marked {
                SignalStatus::Processing.as_str().to_string()
            } else {
                signal.status.as_str().to_string()
            },
        }));

        let observations = self.observations.list_live(site_id, now, self.limit).await?;
        items.extend(observations.into_iter().map(|obs| ExportItem {
            id: format!("pv:{}", obs.id),
            call_id: None,
            click_ids: ClickIds::default(),
            click_chain: None,
            conversion_time: obs.observed_at,
            value_cents: 0,
            currency: None,
            action: "V1".to_string(),
            status: "OBSERVED".to_string(),
        }));

        Ok(items)
    }
}
