//! `GET /v1/export`: pull-based read of pending conversions for one site.

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use super::response::ApiError;
use super::AppState;
use crate::export::ExportItem;
use crate::model::{CanonicalTenantId, TenantRef};

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub site_id: String,
    #[serde(default)]
    pub mark_processing: bool,
}

#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub site_id: CanonicalTenantId,
    pub items: Vec<ExportItem>,
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn authorized(expected: Option<&str>, presented: Option<&str>) -> bool {
    match (expected, presented) {
        (Some(expected), Some(presented)) if !expected.is_empty() => {
            expected.as_bytes().ct_eq(presented.as_bytes()).into()
        }
        _ => false,
    }
}

pub async fn export(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ExportQuery>,
) -> Result<Json<ExportResponse>, ApiError> {
    if !authorized(state.export_token.as_deref(), bearer(&headers)) {
        warn!("Export read rejected");
        return Err(ApiError::unauthorized());
    }

    let site_ref = TenantRef::parse(&query.site_id)
        .ok_or_else(|| ApiError::bad_request("invalid site_id"))?;
    let site_id = state
        .resolver
        .resolve(&site_ref)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "unknown site"))?;

    let items = state
        .export
        .read(site_id, query.mark_processing, state.clock.now())
        .await?;
    debug!(site_id = %site_id, items = items.len(), "Export read");

    Ok(Json(ExportResponse { site_id, items }))
}
