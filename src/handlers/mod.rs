//! HTTP surface.
//!
//! - `POST /v1/call-event`, `/v1/events`, `/v1/stage`, `/v1/seal`: signed ingress
//! - `GET /v1/export`: export read model, bearer token
//! - `GET /health`: liveness

pub mod export;
pub mod ingest;
pub mod response;

pub use response::ApiError;

use std::future::Future;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::bus::JobQueue;
use crate::export::ExportReader;
use crate::ingress::SignedIngressGate;
use crate::interfaces::{ReplayStore, SessionLookup, TenantResolver};
use crate::ratelimit::RateLimiter;
use crate::utils::clock::Clock;

/// Everything a request handler reads from.
pub struct AppContext {
    pub gate: SignedIngressGate,
    pub limiter: RateLimiter,
    pub replay: Arc<dyn ReplayStore>,
    pub sessions: Arc<dyn SessionLookup>,
    pub resolver: Arc<dyn TenantResolver>,
    pub jobs: Arc<dyn JobQueue>,
    pub export: ExportReader,
    /// Bearer token for the export read endpoint. `None` locks it.
    pub export_token: Option<String>,
    pub clock: Arc<dyn Clock>,
}

/// Shared state for axum handlers.
pub type AppState = Arc<AppContext>;

/// Build the axum router (separated for testing).
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/call-event", post(ingest::call_event))
        .route("/v1/events", post(ingest::sync_event))
        .route("/v1/stage", post(ingest::stage))
        .route("/v1/seal", post(ingest::seal))
        .route("/v1/export", get(export::export))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router until `shutdown` resolves.
///
/// When the port is 0, the OS assigns an ephemeral port. The actual bound
/// address is always logged.
pub async fn serve(
    state: AppState,
    addr: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests;
