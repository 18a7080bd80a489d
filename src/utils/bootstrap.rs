//! Bootstrap utilities for the callsignal binary.

use std::future::Future;

use backon::Retryable;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LOG_ENV_VAR, LOG_FORMAT_ENV_VAR};
use crate::utils::retry::connection_backoff;

/// Initialize tracing with the CALLSIGNAL_LOG environment variable.
///
/// Defaults to "info" level if CALLSIGNAL_LOG is not set.
/// `CALLSIGNAL_LOG_FORMAT=json` switches to the JSON formatter.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = std::env::var(LOG_FORMAT_ENV_VAR)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Open a backing resource with exponential backoff retry.
///
/// # Arguments
/// * `resource_name` - Human-readable name for logging (e.g., "storage")
/// * `connect` - Async function that attempts to open the resource
pub async fn connect_with_retry<T, E, F, Fut>(resource_name: &str, connect: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let result = connect
        .retry(connection_backoff())
        .notify(|e: &E, delay| {
            warn!(
                resource = %resource_name,
                error = %e,
                "Failed to open resource, retrying in {:?}",
                delay
            );
        })
        .await;

    match &result {
        Ok(_) => tracing::info!(resource = %resource_name, "Connected"),
        Err(e) => tracing::error!(resource = %resource_name, error = %e, "Giving up on resource"),
    }
    result
}
