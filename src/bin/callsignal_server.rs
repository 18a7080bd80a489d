//! callsignal-server: signed ingress, job consumers and export loop in one process.
//!
//! ## Architecture
//! ```text
//! [site edge] --(signed POST)--> [ingress gate] --> [job queue] --> [worker]
//!                                                                      |
//!                           [export loop] <-- [conversion queue] <-----+
//!                                 |
//!                                 v
//!                           [ad platform]
//! ```
//!
//! ## Configuration
//! - First argument: path to a YAML config file (optional)
//! - CALLSIGNAL_CONFIG: path to a YAML config file (optional)
//! - CALLSIGNAL__*: overrides, e.g. CALLSIGNAL__SERVER__PORT=8080
//! - CALLSIGNAL_LOG / CALLSIGNAL_LOG_FORMAT: log filter and format

use tracing::info;

use callsignal::config::Config;
use callsignal::runtime::Runtime;
use callsignal::storage::init_storage;
use callsignal::utils::bootstrap::{connect_with_retry, init_tracing};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let path = std::env::args().nth(1);
    let config = Config::load(path.as_deref())?;

    let stores = connect_with_retry("storage", || init_storage(&config.storage)).await?;

    info!(
        addr = %config.server.bind_addr(),
        tenants = config.tenants.len(),
        "callsignal-server starting"
    );

    let runtime = Runtime::builder()
        .with_config(config)
        .with_stores(stores)
        .build()
        .await?;

    runtime.run().await
}
