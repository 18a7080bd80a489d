//! Single-process runtime: HTTP ingress, job consumers and the export loop.
//!
//! # Example
//!
//! ```ignore
//! use callsignal::runtime::Runtime;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = callsignal::config::Config::load(None)?;
//!     let runtime = Runtime::builder().with_config(config).build().await?;
//!     runtime.run().await
//! }
//! ```

mod builder;

pub use builder::RuntimeBuilder;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bus::{ChannelJobQueue, JobHandler, JobQueue};
use crate::config::Config;
use crate::dlq::{DeadLetterPublisher, StoreDeadLetterPublisher};
use crate::export::{run_export_loop, CredentialDirectory, ExportCycle, ExportReader};
use crate::handlers::{self, AppContext, AppState};
use crate::idempotency::{IdempotencyGuard, KeyPolicy};
use crate::ingress::{SignedIngressGate, StaticTenantDirectory};
use crate::interfaces::SignatureVerifier;
use crate::providers::ProviderRegistry;
use crate::ratelimit::RateLimiter;
use crate::storage::Stores;
use crate::utils::clock::Clock;
use crate::valuation::ValuationEngine;
use crate::worker::{WorkerDeps, WorkerPipeline};

/// The assembled service.
pub struct Runtime {
    config: Config,
    stores: Stores,
    state: AppState,
    jobs: Arc<ChannelJobQueue>,
    pipeline: Arc<WorkerPipeline>,
    export: Arc<ExportCycle>,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub(crate) fn new(
        config: Config,
        stores: Stores,
        registry: ProviderRegistry,
        credentials: CredentialDirectory,
        verifier: Arc<dyn SignatureVerifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let directory = Arc::new(StaticTenantDirectory::from_tenants(&config.tenants));
        let dead_letters: Arc<dyn DeadLetterPublisher> =
            Arc::new(StoreDeadLetterPublisher::new(stores.dead_letters.clone()));

        let valuation = ValuationEngine::new(
            stores.signals.clone(),
            stores.observations.clone(),
            stores.queue.clone(),
            config.valuation.clone(),
        );
        let idempotency = IdempotencyGuard::new(
            stores.idempotency.clone(),
            KeyPolicy::from_config(&config.idempotency, &config.tenants),
            config.idempotency.retention_days,
        );
        let pipeline = Arc::new(WorkerPipeline::new(
            WorkerDeps {
                ledger: stores.ledger.clone(),
                counters: stores.counters.clone(),
                idempotency,
                usage: stores.usage.clone(),
                domain: stores.domain.clone(),
                sessions: stores.sessions.clone(),
                valuation,
                entitlements: directory.clone(),
                dead_letters: dead_letters.clone(),
                clock: clock.clone(),
            },
            config.worker.clone(),
        ));
        let jobs = Arc::new(ChannelJobQueue::new(
            config.worker.clone(),
            dead_letters,
            stores.outbox.clone(),
        ));

        let export = Arc::new(ExportCycle::new(
            stores.queue.clone(),
            registry,
            credentials,
            config.export.clone(),
            clock.clone(),
        ));

        let state = Arc::new(AppContext {
            gate: SignedIngressGate::new(verifier, directory.clone(), config.ingress.clone()),
            limiter: RateLimiter::new(stores.counters.clone(), config.rate_limits.clone()),
            replay: stores.replay.clone(),
            sessions: stores.sessions.clone(),
            resolver: directory,
            jobs: jobs.clone() as Arc<dyn JobQueue>,
            export: ExportReader::new(
                stores.queue.clone(),
                stores.signals.clone(),
                stores.observations.clone(),
                config.export.batch_size,
            ),
            export_token: config.export.read_token.clone(),
            clock,
        });

        info!(
            tenants = config.tenants.len(),
            workers = config.worker.concurrency,
            "Runtime assembled"
        );

        Self {
            config,
            stores,
            state,
            jobs,
            pipeline,
            export,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// HTTP router over this runtime's state.
    pub fn router(&self) -> Router {
        handlers::router(self.state())
    }

    pub fn pipeline(&self) -> Arc<WorkerPipeline> {
        self.pipeline.clone()
    }

    pub fn export_cycle(&self) -> Arc<ExportCycle> {
        self.export.clone()
    }

    /// Spawn job consumers and outbox recovery, plus the credential check and
    /// export loop when export is enabled.
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let handler: Arc<dyn JobHandler> = self.pipeline.clone();
        let mut tasks = self.jobs.start(handler, shutdown.clone());

        let jobs = self.jobs.clone();
        tasks.push(tokio::spawn(async move {
            match jobs.recover().await {
                Ok(0) => {}
                Ok(count) => info!(count, "Orphaned jobs requeued"),
                Err(e) => error!(error = %e, "Job outbox recovery failed"),
            }
        }));

        if self.config.export.enabled {
            let export = self.export.clone();
            tasks.push(tokio::spawn(async move {
                let failures = export.verify_credentials().await;
                if failures > 0 {
                    warn!(failures, "Some provider credentials could not be verified");
                }
            }));

            let interval = Duration::from_secs(self.config.export.interval_secs.max(1));
            tasks.push(tokio::spawn(run_export_loop(
                self.export.clone(),
                interval,
                shutdown,
            )));
        } else {
            info!("Export loop disabled");
        }
        tasks
    }

    /// Serve HTTP until ctrl-c, then drain background tasks.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = self.start(shutdown_rx);

        let addr = self.config.server.bind_addr();
        let signal = async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        };

        if let Err(e) = handlers::serve(self.state(), &addr, signal).await {
            return Err(e.to_string().into());
        }

        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Background task ended abnormally");
            }
        }
        info!("Shutdown complete");
        Ok(())
    }
}
