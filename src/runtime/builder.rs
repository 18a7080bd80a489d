//! Runtime builder.
//!
//! Provides a fluent API for assembling the service from configuration,
//! with overrides for the parts tests need to control.

use std::sync::Arc;

use crate::config::Config;
use crate::export::CredentialDirectory;
use crate::ingress::HmacSignatureVerifier;
use crate::interfaces::SignatureVerifier;
use crate::providers::{GoogleAdsAdapter, ProviderRegistry};
use crate::storage::{init_storage, Stores};
use crate::utils::clock::{Clock, SystemClock};

use super::Runtime;

/// Builder for creating a [`Runtime`].
///
/// # Example
///
/// ```ignore
/// use callsignal::runtime::RuntimeBuilder;
///
/// let runtime = RuntimeBuilder::new()
///     .with_config(config)
///     .with_memory_storage()
///     .build()
///     .await?;
/// ```
pub struct RuntimeBuilder {
    config: Config,
    /// Pre-built stores. When unset, storage is initialised from config.
    stores: Option<Stores>,
    clock: Option<Arc<dyn Clock>>,
    /// Provider registry override (mock adapters in tests).
    registry: Option<ProviderRegistry>,
    verifier: Option<Arc<dyn SignatureVerifier>>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            stores: None,
            clock: None,
            registry: None,
            verifier: None,
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Use in-memory stores regardless of the storage section.
    pub fn with_memory_storage(mut self) -> Self {
        self.stores = Some(Stores::in_memory());
        self
    }

    pub fn with_stores(mut self, stores: Stores) -> Self {
        self.stores = Some(stores);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Build the runtime.
    ///
    /// Initializes storage when no stores were supplied and registers the
    /// Google Ads adapter when no registry was supplied.
    pub async fn build(self) -> Result<Runtime, Box<dyn std::error::Error>> {
        let stores = match self.stores {
            Some(stores) => stores,
            None => init_storage(&self.config.storage).await?,
        };

        let registry = match self.registry {
            Some(registry) => registry,
            None => ProviderRegistry::new().with(Arc::new(GoogleAdsAdapter::new(
                self.config.providers.google_ads.clone(),
            )?)),
        };

        let verifier = self
            .verifier
            .unwrap_or_else(|| Arc::new(HmacSignatureVerifier::from_tenants(&self.config.tenants)));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let credentials = CredentialDirectory::from_tenants(&self.config.tenants);

        Ok(Runtime::new(
            self.config,
            stores,
            registry,
            credentials,
            verifier,
            clock,
        ))
    }

    // ========================================================================
    // Accessors (for testing/inspection)
    // ========================================================================

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
