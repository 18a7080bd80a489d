//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod limits;
mod pipeline;
mod providers;
mod server;
mod storage;
mod tenants;

pub use limits::{
    IngressConfig, RateLimitsConfig, WindowLimit, DEFAULT_MAX_BODY_BYTES,
    DEFAULT_MAX_FUTURE_SKEW_SECS, DEFAULT_MAX_PAST_SKEW_SECS, DEFAULT_REPLAY_TTL_SECS,
    DEFAULT_SKIP_HEADER,
};
pub use pipeline::{ExportConfig, IdempotencyConfig, ValuationConfig, WorkerConfig};
pub use providers::{GoogleAdsConfig, ProvidersConfig};
pub use server::ServerConfig;
pub use storage::{StorageConfig, StorageType};
pub use tenants::{GoogleAdsCredentials, TenantConfig};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "CALLSIGNAL_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "CALLSIGNAL";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "CALLSIGNAL_LOG";
/// Environment variable selecting the log formatter (`json` or `text`).
pub const LOG_FORMAT_ENV_VAR: &str = "CALLSIGNAL_LOG_FORMAT";

use std::collections::HashSet;

use serde::Deserialize;

use crate::model::TenantRef;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub ingress: IngressConfig,
    pub rate_limits: RateLimitsConfig,
    pub idempotency: IdempotencyConfig,
    pub worker: WorkerConfig,
    pub valuation: ValuationConfig,
    pub export: ExportConfig,
    pub providers: ProvidersConfig,
    pub tenants: Vec<TenantConfig>,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.concurrency == 0 {
            return Err(ConfigError::Invalid("worker.concurrency must be > 0".into()));
        }
        if self.worker.max_attempts == 0 {
            return Err(ConfigError::Invalid("worker.max_attempts must be > 0".into()));
        }
        if self.valuation.min_aov_major < 0.0 {
            return Err(ConfigError::Invalid("valuation.min_aov_major must be >= 0".into()));
        }

        let mut canonical = HashSet::new();
        let mut public = HashSet::new();
        for tenant in &self.tenants {
            if !canonical.insert(tenant.canonical_id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate tenant canonical_id {}",
                    tenant.canonical_id
                )));
            }
            if tenant.signing_secret.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "tenant {} has an empty signing_secret",
                    tenant.canonical_id
                )));
            }
            if let Some(slug) = &tenant.public_id {
                if !matches!(TenantRef::parse(slug), Some(TenantRef::Public(_))) {
                    return Err(ConfigError::Invalid(format!("invalid public_id {:?}", slug)));
                }
                if !public.insert(slug.clone()) {
                    return Err(ConfigError::Invalid(format!("duplicate public_id {:?}", slug)));
                }
            }
        }
        Ok(())
    }

    /// Create config for testing: in-memory storage, export loop off.
    pub fn for_test() -> Self {
        let mut config = Self::default();
        config.storage = StorageConfig::memory();
        config.export.enabled = false;
        config
    }
}
