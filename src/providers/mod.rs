//! Ad provider adapters.
//!
//! A provider uploads a batch of queue rows and reports one [`UploadResult`]
//! per row. Adapters are looked up by name in a [`ProviderRegistry`]; an
//! unknown name fails fast with [`ProviderError::UnsupportedProvider`].

pub mod classify;
pub mod google_ads;

pub use classify::{classify_message, classify_status, parse_retry_after, StatusClass};
pub use google_ads::GoogleAdsAdapter;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::GoogleAdsCredentials;
use crate::error::{Classify, ErrorClass};
use crate::model::{ErrorCategory, QueueRow};

/// Error code for rows that carry no usable click identifier.
pub const MISSING_CLICK_ID: &str = "MISSING_CLICK_ID";

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("Provider authentication failed: {0}")]
    Auth(String),

    #[error("Provider rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Provider rejected request: {0}")]
    Validation(String),

    #[error("Provider unavailable: {0}")]
    Transient(String),
}

impl Classify for ProviderError {
    fn class(&self) -> ErrorClass {
        match self {
            ProviderError::UnsupportedProvider(_) => ErrorClass::Permanent,
            ProviderError::Auth(_) => ErrorClass::Auth,
            ProviderError::RateLimited { .. } => ErrorClass::RateLimit,
            ProviderError::Validation(_) => ErrorClass::Validation,
            ProviderError::Transient(_) => ErrorClass::Transient,
        }
    }
}

impl ProviderError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProviderError::Auth(_) => ErrorCategory::Auth,
            ProviderError::RateLimited { .. } => ErrorCategory::RateLimit,
            ProviderError::Transient(_) => ErrorCategory::Transient,
            ProviderError::UnsupportedProvider(_) | ProviderError::Validation(_) => {
                ErrorCategory::Validation
            }
        }
    }
}

/// Tenant credentials for one provider.
#[derive(Debug, Clone)]
pub enum ProviderCredentials {
    GoogleAds(GoogleAdsCredentials),
}

/// Per-row outcome of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Completed,
    Failed {
        code: String,
        category: ErrorCategory,
        message: String,
    },
    Retry {
        code: String,
        category: ErrorCategory,
        message: String,
        retry_after: Option<Duration>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub job_id: Uuid,
    pub outcome: UploadOutcome,
}

impl UploadResult {
    pub fn completed(job_id: Uuid) -> Self {
        Self {
            job_id,
            outcome: UploadOutcome::Completed,
        }
    }

    /// Outcome for a row in `category`: retryable buckets retry, the rest fail.
    pub fn classified(
        job_id: Uuid,
        code: impl Into<String>,
        category: ErrorCategory,
        message: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        let (code, message) = (code.into(), message.into());
        let outcome = if category.is_retryable() {
            UploadOutcome::Retry {
                code,
                category,
                message,
                retry_after,
            }
        } else {
            UploadOutcome::Failed {
                code,
                category,
                message,
            }
        };
        Self { job_id, outcome }
    }

    /// Outcome for a row caught in a whole-batch failure.
    pub fn from_error(job_id: Uuid, code: &str, error: &ProviderError) -> Self {
        let retry_after = match error {
            ProviderError::RateLimited { retry_after } => *retry_after,
            _ => None,
        };
        Self::classified(job_id, code, error.category(), error.to_string(), retry_after)
    }
}

/// One ad platform.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Registry key, e.g. `google_ads`.
    fn name(&self) -> &'static str;

    async fn verify_credentials(&self, credentials: &ProviderCredentials) -> Result<(), ProviderError>;

    /// Upload `jobs` and return exactly one result per job.
    async fn upload_conversions(
        &self,
        jobs: &[QueueRow],
        credentials: &ProviderCredentials,
    ) -> Result<Vec<UploadResult>, ProviderError>;
}

/// Adapters keyed by provider name.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        self.adapters
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::UnsupportedProvider(name.to_string()))
    }
}
