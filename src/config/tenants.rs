//! Per-tenant configuration.
//!
//! Signing secrets and provider credentials come from here. Neither is ever
//! printed: the `Debug` impls redact them.

use std::fmt;

use serde::Deserialize;
use uuid::Uuid;

use crate::idempotency::KeyVersion;

fn default_aov() -> f64 {
    1000.0
}

fn default_currency() -> String {
    "EUR".to_string()
}

#[derive(Clone, Deserialize)]
pub struct TenantConfig {
    pub canonical_id: Uuid,
    #[serde(default)]
    pub public_id: Option<String>,
    pub signing_secret: String,
    /// `None` means unlimited.
    #[serde(default)]
    pub monthly_event_limit: Option<u64>,
    #[serde(default = "default_aov")]
    pub aov_major: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Overrides the global key scheme for this tenant.
    #[serde(default)]
    pub idempotency_version: Option<KeyVersion>,
    #[serde(default)]
    pub google_ads: Option<GoogleAdsCredentials>,
}

impl fmt::Debug for TenantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantConfig")
            .field("canonical_id", &self.canonical_id)
            .field("public_id", &self.public_id)
            .field("signing_secret", &"<redacted>")
            .field("monthly_event_limit", &self.monthly_event_limit)
            .field("aov_major", &self.aov_major)
            .field("currency", &self.currency)
            .field("idempotency_version", &self.idempotency_version)
            .field("google_ads", &self.google_ads)
            .finish()
    }
}

/// OAuth and account identifiers for uploading to Google Ads.
#[derive(Clone, Deserialize)]
pub struct GoogleAdsCredentials {
    pub customer_id: String,
    #[serde(default)]
    pub login_customer_id: Option<String>,
    pub developer_token: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    /// Conversion action resource name, e.g. `customers/123/conversionActions/456`.
    /// Falls back to `providers.google_ads.conversion_action` when empty.
    #[serde(default)]
    pub conversion_action: String,
}

impl fmt::Debug for GoogleAdsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleAdsCredentials")
            .field("customer_id", &self.customer_id)
            .field("login_customer_id", &self.login_customer_id)
            .field("conversion_action", &self.conversion_action)
            .finish_non_exhaustive()
    }
}
