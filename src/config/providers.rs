//! Ad provider endpoints.

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub google_ads: GoogleAdsConfig,
}

/// Google Ads offline conversion upload endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GoogleAdsConfig {
    pub token_url: String,
    pub api_base: String,
    pub api_version: String,
    /// Bound on each provider request. A timeout is transient.
    pub timeout_secs: u64,
    /// Used when a tenant's credentials leave `conversion_action` empty.
    pub conversion_action: Option<String>,
}

impl Default for GoogleAdsConfig {
    fn default() -> Self {
        Self {
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            api_base: "https://googleads.googleapis.com".to_string(),
            api_version: "v17".to_string(),
            timeout_secs: 20,
            conversion_action: None,
        }
    }
}

impl GoogleAdsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
