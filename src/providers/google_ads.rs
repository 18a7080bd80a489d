//! Google Ads offline click conversion adapter.
//!
//! Each upload exchanges the tenant's refresh token for a short-lived access
//! token, then sends every row that has a click identifier in a single
//! `uploadClickConversions` call with partial failure enabled. Failed
//! indices in the response refer to the filtered wire batch and are mapped
//! back to queue row ids.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use super::classify::{classify_message, classify_status, parse_retry_after};
use super::{
    ProviderAdapter, ProviderCredentials, ProviderError, UploadResult, MISSING_CLICK_ID,
};
use crate::config::{GoogleAdsConfig, GoogleAdsCredentials};
use crate::error::Classify;
use crate::model::{ClickIdKind, ErrorCategory, QueueRow};

pub const PROVIDER_NAME: &str = "google_ads";

/// Order ids are truncated to this many hex characters.
const ORDER_ID_LEN: usize = 32;

/// Provider timestamp format, always in UTC.
pub fn format_conversion_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S+00:00").to_string()
}

/// Stable order id derived from click id, conversion action and timestamp.
/// Resending the same conversion yields the same id, so Google deduplicates it.
pub fn order_id(click_id: &str, conversion_action: &str, conversion_time: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(click_id.as_bytes());
    hasher.update(b"|");
    hasher.update(conversion_action.as_bytes());
    hasher.update(b"|");
    hasher.update(conversion_time.as_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(ORDER_ID_LEN);
    id
}

fn digits(id: &str) -> String {
    id.chars().filter(char::is_ascii_digit).collect()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClickConversion {
    #[serde(skip_serializing_if = "Option::is_none")]
    gclid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    wbraid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gbraid: Option<String>,
    conversion_action: String,
    conversion_date_time: String,
    conversion_value: f64,
    currency_code: String,
    order_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadRequest<'a> {
    conversions: &'a [ClickConversion],
    partial_failure: bool,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UploadResponse {
    partial_failure_error: Option<Status>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Status {
    message: String,
    details: Vec<FailureDetail>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FailureDetail {
    errors: Vec<AdsError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AdsError {
    error_code: HashMap<String, Value>,
    message: String,
    location: Option<ErrorLocation>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ErrorLocation {
    field_path_elements: Vec<FieldPathElement>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct FieldPathElement {
    field_name: String,
    index: Option<usize>,
}

impl AdsError {
    /// Index into the uploaded `conversions` array, if the error names one.
    fn conversion_index(&self) -> Option<usize> {
        self.location
            .as_ref()?
            .field_path_elements
            .iter()
            .find(|e| e.field_name == "conversions")
            .and_then(|e| e.index)
    }

    /// Enum value of the error code, e.g. `UNPARSEABLE_GCLID`.
    fn code(&self) -> String {
        self.error_code
            .values()
            .find_map(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "PARTIAL_FAILURE".to_string())
    }
}

/// Offline conversion uploads to the Google Ads REST API.
pub struct GoogleAdsAdapter {
    client: Client,
    config: GoogleAdsConfig,
}

impl GoogleAdsAdapter {
    pub fn new(config: GoogleAdsConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ProviderError::Transient(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn credentials(credentials: &ProviderCredentials) -> &GoogleAdsCredentials {
        match credentials {
            ProviderCredentials::GoogleAds(creds) => creds,
        }
    }

    fn conversion_action<'a>(&'a self, creds: &'a GoogleAdsCredentials) -> Result<&'a str, ProviderError> {
        if !creds.conversion_action.is_empty() {
            return Ok(&creds.conversion_action);
        }
        self.config
            .conversion_action
            .as_deref()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| ProviderError::Validation("no conversion action configured".to_string()))
    }

    fn upload_url(&self, creds: &GoogleAdsCredentials) -> String {
        format!(
            "{}/{}/customers/{}:uploadClickConversions",
            self.config.api_base.trim_end_matches('/'),
            self.config.api_version,
            digits(&creds.customer_id)
        )
    }

    /// Exchange the refresh token for an access token.
    async fn access_token(&self, creds: &GoogleAdsCredentials) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(&self.config.token_url)
            .json(&serde_json::json!({
                "grant_type": "refresh_token",
                "client_id": creds.client_id,
                "client_secret": creds.client_secret,
                "refresh_token": creds.refresh_token,
            }))
            .send()
            .await
            .map_err(send_error)?;

        let status = response.status();
        if !status.is_success() {
            let err = error_from_response(response).await;
            // A rejected refresh token is an auth failure whatever the status.
            return Err(match (status.as_u16(), err) {
                (400, ProviderError::Validation(m)) => ProviderError::Auth(m),
                (_, err) => err,
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("token response: {}", e)))?;
        Ok(token.access_token)
    }

    fn build_conversion(row: &QueueRow, kind: ClickIdKind, click_id: &str, action: &str) -> ClickConversion {
        let conversion_date_time = format_conversion_time(row.conversion_time);
        let order_id = order_id(click_id, action, &conversion_date_time);
        let id = Some(click_id.to_string());
        ClickConversion {
            gclid: if kind == ClickIdKind::Gclid { id.clone() } else { None },
            wbraid: if kind == ClickIdKind::Wbraid { id.clone() } else { None },
            gbraid: if kind == ClickIdKind::Gbraid { id } else { None },
            conversion_action: action.to_string(),
            conversion_date_time,
            conversion_value: row.value_cents as f64 / 100.0,
            currency_code: row.currency.clone(),
            order_id,
        }
    }

    async fn post_batch(
        &self,
        creds: &GoogleAdsCredentials,
        conversions: &[ClickConversion],
    ) -> Result<UploadResponse, ProviderError> {
        let access_token = self.access_token(creds).await?;

        let mut request = self
            .client
            .post(self.upload_url(creds))
            .bearer_auth(access_token)
            .header("developer-token", &creds.developer_token)
            .json(&UploadRequest {
                conversions,
                partial_failure: true,
            });
        if let Some(login) = creds.login_customer_id.as_deref() {
            request = request.header("login-customer-id", digits(login));
        }

        let response = request.send().await.map_err(send_error)?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("upload response: {}", e)))
    }
}

fn send_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Transient("request timed out".to_string())
    } else {
        ProviderError::Transient(e.to_string())
    }
}

/// Turn a non-success response into a classified error.
async fn error_from_response(response: Response) -> ProviderError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_retry_after(v, Utc::now()));
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| {
            let err = v.get("error")?;
            let text = err
                .get("message")
                .or_else(|| err.get("error_description"))
                .and_then(Value::as_str)
                .or_else(|| err.as_str())?;
            Some(match err.get("status").and_then(Value::as_str) {
                Some(code) => format!("{}: {}", code, text),
                None => text.to_string(),
            })
        })
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

    match classify_status(status.as_u16()).category {
        ErrorCategory::Auth => ProviderError::Auth(message),
        ErrorCategory::RateLimit => ProviderError::RateLimited { retry_after },
        ErrorCategory::Validation => ProviderError::Validation(message),
        ErrorCategory::Transient => ProviderError::Transient(message),
    }
}

/// Code stored on rows caught in a whole-batch failure.
fn batch_error_code(error: &ProviderError) -> &'static str {
    match error {
        ProviderError::Auth(_) => "AUTH_FAILED",
        ProviderError::RateLimited { .. } => "RATE_LIMITED",
        ProviderError::Validation(_) => "INVALID_ARGUMENT",
        ProviderError::Transient(_) => "TRANSIENT",
        ProviderError::UnsupportedProvider(_) => "UNSUPPORTED",
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdsAdapter {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn verify_credentials(&self, credentials: &ProviderCredentials) -> Result<(), ProviderError> {
        let creds = Self::credentials(credentials);
        self.conversion_action(creds)?;
        self.access_token(creds).await.map(|_| ())
    }

    async fn upload_conversions(
        &self,
        jobs: &[QueueRow],
        credentials: &ProviderCredentials,
    ) -> Result<Vec<UploadResult>, ProviderError> {
        let creds = Self::credentials(credentials);

        let mut results: Vec<Option<UploadResult>> = vec![None; jobs.len()];
        // wire position → position in `jobs`
        let mut wire_positions = Vec::new();
        let mut wire = Vec::new();

        let action = match self.conversion_action(creds) {
            Ok(action) => Some(action),
            Err(e) => {
                warn!(customer_id = %creds.customer_id, error = %e, "Google Ads credentials incomplete");
                for (slot, job) in results.iter_mut().zip(jobs) {
                    *slot = Some(UploadResult::from_error(job.id, "MISSING_CONVERSION_ACTION", &e));
                }
                None
            }
        };

        if let Some(action) = action {
            for (pos, job) in jobs.iter().enumerate() {
                match job.click_ids.primary() {
                    Some((kind, click_id)) => {
                        wire_positions.push(pos);
                        wire.push(Self::build_conversion(job, kind, click_id, action));
                    }
                    None => {
                        results[pos] = Some(UploadResult::classified(
                            job.id,
                            MISSING_CLICK_ID,
                            ErrorCategory::Validation,
                            "conversion has no gclid, wbraid or gbraid",
                            None,
                        ));
                    }
                }
            }
        }

        if !wire.is_empty() {
            match self.post_batch(creds, &wire).await {
                Ok(response) => {
                    let mut failed: HashMap<usize, UploadResult> = HashMap::new();
                    if let Some(status) = response.partial_failure_error {
                        let indexed: Vec<_> = status
                            .details
                            .iter()
                            .flat_map(|d| &d.errors)
                            .filter_map(|e| e.conversion_index().map(|i| (i, e)))
                            .filter(|(i, _)| *i < wire_positions.len())
                            .collect();

                        if indexed.is_empty() {
                            // Partial failure we cannot attribute: treat the batch as failed.
                            let category = classify_message(&status.message);
                            for &pos in &wire_positions {
                                failed.insert(
                                    pos,
                                    UploadResult::classified(
                                        jobs[pos].id,
                                        "PARTIAL_FAILURE",
                                        category,
                                        status.message.clone(),
                                        None,
                                    ),
                                );
                            }
                        }
                        for (index, err) in indexed {
                            let pos = wire_positions[index];
                            let code = err.code();
                            let category = classify_message(&format!("{} {}", code, err.message));
                            failed.entry(pos).or_insert_with(|| {
                                UploadResult::classified(
                                    jobs[pos].id,
                                    code,
                                    category,
                                    err.message.clone(),
                                    None,
                                )
                            });
                        }
                    }

                    info!(
                        customer_id = %creds.customer_id,
                        uploaded = wire_positions.len() - failed.len(),
                        failed = failed.len(),
                        "Google Ads upload finished"
                    );
                    for &pos in &wire_positions {
                        results[pos] = Some(
                            failed
                                .remove(&pos)
                                .unwrap_or_else(|| UploadResult::completed(jobs[pos].id)),
                        );
                    }
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!(customer_id = %creds.customer_id, error = %e, "Google Ads upload deferred");
                    } else {
                        error!(customer_id = %creds.customer_id, error = %e, "Google Ads upload rejected");
                    }
                    let code = batch_error_code(&e);
                    for &pos in &wire_positions {
                        results[pos] = Some(UploadResult::from_error(jobs[pos].id, code, &e));
                    }
                }
            }
        } else {
            debug!(customer_id = %creds.customer_id, "Nothing to send to Google Ads");
        }

        Ok(results
            .into_iter()
            .zip(jobs)
            .map(|(result, job)| result.unwrap_or_else(|| UploadResult::completed(job.id)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_time_format() {
        let at = DateTime::parse_from_rfc3339("2026-03-04T05:06:07Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_conversion_time(at), "2026-03-04 05:06:07+00:00");
    }

    #[test]
    fn test_order_id_is_stable_and_short() {
        let a = order_id("g-1", "customers/1/conversionActions/2", "2026-03-04 05:06:07+00:00");
        let b = order_id("g-1", "customers/1/conversionActions/2", "2026-03-04 05:06:07+00:00");
        let c = order_id("g-2", "customers/1/conversionActions/2", "2026-03-04 05:06:07+00:00");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_partial_failure_parsing() {
        let body = serde_json::json!({
            "partialFailureError": {
                "code": 3,
                "message": "Multiple errors in details",
                "details": [{
                    "@type": "type.googleapis.com/google.ads.googleads.v17.errors.GoogleAdsFailure",
                    "errors": [{
                        "errorCode": {"conversionUploadError": "UNPARSEABLE_GCLID"},
                        "message": "The click identifier could not be decoded.",
                        "location": {"fieldPathElements": [
                            {"fieldName": "conversions", "index": 1},
                            {"fieldName": "gclid"}
                        ]}
                    }]
                }]
            },
            "results": [{}, {}]
        });
        let response: UploadResponse = serde_json::from_value(body).unwrap();
        let status = response.partial_failure_error.unwrap();
        let err = &status.details[0].errors[0];
        assert_eq!(err.conversion_index(), Some(1));
        assert_eq!(err.code(), "UNPARSEABLE_GCLID");
    }

    #[test]
    fn test_customer_id_digits_only() {
        assert_eq!(digits("123-456-7890"), "1234567890");
    }
}
