//! Upstream error classification.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::model::ErrorCategory;

/// How a provider HTTP status should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusClass {
    pub category: ErrorCategory,
    pub retryable: bool,
}

/// 401/403 → auth; 429 → rate limit; other 4xx → validation; 5xx → transient.
pub fn classify_status(status: u16) -> StatusClass {
    let category = match status {
        401 | 403 => ErrorCategory::Auth,
        429 => ErrorCategory::RateLimit,
        400..=499 => ErrorCategory::Validation,
        _ => ErrorCategory::Transient,
    };
    StatusClass {
        category,
        retryable: category.is_retryable(),
    }
}

/// Bucket a free-text provider error message.
pub fn classify_message(message: &str) -> ErrorCategory {
    let lower = message.to_ascii_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if any(&[
        "unauthenticated",
        "authentication",
        "authorization",
        "permission_denied",
        "permission denied",
        "oauth",
        "developer_token",
        "customer_not_enabled",
    ]) {
        ErrorCategory::Auth
    } else if any(&[
        "resource_exhausted",
        "rate_exceeded",
        "rate limit",
        "quota",
        "too many requests",
    ]) {
        ErrorCategory::RateLimit
    } else if any(&[
        "internal_error",
        "internal error",
        "unavailable",
        "deadline_exceeded",
        "timeout",
        "try again",
        "transient",
    ]) {
        ErrorCategory::Transient
    } else {
        ErrorCategory::Validation
    }
}

/// Parse a `Retry-After` value: delta seconds or an HTTP date.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let ms = (at.with_timezone(&Utc) - now).num_milliseconds().max(0) as u64;
    Some(Duration::from_millis(ms))
}
