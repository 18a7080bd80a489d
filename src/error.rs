//! Error taxonomy shared by every pipeline stage.
//!
//! Each module owns its own `thiserror` enum. They all map onto the same
//! small set of classes so retry and dead-letter decisions do not depend on
//! which component raised the error.

use std::fmt;

/// Coarse error class driving HTTP status, retry and dead-letter decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Bad, missing or expired signature; tenant binding mismatch.
    Auth,
    /// Malformed body, forbidden field, oversized payload, missing identifier.
    Validation,
    /// Too many requests for a scope (local or upstream).
    RateLimit,
    /// Idempotency or replay hit. Callers treat this as success.
    Duplicate,
    /// Timeout, network failure, 5xx, backing store unavailable.
    Transient,
    /// Will never succeed on retry.
    Permanent,
}

impl ErrorClass {
    /// Whether the queue should redeliver work that failed with this class.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::Transient | ErrorClass::RateLimit)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Auth => "auth",
            ErrorClass::Validation => "validation",
            ErrorClass::RateLimit => "rate_limit",
            ErrorClass::Duplicate => "duplicate",
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by every module error so callers can classify uniformly.
pub trait Classify {
    fn class(&self) -> ErrorClass;

    fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }
}
