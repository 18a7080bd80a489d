//! HTTP response shapes.
//!
//! Success bodies are `{status}`; errors are `{error, hint?}`. A 401 never
//! carries a hint or any detail about which check failed.

use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use crate::bus::BusError;
use crate::config::DEFAULT_SKIP_HEADER;
use crate::error::{Classify, ErrorClass};
use crate::export::ExportError;
use crate::ingress::{GateRejection, CONSENT_HINT};
use crate::interfaces::{CollaboratorError, StoreError};
use crate::ratelimit::RateLimitError;

#[derive(Debug, Serialize)]
struct StatusBody {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

/// `200 {status:"noop"}` for a replayed envelope.
pub fn noop() -> Response {
    (StatusCode::OK, Json(StatusBody { status: "noop" })).into_response()
}

/// `202 {status:"queued"}` once the job is on the queue.
pub fn queued() -> Response {
    (StatusCode::ACCEPTED, Json(StatusBody { status: "queued" })).into_response()
}

/// Empty 204 with the diagnostic skip header. Identical for "no session" and
/// "no consent".
pub fn gated(skip_header: &str) -> Response {
    let name = HeaderName::from_bytes(skip_header.as_bytes())
        .unwrap_or_else(|_| HeaderName::from_static(DEFAULT_SKIP_HEADER));
    (
        StatusCode::NO_CONTENT,
        [(name, HeaderValue::from_static("gated"))],
    )
        .into_response()
}

/// An error answered to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: String,
    pub hint: Option<String>,
    pub retry_after_secs: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            hint: None,
            retry_after_secs: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    pub fn rate_limited(retry_after_secs: Option<u64>) -> Self {
        Self {
            retry_after_secs,
            ..Self::new(StatusCode::TOO_MANY_REQUESTS, "rate limited")
        }
    }

    /// Internal failure. The detail is logged, never sent.
    pub fn internal(detail: impl std::fmt::Display) -> Self {
        error!(error = %detail, "Request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }

    /// Generic mapping for errors that only carry a class.
    fn from_class(class: ErrorClass, detail: impl std::fmt::Display) -> Self {
        match class {
            ErrorClass::Auth => Self::unauthorized(),
            ErrorClass::Validation => Self::bad_request(detail.to_string()),
            ErrorClass::RateLimit => Self::rate_limited(None),
            ErrorClass::Duplicate | ErrorClass::Transient | ErrorClass::Permanent => {
                Self::internal(detail)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let hint = if self.status == StatusCode::UNAUTHORIZED {
            None
        } else {
            self.hint
        };
        let mut response = (
            self.status,
            Json(ErrorBody {
                error: self.error,
                hint,
            }),
        )
            .into_response();
        if let Some(secs) = self.retry_after_secs {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<GateRejection> for ApiError {
    fn from(rejection: GateRejection) -> Self {
        match rejection {
            GateRejection::Unauthorized(_) => ApiError::unauthorized(),
            GateRejection::PayloadTooLarge { .. } => {
                ApiError::new(StatusCode::PAYLOAD_TOO_LARGE, "payload too large")
            }
            GateRejection::Forbidden(field) => {
                ApiError::bad_request(format!("forbidden field: {}", field)).with_hint(CONSENT_HINT)
            }
            GateRejection::Invalid(reason) => ApiError::bad_request(format!("invalid body: {}", reason)),
        }
    }
}

impl From<RateLimitError> for ApiError {
    fn from(e: RateLimitError) -> Self {
        ApiError::rate_limited(e.retry_after_secs())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::from_class(e.class(), e)
    }
}

impl From<CollaboratorError> for ApiError {
    fn from(e: CollaboratorError) -> Self {
        ApiError::internal(e)
    }
}

impl From<BusError> for ApiError {
    fn from(e: BusError) -> Self {
        ApiError::internal(e)
    }
}

impl From<ExportError> for ApiError {
    fn from(e: ExportError) -> Self {
        ApiError::from_class(e.class(), e)
    }
}
