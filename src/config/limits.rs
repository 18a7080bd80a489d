//! Ingress limits and rate-limit scopes.
//!
//! | Scope                    | Default        | Policy          |
//! |--------------------------|----------------|-----------------|
//! | IP                       | 300 / minute   | degraded        |
//! | tenant + IP              | 120 / minute   | degraded        |
//! | tenant + fingerprint     | 60 / minute    | degraded        |
//! | unauthenticated failures | 20 / 5 minutes | fail-closed     |

use std::time::Duration;

use serde::Deserialize;

/// Maximum accepted request body (64 KiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

/// Maximum age of a signed timestamp.
pub const DEFAULT_MAX_PAST_SKEW_SECS: i64 = 300;

/// Maximum distance a signed timestamp may be ahead of server time.
pub const DEFAULT_MAX_FUTURE_SKEW_SECS: i64 = 60;

/// Lifetime of replay markers.
pub const DEFAULT_REPLAY_TTL_SECS: u64 = 600;

/// Diagnostic header attached to gated 204 responses.
pub const DEFAULT_SKIP_HEADER: &str = "x-callsignal-skip";

/// Signed ingress settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    pub max_body_bytes: usize,
    pub max_past_skew_secs: i64,
    pub max_future_skew_secs: i64,
    pub replay_ttl_secs: u64,
    /// Operator kill switch: skips header, timestamp, signature and binding
    /// checks. Logged at WARN on every request while active.
    pub verification_disabled: bool,
    pub skip_header: String,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_past_skew_secs: DEFAULT_MAX_PAST_SKEW_SECS,
            max_future_skew_secs: DEFAULT_MAX_FUTURE_SKEW_SECS,
            replay_ttl_secs: DEFAULT_REPLAY_TTL_SECS,
            verification_disabled: false,
            skip_header: DEFAULT_SKIP_HEADER.to_string(),
        }
    }
}

impl IngressConfig {
    pub fn replay_ttl(&self) -> Duration {
        Duration::from_secs(self.replay_ttl_secs)
    }
}

/// One fixed-window limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct WindowLimit {
    pub limit: u64,
    pub window_ms: u64,
}

impl WindowLimit {
    pub const fn new(limit: u64, window_ms: u64) -> Self {
        Self { limit, window_ms }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Rate-limit scopes applied after the ingress gate.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    pub per_ip: WindowLimit,
    pub per_tenant_ip: WindowLimit,
    pub per_tenant_fingerprint: WindowLimit,
    /// Unauthenticated failures per IP. Always fail-closed.
    pub auth_failures: WindowLimit,
    /// Local threshold used by the degraded policy while the counter store is down.
    pub fallback_max_requests: u64,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            per_ip: WindowLimit::new(300, 60_000),
            per_tenant_ip: WindowLimit::new(120, 60_000),
            per_tenant_fingerprint: WindowLimit::new(60, 60_000),
            auth_failures: WindowLimit::new(20, 300_000),
            fallback_max_requests: 30,
        }
    }
}
