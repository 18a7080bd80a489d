//! Fixed-window rate limiting over a shared counter store.
//!
//! Each scope is an independent counter keyed by its scope key. A request
//! must pass every scope it belongs to. When the counter store is down, the
//! scope's policy decides what happens:
//!
//! - [`Policy::Degraded`]: fall back to a small per-process window
//!   ([`DegradedFallback`]).
//! - [`Policy::FailClosed`]: reject ([`FailClosed`]). Used for
//!   unauthenticated-failure tracking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::{RateLimitsConfig, WindowLimit};
use crate::error::{Classify, ErrorClass};
use crate::interfaces::counter_store::window_start;
use crate::interfaces::{CounterSnapshot, CounterStore};
use crate::model::CanonicalTenantId;
use crate::storage::memory::DEFAULT_SWEEP_THRESHOLD;

/// Behaviour when the counter store is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Degraded,
    FailClosed,
}

/// One rate-limit scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub key: String,
    pub limit: WindowLimit,
    pub policy: Policy,
}

impl Scope {
    pub fn new(key: impl Into<String>, limit: WindowLimit, policy: Policy) -> Self {
        Self {
            key: key.into(),
            limit,
            policy,
        }
    }

    pub fn ip(ip: &str, limit: WindowLimit) -> Self {
        Self::new(format!("rl:ip:{}", ip), limit, Policy::Degraded)
    }

    pub fn tenant_ip(tenant: CanonicalTenantId, ip: &str, limit: WindowLimit) -> Self {
        Self::new(format!("rl:tip:{}:{}", tenant, ip), limit, Policy::Degraded)
    }

    pub fn tenant_fingerprint(tenant: CanonicalTenantId, fingerprint: &str, limit: WindowLimit) -> Self {
        Self::new(format!("rl:tfp:{}:{}", tenant, fingerprint), limit, Policy::Degraded)
    }

    pub fn auth_failures(ip: &str, limit: WindowLimit) -> Self {
        Self::new(format!("rl:authfail:{}", ip), limit, Policy::FailClosed)
    }
}

/// Result of an allowed check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

impl Decision {
    fn from_snapshot(snapshot: CounterSnapshot, limit: u64) -> Self {
        Self {
            allowed: snapshot.count <= limit,
            remaining: limit.saturating_sub(snapshot.count),
            reset_at: snapshot.reset_at,
        }
    }

    /// Whole seconds until the window resets, at least 1.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let ms = (self.reset_at - now).num_milliseconds().max(0) as u64;
        ms.div_ceil(1000).max(1)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Rate limit exceeded for {scope}")]
    Limited {
        scope: String,
        retry_after_secs: u64,
        reset_at: DateTime<Utc>,
    },

    #[error("Rate limiter unavailable for {scope}: {reason}")]
    Unavailable { scope: String, reason: String },
}

impl RateLimitError {
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            RateLimitError::Limited {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            RateLimitError::Unavailable { .. } => None,
        }
    }
}

impl Classify for RateLimitError {
    fn class(&self) -> ErrorClass {
        // Fail-closed unavailability answers the client exactly like a limit hit.
        ErrorClass::RateLimit
    }
}

/// Strategy applied when the counter store cannot be reached.
pub trait FallbackStrategy: Send + Sync {
    fn on_unavailable(
        &self,
        scope: &Scope,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Decision, RateLimitError>;
}

/// Per-process fixed window with a small, fixed ceiling.
///
/// Windows that have ended are swept once the map grows past
/// `sweep_threshold` keys.
pub struct DegradedFallback {
    max_requests: u64,
    sweep_threshold: usize,
    windows: Mutex<HashMap<String, LocalWindow>>,
}

struct LocalWindow {
    start: DateTime<Utc>,
    reset_at: DateTime<Utc>,
    count: u64,
}

impl DegradedFallback {
    pub fn new(max_requests: u64) -> Self {
        Self::with_sweep_threshold(max_requests, DEFAULT_SWEEP_THRESHOLD)
    }

    pub fn with_sweep_threshold(max_requests: u64, sweep_threshold: usize) -> Self {
        Self {
            max_requests,
            sweep_threshold,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Keys currently held, including ended windows not yet swept.
    pub fn tracked(&self) -> usize {
        self.windows.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl FallbackStrategy for DegradedFallback {
    fn on_unavailable(
        &self,
        scope: &Scope,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Decision, RateLimitError> {
        warn!(scope = %scope.key, reason = %reason, "Counter store unavailable, using local fallback");
        let window = scope.limit.window();
        let start = window_start(now, window);
        let reset_at = start + chrono::Duration::milliseconds(scope.limit.window_ms as i64);
        let limit = self.max_requests.min(scope.limit.limit);

        let count = {
            let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
            if windows.len() >= self.sweep_threshold && !windows.contains_key(&scope.key) {
                windows.retain(|_, local| local.reset_at > now);
            }
            let entry = windows.entry(scope.key.clone()).or_insert(LocalWindow {
                start,
                reset_at,
                count: 0,
            });
            if entry.start != start {
                *entry = LocalWindow {
                    start,
                    reset_at,
                    count: 0,
                };
            }
            entry.count += 1;
            entry.count
        };

        Ok(Decision::from_snapshot(CounterSnapshot { count, reset_at }, limit))
    }
}

/// Reject while the counter store is unavailable.
pub struct FailClosed;

impl FallbackStrategy for FailClosed {
    fn on_unavailable(
        &self,
        scope: &Scope,
        reason: &str,
        _now: DateTime<Utc>,
    ) -> Result<Decision, RateLimitError> {
        warn!(scope = %scope.key, reason = %reason, "Counter store unavailable, failing closed");
        Err(RateLimitError::Unavailable {
            scope: scope.key.clone(),
            reason: reason.to_string(),
        })
    }
}

/// Checks scopes against the counter store.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    degraded: Arc<dyn FallbackStrategy>,
    fail_closed: Arc<dyn FallbackStrategy>,
    limits: RateLimitsConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, limits: RateLimitsConfig) -> Self {
        Self {
            store,
            degraded: Arc::new(DegradedFallback::new(limits.fallback_max_requests)),
            fail_closed: Arc::new(FailClosed),
            limits,
        }
    }

    pub fn limits(&self) -> &RateLimitsConfig {
        &self.limits
    }

    /// Atomically count one request against `scope`.
    pub async fn check(&self, scope: &Scope, now: DateTime<Utc>) -> Result<Decision, RateLimitError> {
        let decision = match self.store.increment(&scope.key, scope.limit.window(), now).await {
            Ok(snapshot) => Decision::from_snapshot(snapshot, scope.limit.limit),
            Err(e) => {
                let reason = e.to_string();
                match scope.policy {
                    Policy::Degraded => self.degraded.on_unavailable(scope, &reason, now)?,
                    Policy::FailClosed => self.fail_closed.on_unavailable(scope, &reason, now)?,
                }
            }
        };

        if decision.allowed {
            Ok(decision)
        } else {
            Err(RateLimitError::Limited {
                scope: scope.key.clone(),
                retry_after_secs: decision.retry_after_secs(now),
                reset_at: decision.reset_at,
            })
        }
    }

    /// Every scope must pass. Returns the tightest decision.
    pub async fn check_all(
        &self,
        scopes: &[Scope],
        now: DateTime<Utc>,
    ) -> Result<Decision, RateLimitError> {
        let mut tightest: Option<Decision> = None;
        for scope in scopes {
            let decision = self.check(scope, now).await?;
            tightest = Some(match tightest {
                Some(current) if current.remaining <= decision.remaining => current,
                _ => decision,
            });
        }
        Ok(tightest.unwrap_or(Decision {
            allowed: true,
            remaining: u64::MAX,
            reset_at: now,
        }))
    }

    /// The three request scopes applied after authentication.
    pub fn request_scopes(&self, tenant: CanonicalTenantId, ip: &str, fingerprint: &str) -> Vec<Scope> {
        vec![
            Scope::ip(ip, self.limits.per_ip),
            Scope::tenant_ip(tenant, ip, self.limits.per_tenant_ip),
            Scope::tenant_fingerprint(tenant, fingerprint, self.limits.per_tenant_fingerprint),
        ]
    }

    /// Count an unauthenticated failure from `ip`. Fail-closed.
    pub async fn record_auth_failure(&self, ip: &str, now: DateTime<Utc>) -> Result<Decision, RateLimitError> {
        self.check(&Scope::auth_failures(ip, self.limits.auth_failures), now)
            .await
    }
}
