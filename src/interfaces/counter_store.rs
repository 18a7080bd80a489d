//! Atomic counters and replay markers.
//!
//! Both are cache-shaped: values expire on their own and nothing else
//! depends on them surviving a restart.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::Result;

/// Counter value inside the current fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub count: u64,
    pub reset_at: DateTime<Utc>,
}

/// Fixed-window counter service.
///
/// Windows are aligned to multiples of the window length since the epoch, so
/// every caller computes the same window for the same instant.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key` in the window containing `now`.
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<CounterSnapshot>;

    /// Atomically decrement `key` in the window containing `now`, saturating at zero.
    async fn decrement(&self, key: &str, window: Duration, now: DateTime<Utc>) -> Result<u64>;

    /// Read `key` in the window containing `now`.
    async fn get(&self, key: &str, window: Duration, now: DateTime<Utc>)
        -> Result<CounterSnapshot>;
}

/// Recently-seen envelope markers.
#[async_trait]
pub trait ReplayStore: Send + Sync {
    /// Record `key` for `ttl`. Returns `true` if it was already present (a replay).
    async fn check_and_record(&self, key: &str, ttl: Duration, now: DateTime<Utc>)
        -> Result<bool>;

    /// Drop the marker for `key` so the same envelope can be accepted again.
    async fn forget(&self, key: &str) -> Result<()>;
}

/// Start of the fixed window containing `now`.
pub fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    let window_ms = (window.as_millis() as i64).max(1);
    let now_ms = now.timestamp_millis();
    let start_ms = now_ms.div_euclid(window_ms) * window_ms;
    DateTime::from_timestamp_millis(start_ms).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_start_alignment() {
        let now = DateTime::from_timestamp_millis(125_500).unwrap();
        let start = window_start(now, Duration::from_secs(60));
        assert_eq!(start.timestamp_millis(), 120_000);
    }

    #[test]
    fn test_window_start_on_boundary() {
        let now = DateTime::from_timestamp_millis(120_000).unwrap();
        assert_eq!(
            window_start(now, Duration::from_secs(60)).timestamp_millis(),
            120_000
        );
    }
}
