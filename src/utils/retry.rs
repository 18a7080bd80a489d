//! Backoff builders.
//!
//! Uses `backon` for exponential backoff. Jitter is enabled only where the
//! delay is slept on directly; delays persisted as `next_retry_at` are
//! deterministic.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};

use crate::config::WorkerConfig;

/// Redelivery backoff for failed worker jobs.
///
/// `max_attempts` counts deliveries, so the builder allows one fewer retry.
pub fn redelivery_backoff(config: &WorkerConfig) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(config.initial_backoff_ms))
        .with_max_delay(Duration::from_millis(config.max_backoff_ms))
        .with_max_times(config.max_attempts.saturating_sub(1) as usize)
        .with_jitter()
}

/// Backoff for opening backing resources at startup.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 30
/// - Jitter enabled
pub fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(30)
        .with_jitter()
}

/// Delay before the `attempt`-th export retry (1-based), without jitter.
pub fn export_retry_delay(attempt: u32) -> Duration {
    const MIN: Duration = Duration::from_secs(30);
    const MAX: Duration = Duration::from_secs(6 * 3600);

    ExponentialBuilder::default()
        .with_min_delay(MIN)
        .with_max_delay(MAX)
        .with_max_times(usize::MAX)
        .build()
        .nth(attempt.saturating_sub(1) as usize)
        .unwrap_or(MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_retry_delay_grows_and_caps() {
        assert_eq!(export_retry_delay(1), Duration::from_secs(30));
        assert_eq!(export_retry_delay(2), Duration::from_secs(60));
        assert_eq!(export_retry_delay(3), Duration::from_secs(120));
        assert_eq!(export_retry_delay(40), Duration::from_secs(6 * 3600));
    }

    #[test]
    fn test_redelivery_backoff_respects_max_attempts() {
        let config = WorkerConfig {
            max_attempts: 3,
            ..Default::default()
        };
        assert_eq!(redelivery_backoff(&config).build().count(), 2);
    }
}
