//! In-process fixed-window counters and replay markers.
//!
//! This is the production counter backend for a single node. Both maps are
//! swept of expired entries once they pass a size threshold, so memory stays
//! proportional to the keys active within one window.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::interfaces::counter_store::window_start;
use crate::interfaces::{CounterSnapshot, CounterStore, ReplayStore, Result, StoreError};

/// Map size above which expired entries are dropped on the next write.
pub const DEFAULT_SWEEP_THRESHOLD: usize = 10_000;

struct WindowCount {
    start: DateTime<Utc>,
    reset_at: DateTime<Utc>,
    count: u64,
}

/// Counter and replay store backed by hash maps.
///
/// `set_unavailable` makes every call fail, which is how tests exercise the
/// degraded and fail-closed rate-limit policies.
pub struct MemoryCounterStore {
    counters: RwLock<HashMap<String, WindowCount>>,
    replay: RwLock<HashMap<String, DateTime<Utc>>>,
    unavailable: RwLock<bool>,
    sweep_threshold: usize,
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::with_sweep_threshold(DEFAULT_SWEEP_THRESHOLD)
    }
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sweep_threshold(sweep_threshold: usize) -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            replay: RwLock::new(HashMap::new()),
            unavailable: RwLock::new(false),
            sweep_threshold,
        }
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }

    /// Live counter keys, including ones not yet swept.
    pub async fn counter_keys(&self) -> usize {
        self.counters.read().await.len()
    }

    pub async fn replay_keys(&self) -> usize {
        self.replay.read().await.len()
    }

    async fn check_available(&self, what: &str) -> Result<()> {
        if *self.unavailable.read().await {
            return Err(StoreError::Unavailable(format!("{} unavailable", what)));
        }
        Ok(())
    }
}

fn reset_at(start: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    start + chrono::Duration::milliseconds(window.as_millis() as i64)
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<CounterSnapshot> {
        self.check_available("counter store").await?;
        let start = window_start(now, window);
        let mut counters = self.counters.write().await;
        if counters.len() >= self.sweep_threshold && !counters.contains_key(key) {
            counters.retain(|_, entry| entry.reset_at > now);
        }
        let entry = counters.entry(key.to_string()).or_insert(WindowCount {
            start,
            reset_at: reset_at(start, window),
            count: 0,
        });
        if entry.start != start {
            entry.start = start;
            entry.reset_at = reset_at(start, window);
            entry.count = 0;
        }
        entry.count += 1;
        Ok(CounterSnapshot {
            count: entry.count,
            reset_at: entry.reset_at,
        })
    }

    async fn decrement(&self, key: &str, window: Duration, now: DateTime<Utc>) -> Result<u64> {
        self.check_available("counter store").await?;
        let start = window_start(now, window);
        let mut counters = self.counters.write().await;
        match counters.get_mut(key) {
            Some(entry) if entry.start == start => {
                entry.count = entry.count.saturating_sub(1);
                Ok(entry.count)
            }
            _ => Ok(0),
        }
    }

    async fn get(&self, key: &str, window: Duration, now: DateTime<Utc>) -> Result<CounterSnapshot> {
        self.check_available("counter store").await?;
        let start = window_start(now, window);
        let counters = self.counters.read().await;
        let count = counters
            .get(key)
            .filter(|entry| entry.start == start)
            .map_or(0, |entry| entry.count);
        Ok(CounterSnapshot {
            count,
            reset_at: reset_at(start, window),
        })
    }
}

#[async_trait]
impl ReplayStore for MemoryCounterStore {
    async fn check_and_record(&self, key: &str, ttl: Duration, now: DateTime<Utc>) -> Result<bool> {
        self.check_available("replay store").await?;
        let mut replay = self.replay.write().await;
        if let Some(expires_at) = replay.get(key) {
            if *expires_at > now {
                return Ok(true);
            }
        }
        if replay.len() >= self.sweep_threshold {
            replay.retain(|_, expires_at| *expires_at > now);
        }
        replay.insert(
            key.to_string(),
            now + chrono::Duration::milliseconds(ttl.as_millis() as i64),
        );
        Ok(false)
    }

    async fn forget(&self, key: &str) -> Result<()> {
        self.check_available("replay store").await?;
        self.replay.write().await.remove(key);
        Ok(())
    }
}
