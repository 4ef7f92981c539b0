//! Sliding-window rate limiting.
//!
//! The limiter owns the window geometry (capacity and duration) and delegates
//! hit accounting to a [`CounterStore`]. Stores must record the hit and report
//! the window state atomically so concurrent callers cannot both land on the
//! last remaining slot.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

use crate::error::Result;

/// Outcome of a rate-limit check for one key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RateLimitInfo {
    /// `false` when the hit that produced this info exceeded the capacity.
    pub allowed: bool,
    /// Configured capacity for the window.
    pub limit: u32,
    /// Slots left in the window after this hit.
    pub remaining: u32,
    /// Unix seconds at which the oldest recorded hit leaves the window.
    pub reset_at: u64,
}

impl RateLimitInfo {
    /// Seconds until the window frees a slot, measured from `now_unix`.
    #[must_use]
    pub const fn retry_after_seconds(&self, now_unix: u64) -> u64 {
        self.reset_at.saturating_sub(now_unix)
    }
}

/// Window state reported by a store after recording a hit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WindowState {
    /// Hits inside the window, including the one just recorded.
    pub count: u64,
    /// Timestamp in unix milliseconds of the oldest hit still in the window.
    pub oldest_ms: u64,
}

/// Storage backend for sliding-window hit accounting.
///
/// `record` must prune hits older than `window`, add the current hit, and
/// report the resulting state in a single atomic step.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn record(&self, key: &str, window: Duration) -> Result<WindowState>;
}

/// Sliding-window limiter over a pluggable counter store.
///
/// A store failure never blocks traffic: the check logs a warning and reports
/// an untouched window, so a counter outage degrades to no throttling instead
/// of an outage of everything behind the gate.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    capacity: u32,
    window: Duration,
}

impl RateLimiter {
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>, capacity: u32, window: Duration) -> Self {
        Self {
            store,
            capacity,
            window,
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Record a hit for `key` and report whether it fits the window.
    pub async fn limit(&self, key: &str) -> RateLimitInfo {
        match self.store.record(key, self.window).await {
            Ok(state) => {
                let capacity = u64::from(self.capacity);
                let remaining = capacity.saturating_sub(state.count);
                RateLimitInfo {
                    allowed: state.count <= capacity,
                    limit: self.capacity,
                    remaining: u32::try_from(remaining).unwrap_or(self.capacity),
                    reset_at: (state.oldest_ms + window_millis(self.window)).div_ceil(1000),
                }
            }
            Err(err) => {
                warn!("Rate limit store unavailable, allowing request: {err}");
                RateLimitInfo {
                    allowed: true,
                    limit: self.capacity,
                    remaining: self.capacity,
                    reset_at: now_unix_ms().div_ceil(1000) + self.window.as_secs(),
                }
            }
        }
    }
}

/// Current time as unix milliseconds.
pub(crate) fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}

fn window_millis(window: Duration) -> u64 {
    u64::try_from(window.as_millis()).unwrap_or(u64::MAX)
}
