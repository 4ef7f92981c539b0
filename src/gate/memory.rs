//! In-process counter store.
//!
//! Keeps per-key hit timestamps in a mutex-guarded map. Suitable for a single
//! instance or for tests; multi-instance deployments want the Redis store so
//! all replicas share one window.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::limiter::{now_unix_ms, CounterStore, WindowState};
use crate::error::{AuthError, Result};

#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    hits: Mutex<HashMap<String, Vec<u64>>>,
}

impl MemoryCounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record_at(&self, key: &str, window: Duration, now_ms: u64) -> Result<WindowState> {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        let cutoff = now_ms.saturating_sub(window_ms);

        let mut hits = self
            .hits
            .lock()
            .map_err(|_| AuthError::Internal("counter store lock poisoned".to_string()))?;

        // Prune every key so idle buckets do not accumulate.
        hits.retain(|_, stamps| {
            stamps.retain(|stamp| *stamp > cutoff);
            !stamps.is_empty()
        });

        let stamps = hits.entry(key.to_string()).or_default();
        stamps.push(now_ms);

        Ok(WindowState {
            count: stamps.len() as u64,
            oldest_ms: stamps.first().copied().unwrap_or(now_ms),
        })
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn record(&self, key: &str, window: Duration) -> Result<WindowState> {
        self.record_at(key, window, now_unix_ms())
    }
}
