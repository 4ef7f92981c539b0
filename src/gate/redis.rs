//! Redis-backed counter store.
//!
//! Sliding window over a sorted set per key: prune entries older than the
//! window, add the current hit, then read the cardinality and the oldest
//! surviving score. The whole sequence runs in one MULTI/EXEC pipeline so
//! concurrent requests cannot interleave between prune and count.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use std::time::Duration;
use ulid::Ulid;

use super::limiter::{now_unix_ms, CounterStore, WindowState};
use crate::error::{AuthError, Result};

/// Extra TTL on top of the window so idle keys expire on their own.
const KEY_TTL_SLACK_SECONDS: i64 = 60;

#[derive(Clone)]
pub struct RedisCounterStore {
    conn_manager: ConnectionManager,
}

impl RedisCounterStore {
    /// Connect to Redis and keep a reconnecting connection manager.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|err| {
            AuthError::DependencyUnavailable(format!("invalid redis url: {err}"))
        })?;
        let conn_manager = ConnectionManager::new(client).await.map_err(|err| {
            AuthError::DependencyUnavailable(format!("redis connection failed: {err}"))
        })?;
        Ok(Self { conn_manager })
    }

    fn window_key(key: &str) -> String {
        format!("gate:window:{key}")
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn record(&self, key: &str, window: Duration) -> Result<WindowState> {
        let mut conn = self.conn_manager.clone();
        let window_key = Self::window_key(key);
        let now_ms = now_unix_ms();
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        let window_start = now_ms.saturating_sub(window_ms);

        // Members must be unique per hit; two hits in the same millisecond
        // would otherwise collapse into one sorted-set entry.
        let member = Ulid::new().to_string();
        let ttl_seconds = i64::try_from(window.as_secs())
            .unwrap_or(i64::MAX)
            .saturating_add(KEY_TTL_SLACK_SECONDS);

        let (count, oldest): (u64, Vec<(String, u64)>) = redis::pipe()
            .atomic()
            .zrembyscore(&window_key, 0, window_start)
            .ignore()
            .zadd(&window_key, member.as_str(), now_ms)
            .ignore()
            .zcard(&window_key)
            .zrange_withscores(&window_key, 0, 0)
            .expire(&window_key, ttl_seconds)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|err| {
                AuthError::DependencyUnavailable(format!("redis pipeline failed: {err}"))
            })?;

        Ok(WindowState {
            count,
            oldest_ms: oldest.first().map_or(now_ms, |(_, score)| *score),
        })
    }
}
