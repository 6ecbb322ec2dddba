use async_trait::async_trait;
use dashmap::DashMap;
use redis::Script;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::timeout;

use crate::error::{Error, ErrorDetails};
use crate::rate_limit::RateLimitKey;

/// Current Unix timestamp. Returns 0 if system time is before UNIX_EPOCH
/// (extremely rare).
pub(crate) fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Post-increment state of a fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Count including the request that triggered this increment.
    pub count: u32,
    /// Unix timestamp at which the window resets.
    pub reset_at: u64,
}

/// Shared counter store backing the rate limiter.
///
/// `increment` must be atomic increment-and-read; two concurrent requests
/// for the same key must observe distinct counts. Implementations never
/// expose a read-then-write pair.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn increment(&self, key: &RateLimitKey, window: Duration) -> Result<WindowCount, Error>;
}

/// Redis-backed counter store.
///
/// The increment, expiry, and TTL read run as a single Lua script so the
/// window starts atomically with its first request. All calls are bounded
/// by the configured timeout; a slow or unreachable Redis surfaces
/// `BackendUnavailable`, which the limiter treats per the class's fail
/// policy.
pub struct RedisCounterStore {
    conn: redis::aio::MultiplexedConnection,
    script: Script,
    timeout: Duration,
}

const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('TTL', KEYS[1])
if ttl < 0 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
";

impl RedisCounterStore {
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self, Error> {
        let client = redis::Client::open(url).map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!("Failed to create Redis client: {e}"),
            })
        })?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                Error::new(ErrorDetails::Config {
                    message: format!("Failed to get Redis connection: {e}"),
                })
            })?;
        Ok(Self {
            conn,
            script: Script::new(INCREMENT_SCRIPT),
            timeout: op_timeout,
        })
    }

    async fn run_script(
        &self,
        key: &RateLimitKey,
        window: Duration,
    ) -> Result<Vec<i64>, redis::RedisError> {
        let mut conn = self.conn.clone();
        self.script
            .key(key.storage_key())
            .arg(window.as_secs())
            .invoke_async(&mut conn)
            .await
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &RateLimitKey, window: Duration) -> Result<WindowCount, Error> {
        let result = match timeout(self.timeout, self.run_script(key, window)).await {
            Ok(Ok(values)) => values,
            Ok(Err(e)) => {
                return Err(Error::new(ErrorDetails::BackendUnavailable {
                    message: e.to_string(),
                }))
            }
            Err(_) => {
                return Err(Error::new(ErrorDetails::BackendUnavailable {
                    message: format!("timed out after {}ms", self.timeout.as_millis()),
                }))
            }
        };

        if result.len() < 2 {
            return Err(Error::new(ErrorDetails::BackendUnavailable {
                message: "malformed script response".to_string(),
            }));
        }

        let count = u32::try_from(result[0]).unwrap_or(u32::MAX);
        let ttl = u64::try_from(result[1]).unwrap_or(window.as_secs());
        Ok(WindowCount {
            count,
            reset_at: unix_timestamp() + ttl,
        })
    }
}

// Keep the fallback table from growing without bound under churning keys.
const MEMORY_STORE_PURGE_THRESHOLD: usize = 10_000;

/// Process-local fixed-window counters.
///
/// Used as the degraded path when the shared store is unreachable, and as
/// the only store when no Redis URL is configured. Counts are per-instance
/// and best-effort; window semantics match the shared store, including the
/// reset happening atomically with the first request of a new window (the
/// entry guard holds the shard lock for the whole mutation).
#[derive(Default)]
pub struct MemoryCounterStore {
    windows: DashMap<String, Window>,
}

#[derive(Debug)]
struct Window {
    started_at: u64,
    count: u32,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn increment_at(
        &self,
        key: &RateLimitKey,
        window: Duration,
        now: u64,
    ) -> WindowCount {
        if self.windows.len() > MEMORY_STORE_PURGE_THRESHOLD {
            self.purge_expired(now);
        }

        let window_secs = window.as_secs();
        let mut entry = self.windows.entry(key.storage_key()).or_insert(Window {
            started_at: now,
            count: 0,
        });
        if now >= entry.started_at.saturating_add(window_secs) {
            entry.started_at = now;
            entry.count = 0;
        }
        entry.count = entry.count.saturating_add(1);
        WindowCount {
            count: entry.count,
            reset_at: entry.started_at + window_secs,
        }
    }

    fn purge_expired(&self, now: u64) {
        // Windows are small; a day is a safe upper bound on any class window.
        self.windows
            .retain(|_, w| now < w.started_at.saturating_add(86_400));
    }

    #[cfg(test)]
    pub(crate) fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &RateLimitKey, window: Duration) -> Result<WindowCount, Error> {
        Ok(self.increment_at(key, window, unix_timestamp()))
    }
}
