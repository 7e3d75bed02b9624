//! Redis-backed quota store.
//!
//! Each quota operation is one Lua script so Redis executes it atomically:
//!
//! - Fixed window: `INCR` plus `PEXPIRE` when the counter is new
//! - Sliding window: `ZREMRANGEBYSCORE` + `ZCARD` + conditional `ZADD`
//! - Token bucket: a hash `{tokens, ts, ver}` written only when `ver` matches
//!
//! Connections go through `redis::aio::ConnectionManager`, which reconnects
//! on its own. Any Redis error surfaces as `StoreUnavailable`.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use std::fmt;
use std::time::Duration;

use super::{BucketState, QuotaStore, SlidingOutcome, WindowCount};
use crate::error::Result;

const FIXED_WINDOW_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])
if current == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
return {current, ttl}
"#;

const SLIDING_WINDOW_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local capacity = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - window)
local count = redis.call('ZCARD', KEYS[1])
local admitted = 0
if count < capacity then
    redis.call('ZADD', KEYS[1], now, ARGV[4])
    redis.call('PEXPIRE', KEYS[1], window)
    count = count + 1
    admitted = 1
end
local oldest = -1
local head = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
if head[2] then
    oldest = tonumber(head[2])
end
return {admitted, count, oldest}
"#;

const BUCKET_CAS_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'ver')
if ARGV[1] == '' then
    if current then
        return 0
    end
elseif current ~= ARGV[1] then
    return 0
end
redis.call('HSET', KEYS[1], 'tokens', ARGV[2], 'ts', ARGV[3], 'ver', ARGV[4])
redis.call('PEXPIRE', KEYS[1], ARGV[5])
return 1
"#;

/// Configuration for the Redis store.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis connection URL (default: "redis://127.0.0.1/")
    pub url: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1/".to_string(),
        }
    }
}

/// Quota store shared by every instance through Redis.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    config: RedisStoreConfig,
    fixed_window: Script,
    sliding_window: Script,
    bucket_cas: Script,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis at `url`.
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the first connection fails.
    pub async fn connect(url: &str) -> std::result::Result<Self, RedisError> {
        Self::connect_with_config(RedisStoreConfig {
            url: url.to_string(),
        })
        .await
    }

    /// Connect with an explicit configuration.
    pub async fn connect_with_config(
        config: RedisStoreConfig,
    ) -> std::result::Result<Self, RedisError> {
        let client = Client::open(config.url.as_str())?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self {
            connection,
            config,
            fixed_window: Script::new(FIXED_WINDOW_SCRIPT),
            sliding_window: Script::new(SLIDING_WINDOW_SCRIPT),
            bucket_cas: Script::new(BUCKET_CAS_SCRIPT),
        })
    }

    /// A handle to the underlying connection, for sharing with other Redis users.
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

fn millis(duration: Duration) -> u64 {
    (duration.as_millis() as u64).max(1)
}

#[async_trait]
impl QuotaStore for RedisStore {
    async fn increment_window(&self, key: &str, window: Duration) -> Result<WindowCount> {
        let mut conn = self.connection.clone();
        let (count, ttl_ms): (i64, i64) = self
            .fixed_window
            .key(key)
            .arg(millis(window))
            .invoke_async(&mut conn)
            .await?;

        // PTTL is negative when the key has no expiry; fall back to a full window.
        let resets_in = if ttl_ms >= 0 {
            Duration::from_millis(ttl_ms as u64)
        } else {
            window
        };

        Ok(WindowCount {
            count: count.max(0) as u64,
            resets_in,
        })
    }

    async fn admit_sliding(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
        capacity: u64,
        member: &str,
    ) -> Result<SlidingOutcome> {
        let mut conn = self.connection.clone();
        let (admitted, count, oldest): (i64, i64, i64) = self
            .sliding_window
            .key(key)
            .arg(now_ms)
            .arg(millis(window))
            .arg(capacity)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;

        Ok(SlidingOutcome {
            admitted: admitted == 1,
            count: count.max(0) as u64,
            oldest_ms: (oldest >= 0).then_some(oldest as u64),
        })
    }

    async fn load_bucket(&self, key: &str) -> Result<Option<BucketState>> {
        let mut conn = self.connection.clone();
        let (tokens, ts, version): (Option<f64>, Option<u64>, Option<u64>) = redis::cmd("HMGET")
            .arg(key)
            .arg("tokens")
            .arg("ts")
            .arg("ver")
            .query_async(&mut conn)
            .await?;

        Ok(match (tokens, ts, version) {
            (Some(tokens), Some(last_refill_ms), Some(version)) => Some(BucketState {
                tokens,
                last_refill_ms,
                version,
            }),
            _ => None,
        })
    }

    async fn compare_and_swap_bucket(
        &self,
        key: &str,
        expected_version: Option<u64>,
        next: &BucketState,
        ttl: Duration,
    ) -> Result<bool> {
        let mut conn = self.connection.clone();
        let expected = expected_version
            .map(|v| v.to_string())
            .unwrap_or_default();
        let swapped: i64 = self
            .bucket_cas
            .key(key)
            .arg(expected)
            .arg(next.tokens)
            .arg(next.last_refill_ms)
            .arg(next.version)
            .arg(millis(ttl))
            .invoke_async(&mut conn)
            .await?;

        Ok(swapped == 1)
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection.clone();
        let removed: u64 = conn.del(keys).await?;
        Ok(removed)
    }
}
