//! Redis cache store.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use std::fmt;
use std::time::Duration;

use super::{cache_prefix, physical_key, CacheStore};
use crate::config::CacheConfig;
use crate::error::Result;

/// Keys fetched per `SCAN` round trip during `evict_all`.
const SCAN_BATCH: usize = 100;

/// Cache entries stored as Redis strings with `SET .. EX`.
#[derive(Clone)]
pub struct RedisCacheStore {
    connection: ConnectionManager,
    key_prefix: String,
    default_ttl: Duration,
}

impl fmt::Debug for RedisCacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCacheStore")
            .field("key_prefix", &self.key_prefix)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl RedisCacheStore {
    /// Use an existing connection, e.g. the one held by the quota store.
    pub fn new(connection: ConnectionManager, config: &CacheConfig) -> Self {
        Self {
            connection,
            key_prefix: config.key_prefix.clone(),
            default_ttl: Duration::from_secs(config.default_ttl_secs),
        }
    }

    /// Connect to Redis at `url`.
    pub async fn connect(url: &str, config: &CacheConfig) -> std::result::Result<Self, RedisError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self::new(connection, config))
    }

    fn key(&self, cache: &str, key: &str) -> String {
        physical_key(&self.key_prefix, cache, key)
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, cache: &str, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(self.key(cache, key)).await?;
        Ok(value)
    }

    async fn put(&self, cache: &str, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.connection.clone();
        let seconds = ttl.unwrap_or(self.default_ttl).as_secs().max(1);
        let _: () = conn.set_ex(self.key(cache, key), value, seconds).await?;
        Ok(())
    }

    async fn evict(&self, cache: &str, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let removed: u64 = conn.del(self.key(cache, key)).await?;
        Ok(removed > 0)
    }

    async fn evict_all(&self, cache: &str) -> Result<u64> {
        let mut conn = self.connection.clone();
        let pattern = format!("{}*", cache_prefix(&self.key_prefix, cache));
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let deleted: u64 = conn.del(&keys).await?;
                removed += deleted;
            }

            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }

        Ok(removed)
    }

    async fn exists(&self, cache: &str, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let exists: bool = conn.exists(self.key(cache, key)).await?;
        Ok(exists)
    }
}
