//! In-process cache store with clock-driven expiry.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{cache_prefix, physical_key, CacheStore};
use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::error::Result;

#[derive(Debug, Clone)]
struct CachedValue {
    json: String,
    expires_at_ms: u64,
}

const SWEEP_INTERVAL_MS: u64 = 60_000;
const MIN_SWEEP_LEN: usize = 1024;

/// Cache entries held in a `DashMap`.
///
/// Expired entries are dropped on access, and swept on write once a minute of
/// clock time has passed or the map has doubled since the last sweep.
#[derive(Debug)]
pub struct InMemoryCacheStore {
    entries: DashMap<String, CachedValue>,
    clock: Arc<dyn Clock>,
    key_prefix: String,
    default_ttl: Duration,
    last_sweep_ms: AtomicU64,
    sweep_at_len: AtomicUsize,
}

impl InMemoryCacheStore {
    /// Create an empty cache whose TTLs follow `clock`.
    pub fn new(clock: Arc<dyn Clock>, config: &CacheConfig) -> Self {
        let now = clock.now_millis();
        Self {
            entries: DashMap::new(),
            clock,
            key_prefix: config.key_prefix.clone(),
            default_ttl: Duration::from_secs(config.default_ttl_secs),
            last_sweep_ms: AtomicU64::new(now),
            sweep_at_len: AtomicUsize::new(MIN_SWEEP_LEN),
        }
    }

    /// Number of stored entries, expired ones included until they are swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Remove every expired entry now, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at_ms > now);
        let after = self.entries.len();
        self.last_sweep_ms.store(now, Ordering::Relaxed);
        self.sweep_at_len
            .store((after * 2).max(MIN_SWEEP_LEN), Ordering::Relaxed);
        before.saturating_sub(after)
    }

    fn maybe_sweep(&self, now_ms: u64) {
        let last = self.last_sweep_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) >= SWEEP_INTERVAL_MS
            || self.entries.len() >= self.sweep_at_len.load(Ordering::Relaxed)
        {
            self.purge_expired();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn live(&self, key: &str) -> Option<String> {
        let now = self.clock.now_millis();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at_ms > now => return Some(entry.json.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries
                .remove_if(key, |_, entry| entry.expires_at_ms <= now);
        }
        None
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, cache: &str, key: &str) -> Result<Option<String>> {
        Ok(self.live(&physical_key(&self.key_prefix, cache, key)))
    }

    async fn put(&self, cache: &str, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let now = self.clock.now_millis();
        self.maybe_sweep(now);
        let expires_at_ms = now.saturating_add(ttl.as_millis() as u64);
        self.entries.insert(
            physical_key(&self.key_prefix, cache, key),
            CachedValue {
                json: value.to_string(),
                expires_at_ms,
            },
        );
        Ok(())
    }

    async fn evict(&self, cache: &str, key: &str) -> Result<bool> {
        Ok(self
            .entries
            .remove(&physical_key(&self.key_prefix, cache, key))
            .is_some())
    }

    async fn evict_all(&self, cache: &str) -> Result<u64> {
        let prefix = cache_prefix(&self.key_prefix, cache);
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(&prefix));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }

    async fn exists(&self, cache: &str, key: &str) -> Result<bool> {
        Ok(self
            .live(&physical_key(&self.key_prefix, cache, key))
            .is_some())
    }
}
