//! Cache-aside decorator over a pluggable cache store.
//!
//! A `CachePolicy` names the cache, the method and optionally a key function
//! over the call arguments. `CacheAside::cached` looks the resolved key up,
//! and on a miss runs the wrapped operation and stores its JSON form.
//! Cache failures never fail the call: the operation runs as if uncached.

mod memory;
mod redis_cache;

pub use memory::InMemoryCacheStore;
pub use redis_cache::RedisCacheStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::{self, Debug};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::config::CacheConfig;
use crate::error::Result;

/// Port for stores holding JSON-encoded cache entries.
#[async_trait]
pub trait CacheStore: Send + Sync + Debug {
    /// The stored value, if present and unexpired.
    async fn get(&self, cache: &str, key: &str) -> Result<Option<String>>;

    /// Store a value; `None` applies the store's default TTL.
    async fn put(&self, cache: &str, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Remove one entry. Returns whether it existed.
    async fn evict(&self, cache: &str, key: &str) -> Result<bool>;

    /// Remove every entry of a cache. Returns how many were removed.
    async fn evict_all(&self, cache: &str) -> Result<u64>;

    async fn exists(&self, cache: &str, key: &str) -> Result<bool>;
}

/// Store-level key: "{prefix}:{cache}::{key}".
pub fn physical_key(prefix: &str, cache: &str, key: &str) -> String {
    format!("{}:{}::{}", prefix, cache, key)
}

/// Prefix shared by every physical key of one cache.
pub(crate) fn cache_prefix(prefix: &str, cache: &str) -> String {
    format!("{}:{}::", prefix, cache)
}

type KeyFn<A> = Box<dyn Fn(&A) -> Option<String> + Send + Sync>;

/// How to cache the results of one operation.
pub struct CachePolicy<A: ?Sized> {
    cache: String,
    method: String,
    ttl: Option<Duration>,
    key_fn: Option<KeyFn<A>>,
}

impl<A: ?Sized> CachePolicy<A> {
    /// Cache results in `cache`, keyed by `method` until a key function is set.
    pub fn new(cache: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            cache: cache.into(),
            method: method.into(),
            ttl: None,
            key_fn: None,
        }
    }

    /// Override the store default TTL for entries written by this policy.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Derive the key from the call arguments. Returning `None` falls back
    /// to the method name.
    pub fn with_key<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&A) -> Option<String> + Send + Sync + 'static,
    {
        self.key_fn = Some(Box::new(key_fn));
        self
    }

    pub fn cache(&self) -> &str {
        &self.cache
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Entry key for these arguments.
    pub fn resolve_key(&self, args: &A) -> String {
        resolve(self.key_fn.as_ref(), &self.method, args)
    }
}

impl<A: ?Sized> Debug for CachePolicy<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePolicy")
            .field("cache", &self.cache)
            .field("method", &self.method)
            .field("ttl", &self.ttl)
            .field("key_fn", &self.key_fn.is_some())
            .finish()
    }
}

/// Which entries to drop after an operation succeeds.
pub struct EvictPolicy<A: ?Sized> {
    cache: String,
    method: String,
    all_entries: bool,
    key_fn: Option<KeyFn<A>>,
}

impl<A: ?Sized> EvictPolicy<A> {
    /// Evict the entry keyed like a `CachePolicy` with the same method and key function.
    pub fn new(cache: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            cache: cache.into(),
            method: method.into(),
            all_entries: false,
            key_fn: None,
        }
    }

    /// Evict every entry of the cache.
    pub fn all_entries(cache: impl Into<String>) -> Self {
        Self {
            cache: cache.into(),
            method: String::new(),
            all_entries: true,
            key_fn: None,
        }
    }

    /// Derive the evicted key from the call arguments, as [`CachePolicy::with_key`] does.
    pub fn with_key<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&A) -> Option<String> + Send + Sync + 'static,
    {
        self.key_fn = Some(Box::new(key_fn));
        self
    }

    /// Entry key evicted for these arguments.
    pub fn resolve_key(&self, args: &A) -> String {
        resolve(self.key_fn.as_ref(), &self.method, args)
    }
}

impl<A: ?Sized> Debug for EvictPolicy<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvictPolicy")
            .field("cache", &self.cache)
            .field("method", &self.method)
            .field("all_entries", &self.all_entries)
            .finish()
    }
}

fn resolve<A: ?Sized>(key_fn: Option<&KeyFn<A>>, method: &str, args: &A) -> String {
    key_fn
        .and_then(|f| f(args))
        .filter(|key| !key.is_empty())
        .unwrap_or_else(|| method.to_string())
}

/// Cache-aside wrapper around async operations.
#[derive(Debug, Clone)]
pub struct CacheAside {
    store: Arc<dyn CacheStore>,
    cache_null_values: bool,
}

impl CacheAside {
    /// Wrap `store`. Null results are cached only when `cache_null_values` is set.
    pub fn new(store: Arc<dyn CacheStore>, cache_null_values: bool) -> Self {
        Self {
            store,
            cache_null_values,
        }
    }

    /// Wrap `store` using the cache section of the configuration.
    pub fn from_config(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self::new(store, config.cache_null_values)
    }

    /// The underlying cache store.
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Return the cached result for `args`, or run `op` and cache its result.
    pub async fn cached<A, T, E, F, Fut>(
        &self,
        policy: &CachePolicy<A>,
        args: &A,
        op: F,
    ) -> std::result::Result<T, E>
    where
        A: ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let key = policy.resolve_key(args);

        match self.store.get(&policy.cache, &key).await {
            Ok(Some(json)) => match serde_json::from_str::<T>(&json) {
                Ok(value) => {
                    trace!(cache = %policy.cache, key = %key, "Cache hit");
                    return Ok(value);
                }
                Err(e) => {
                    warn!(
                        cache = %policy.cache,
                        key = %key,
                        error = %e,
                        "Discarding unreadable cache entry"
                    );
                }
            },
            Ok(None) => trace!(cache = %policy.cache, key = %key, "Cache miss"),
            Err(e) => {
                warn!(
                    cache = %policy.cache,
                    key = %key,
                    error = %e,
                    "Cache read failed, bypassing cache"
                );
            }
        }

        let value = op().await?;

        match serde_json::to_string(&value) {
            Ok(json) if json == "null" && !self.cache_null_values => {
                debug!(cache = %policy.cache, key = %key, "Not caching null result");
            }
            Ok(json) => {
                if let Err(e) = self.store.put(&policy.cache, &key, &json, policy.ttl).await {
                    warn!(cache = %policy.cache, key = %key, error = %e, "Cache write failed");
                }
            }
            Err(e) => {
                warn!(
                    cache = %policy.cache,
                    key = %key,
                    error = %e,
                    "Result not serializable, not caching"
                );
            }
        }

        Ok(value)
    }

    /// Run `op`, then evict the entry (or entries) the policy names. Nothing
    /// is evicted when `op` fails.
    pub async fn evicting<A, T, E, F, Fut>(
        &self,
        policy: &EvictPolicy<A>,
        args: &A,
        op: F,
    ) -> std::result::Result<T, E>
    where
        A: ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let value = op().await?;

        if policy.all_entries {
            match self.store.evict_all(&policy.cache).await {
                Ok(evicted) => debug!(cache = %policy.cache, evicted, "Evicted all entries"),
                Err(e) => warn!(cache = %policy.cache, error = %e, "Cache eviction failed"),
            }
        } else {
            let key = policy.resolve_key(args);
            if let Err(e) = self.store.evict(&policy.cache, &key).await {
                warn!(cache = %policy.cache, key = %key, error = %e, "Cache eviction failed");
            }
        }

        Ok(value)
    }
}
