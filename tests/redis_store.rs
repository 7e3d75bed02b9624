//! Integration tests for the Redis store and cache.
//!
//! These tests require a Redis instance running at `redis://127.0.0.1/`.
//! Tests are ignored by default - run with `cargo test --test redis_store -- --ignored`

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use ratewarden::cache::{CacheStore, RedisCacheStore};
use ratewarden::clock::{Clock, SystemClock};
use ratewarden::config::CacheConfig;
use ratewarden::ratelimit::{
    AttemptTracker, ConfigRegistry, FailurePolicy, KeyCodec, LimiterSettings, QuotaConfig,
    RateLimitCategory, RateLimitContext, RateLimitFacade,
};
use ratewarden::store::{BucketState, QuotaStore, RedisStore};

const REDIS_URL: &str = "redis://127.0.0.1/";

/// Check if Redis is available before running tests
async fn redis_available() -> bool {
    RedisStore::connect(REDIS_URL).await.is_ok()
}

/// Keys unique to one test run
fn test_key(test_name: &str) -> String {
    format!("ratewarden_test:{}:{}", test_name, Uuid::new_v4())
}

async fn facade(test_name: &str) -> (RateLimitFacade, RedisStore) {
    let store = RedisStore::connect(REDIS_URL)
        .await
        .expect("Failed to connect to Redis");
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let default_quota = QuotaConfig::new(10, 5, Duration::from_secs(60)).unwrap();
    let context = RateLimitContext::new(
        Arc::new(ConfigRegistry::with_builtin_categories(default_quota)),
        Arc::new(AttemptTracker::new()),
        KeyCodec::new(test_key(test_name)),
        clock,
    );
    let facade = RateLimitFacade::new(
        Arc::new(store.clone()),
        context,
        LimiterSettings::new(FailurePolicy::FailClosed).with_store_timeout(Duration::from_secs(1)),
    );
    (facade, store)
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_fixed_window_expiry() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available at {}", REDIS_URL);
        return;
    }

    let store = RedisStore::connect(REDIS_URL).await.unwrap();
    let key = test_key("fixed");

    let first = store
        .increment_window(&key, Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(first.count, 1);
    assert!(first.resets_in <= Duration::from_secs(30));

    let second = store
        .increment_window(&key, Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(second.count, 2);

    assert_eq!(store.delete(&[key]).await.unwrap(), 1);
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_bucket_compare_and_swap() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let store = RedisStore::connect(REDIS_URL).await.unwrap();
    let key = test_key("bucket");
    let ttl = Duration::from_secs(30);
    let state = BucketState {
        tokens: 4.5,
        last_refill_ms: 1_700_000_000_000,
        version: 1,
    };

    assert!(store
        .compare_and_swap_bucket(&key, None, &state, ttl)
        .await
        .unwrap());
    // A second create loses: the key already exists.
    assert!(!store
        .compare_and_swap_bucket(&key, None, &state, ttl)
        .await
        .unwrap());

    let loaded = store.load_bucket(&key).await.unwrap().unwrap();
    assert_eq!(loaded, state);

    let next = BucketState {
        tokens: 3.5,
        version: 2,
        ..state
    };
    assert!(!store
        .compare_and_swap_bucket(&key, Some(7), &next, ttl)
        .await
        .unwrap());
    assert!(store
        .compare_and_swap_bucket(&key, Some(1), &next, ttl)
        .await
        .unwrap());
    assert_eq!(store.load_bucket(&key).await.unwrap().unwrap().version, 2);

    store.delete(&[key]).await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_sliding_window_admission() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let store = RedisStore::connect(REDIS_URL).await.unwrap();
    let key = test_key("sliding");
    let window = Duration::from_secs(10);
    let now = 1_700_000_000_000u64;

    for i in 0..3 {
        let outcome = store
            .admit_sliding(&key, now + i, window, 3, &format!("{}-{}", now + i, i))
            .await
            .unwrap();
        assert!(outcome.admitted);
        assert_eq!(outcome.oldest_ms, Some(now));
    }

    let full = store
        .admit_sliding(&key, now + 5, window, 3, "full")
        .await
        .unwrap();
    assert!(!full.admitted);
    assert_eq!(full.count, 3);

    let later = store
        .admit_sliding(&key, now + 10_001, window, 3, "later")
        .await
        .unwrap();
    assert!(later.admitted);

    store.delete(&[key]).await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_facade_shares_quota_between_instances() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let (first, _store) = facade("shared").await;
    let second = RateLimitFacade::new(
        Arc::new(RedisStore::connect(REDIS_URL).await.unwrap()),
        first.context().clone(),
        LimiterSettings::new(FailurePolicy::FailClosed).with_store_timeout(Duration::from_secs(1)),
    );
    let category = RateLimitCategory::OtpSms;

    assert!(first.is_allowed("+15550100", &category).await.unwrap());
    assert!(second.is_allowed("+15550100", &category).await.unwrap());
    assert!(first.is_allowed("+15550100", &category).await.unwrap());
    assert!(!second.is_allowed("+15550100", &category).await.unwrap());

    assert!(first.reset("+15550100", &category).await);
    assert!(second.is_allowed("+15550100", &category).await.unwrap());
    first.reset("+15550100", &category).await;
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_cache_store() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let (_facade, store) = facade("cache").await;
    let config = CacheConfig {
        key_prefix: test_key("cache"),
        ..CacheConfig::default()
    };
    let cache = RedisCacheStore::new(store.connection(), &config);

    cache.put("users", "1", r#"{"id":1}"#, None).await.unwrap();
    cache
        .put("users", "2", r#"{"id":2}"#, Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(
        cache.get("users", "1").await.unwrap().as_deref(),
        Some(r#"{"id":1}"#)
    );
    assert!(cache.exists("users", "2").await.unwrap());

    assert!(cache.evict("users", "1").await.unwrap());
    assert_eq!(cache.evict_all("users").await.unwrap(), 1);
    assert!(!cache.exists("users", "2").await.unwrap());
}
