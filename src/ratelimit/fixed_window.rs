//! Fixed window limiter.
//!
//! The window opens on the first request for a key and closes when the store
//! expires the counter. Bursts of up to twice the capacity are possible
//! across a window boundary.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::backend::{Limiter, LimiterSettings};
use super::decision::{Algorithm, Decision};
use super::key::StoreKey;
use super::quota::QuotaConfig;
use crate::error::Result;
use crate::store::{with_deadline, QuotaStore};

/// Counter-per-window limiter backed by an atomic store increment.
#[derive(Debug, Clone)]
pub struct FixedWindowLimiter {
    store: Arc<dyn QuotaStore>,
    settings: LimiterSettings,
}

impl FixedWindowLimiter {
    /// Create a limiter over `store`.
    pub fn new(store: Arc<dyn QuotaStore>, settings: LimiterSettings) -> Self {
        Self { store, settings }
    }

    async fn try_decide(&self, key: &StoreKey, quota: &QuotaConfig) -> Result<Decision> {
        let storage_key = key.storage_key(Algorithm::FixedWindow);
        let window = quota.refill_period();

        let counted = with_deadline(
            self.settings.store_timeout,
            "increment_window",
            self.store.increment_window(&storage_key, window),
        )
        .await?;

        trace!(
            key = %key,
            count = counted.count,
            capacity = quota.capacity(),
            "Fixed window incremented"
        );

        if counted.count <= quota.capacity() {
            Ok(Decision::allow(
                Algorithm::FixedWindow,
                quota.capacity() - counted.count,
            ))
        } else {
            debug!(key = %key, resets_in = ?counted.resets_in, "Fixed window exhausted");
            Ok(Decision::deny(
                Algorithm::FixedWindow,
                counted.resets_in.max(Duration::from_millis(1)),
            ))
        }
    }
}

#[async_trait]
impl Limiter for FixedWindowLimiter {
    fn algorithm(&self) -> Algorithm {
        Algorithm::FixedWindow
    }

    async fn decide(&self, key: &StoreKey, quota: &QuotaConfig) -> Result<Decision> {
        let outcome = self.try_decide(key, quota).await;
        self.settings
            .settle(outcome, Algorithm::FixedWindow, quota, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::ratelimit::category::RateLimitCategory;
    use crate::ratelimit::decision::FailurePolicy;
    use crate::ratelimit::key::KeyCodec;
    use crate::store::faulty::{Fault, FaultyStore};
    use crate::store::InMemoryStore;

    fn setup() -> (FixedWindowLimiter, MockClock, StoreKey) {
        let clock = MockClock::default();
        let store = Arc::new(InMemoryStore::new(Arc::new(clock.clone())));
        let limiter =
            FixedWindowLimiter::new(store, LimiterSettings::new(FailurePolicy::FailClosed));
        let key = KeyCodec::default().build_key("10.0.0.1", &RateLimitCategory::ApiRequest);
        (limiter, clock, key)
    }

    #[tokio::test]
    async fn test_allows_capacity_then_denies() {
        let (limiter, _clock, key) = setup();
        let quota = QuotaConfig::per_period(3, Duration::from_secs(60)).unwrap();

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.decide(&key, &quota).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let denied = limiter.decide(&key, &quota).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.algorithm, Algorithm::FixedWindow);
        assert_eq!(denied.retry_after, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_window_resets_after_expiry() {
        let (limiter, clock, key) = setup();
        let quota = QuotaConfig::per_period(2, Duration::from_secs(10)).unwrap();

        limiter.decide(&key, &quota).await.unwrap();
        clock.advance(Duration::from_secs(4));
        limiter.decide(&key, &quota).await.unwrap();

        let denied = limiter.decide(&key, &quota).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Duration::from_secs(6));

        clock.advance(Duration::from_secs(7));
        let allowed = limiter.decide(&key, &quota).await.unwrap();
        assert!(allowed.allowed);
        assert_eq!(allowed.remaining, 1);
    }

    #[tokio::test]
    async fn test_store_outage_follows_failure_policy() {
        let quota = QuotaConfig::per_period(3, Duration::from_secs(60)).unwrap();
        let key = KeyCodec::default().build_key("10.0.0.1", &RateLimitCategory::ApiRequest);
        let store: Arc<dyn QuotaStore> = Arc::new(FaultyStore::new(Fault::Unavailable));

        let open = FixedWindowLimiter::new(
            Arc::clone(&store),
            LimiterSettings::new(FailurePolicy::FailOpen),
        );
        let decision = open.decide(&key, &quota).await.unwrap();
        assert!(decision.allowed && decision.degraded);

        let closed =
            FixedWindowLimiter::new(store, LimiterSettings::new(FailurePolicy::FailClosed));
        let decision = closed.decide(&key, &quota).await.unwrap();
        assert!(!decision.allowed && decision.degraded);
    }
}
