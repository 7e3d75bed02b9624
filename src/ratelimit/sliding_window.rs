//! Sliding log limiter.
//!
//! Keeps one timestamped entry per admitted request. Pruning, counting and
//! insertion happen in a single atomic store operation; splitting them would
//! let concurrent callers both observe `capacity - 1` and both insert.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};
use uuid::Uuid;

use super::backend::{Limiter, LimiterSettings};
use super::decision::{Algorithm, Decision};
use super::key::StoreKey;
use super::quota::QuotaConfig;
use crate::clock::Clock;
use crate::error::Result;
use crate::store::{with_deadline, QuotaStore};

/// Limiter admitting at most `capacity` requests in any trailing window of
/// `refill_period`.
#[derive(Debug, Clone)]
pub struct SlidingWindowLimiter {
    store: Arc<dyn QuotaStore>,
    clock: Arc<dyn Clock>,
    settings: LimiterSettings,
}

impl SlidingWindowLimiter {
    /// Create a limiter over `store`, timestamping entries with `clock`.
    pub fn new(
        store: Arc<dyn QuotaStore>,
        clock: Arc<dyn Clock>,
        settings: LimiterSettings,
    ) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    async fn try_decide(&self, key: &StoreKey, quota: &QuotaConfig) -> Result<Decision> {
        let storage_key = key.storage_key(Algorithm::SlidingWindow);
        let window = quota.refill_period();
        let now = self.clock.now_millis();
        // Same-millisecond requests need distinct members.
        let member = format!("{}-{}", now, Uuid::new_v4());

        let outcome = with_deadline(
            self.settings.store_timeout,
            "admit_sliding",
            self.store
                .admit_sliding(&storage_key, now, window, quota.capacity(), &member),
        )
        .await?;

        trace!(
            key = %key,
            count = outcome.count,
            admitted = outcome.admitted,
            "Sliding window evaluated"
        );

        if outcome.admitted {
            return Ok(Decision::allow(
                Algorithm::SlidingWindow,
                quota.capacity().saturating_sub(outcome.count),
            ));
        }

        let window_ms = window.as_millis() as u64;
        let retry_after_ms = outcome
            .oldest_ms
            .map(|oldest| (oldest + window_ms).saturating_sub(now))
            .unwrap_or(window_ms)
            .max(1);
        debug!(key = %key, retry_after_ms, "Sliding window full");

        Ok(Decision::deny(
            Algorithm::SlidingWindow,
            Duration::from_millis(retry_after_ms),
        ))
    }
}

#[async_trait]
impl Limiter for SlidingWindowLimiter {
    fn algorithm(&self) -> Algorithm {
        Algorithm::SlidingWindow
    }

    async fn decide(&self, key: &StoreKey, quota: &QuotaConfig) -> Result<Decision> {
        let outcome = self.try_decide(key, quota).await;
        self.settings
            .settle(outcome, Algorithm::SlidingWindow, quota, key)
    }
}
