//! Token bucket limiter.
//!
//! Tokens refill continuously at `refill_amount / refill_period`. The bucket
//! state lives in the store and is updated with a versioned compare-and-swap,
//! so concurrent callers on different instances never lose each other's
//! consumption.

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::backend::{Limiter, LimiterSettings};
use super::decision::{Algorithm, Decision};
use super::key::StoreKey;
use super::quota::QuotaConfig;
use crate::clock::Clock;
use crate::error::{RatewardenError, Result};
use crate::store::{with_deadline, BucketState, QuotaStore};

/// Upper bound of the first retry backoff; doubles per attempt.
const BASE_BACKOFF_MS: u64 = 2;
const MAX_BACKOFF_MS: u64 = 50;

/// Bucket as seen at one instant, after refill.
#[derive(Debug, Clone, Copy)]
struct Snapshot {
    tokens: f64,
    now_ms: u64,
    /// Version read from the store; `None` when the key was absent
    version: Option<u64>,
}

/// Continuously refilled token bucket.
#[derive(Debug, Clone)]
pub struct TokenBucketLimiter {
    store: Arc<dyn QuotaStore>,
    clock: Arc<dyn Clock>,
    settings: LimiterSettings,
}

impl TokenBucketLimiter {
    /// Create a limiter over `store`.
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

    /// Consume `tokens` tokens at once.
    ///
    /// Fails with `InvalidRequest` when `tokens` is zero or exceeds the
    /// capacity, and with `TransientContention` when every compare-and-swap
    /// attempt lost a race.
    pub async fn decide_tokens(
        &self,
        key: &StoreKey,
        quota: &QuotaConfig,
        tokens: u64,
    ) -> Result<Decision> {
        validate_request(quota, tokens)?;
        let outcome = self.try_consume(key, quota, tokens).await;
        self.settings
            .settle(outcome, Algorithm::TokenBucket, quota, key)
    }

    /// Report whether `tokens` tokens could be consumed now, without
    /// consuming them.
    pub async fn estimate(
        &self,
        key: &StoreKey,
        quota: &QuotaConfig,
        tokens: u64,
    ) -> Result<Decision> {
        validate_request(quota, tokens)?;
        let outcome = self
            .snapshot(key, quota)
            .await
            .map(|snapshot| evaluate(&snapshot, quota, tokens));
        self.settings
            .settle(outcome, Algorithm::TokenBucket, quota, key)
    }

    async fn snapshot(&self, key: &StoreKey, quota: &QuotaConfig) -> Result<Snapshot> {
        let storage_key = key.storage_key(Algorithm::TokenBucket);
        let stored = with_deadline(
            self.settings.store_timeout,
            "load_bucket",
            self.store.load_bucket(&storage_key),
        )
        .await?;
        Ok(refill(stored, quota, self.clock.now_millis()))
    }

    async fn try_consume(
        &self,
        key: &StoreKey,
        quota: &QuotaConfig,
        tokens: u64,
    ) -> Result<Decision> {
        let storage_key = key.storage_key(Algorithm::TokenBucket);
        let attempts = self.settings.max_cas_retries.max(1);

        for attempt in 0..attempts {
            let snapshot = self.snapshot(key, quota).await?;
            let decision = evaluate(&snapshot, quota, tokens);

            trace!(
                key = %key,
                tokens = snapshot.tokens,
                requested = tokens,
                attempt,
                "Token bucket evaluated"
            );

            if !decision.allowed {
                debug!(key = %key, retry_after = ?decision.retry_after, "Token bucket empty");
                return Ok(decision);
            }

            let next = BucketState {
                tokens: snapshot.tokens - tokens as f64,
                last_refill_ms: snapshot.now_ms,
                version: snapshot.version.map(|v| v + 1).unwrap_or(1),
            };
            let swapped = with_deadline(
                self.settings.store_timeout,
                "compare_and_swap_bucket",
                self.store.compare_and_swap_bucket(
                    &storage_key,
                    snapshot.version,
                    &next,
                    quota.time_to_full(),
                ),
            )
            .await?;

            if swapped {
                return Ok(decision);
            }

            debug!(key = %key, attempt, "Token bucket swap lost a race, retrying");
            if attempt + 1 < attempts {
                tokio::time::sleep(backoff(attempt)).await;
            }
        }

        warn!(key = %key, attempts, "Token bucket contention exhausted retries");
        Err(RatewardenError::TransientContention {
            key: key.to_string(),
            attempts,
        })
    }
}

#[async_trait]
impl Limiter for TokenBucketLimiter {
    fn algorithm(&self) -> Algorithm {
        Algorithm::TokenBucket
    }

    async fn decide(&self, key: &StoreKey, quota: &QuotaConfig) -> Result<Decision> {
        self.decide_tokens(key, quota, 1).await
    }
}

fn validate_request(quota: &QuotaConfig, tokens: u64) -> Result<()> {
    if tokens == 0 {
        return Err(RatewardenError::InvalidRequest(
            "at least one token must be requested".into(),
        ));
    }
    if tokens > quota.capacity() {
        return Err(RatewardenError::InvalidRequest(format!(
            "{} tokens requested but capacity is {}",
            tokens,
            quota.capacity()
        )));
    }
    Ok(())
}

/// Apply continuous refill to the stored state. An absent key is a full bucket.
fn refill(stored: Option<BucketState>, quota: &QuotaConfig, now_ms: u64) -> Snapshot {
    let capacity = quota.capacity() as f64;
    match stored {
        None => Snapshot {
            tokens: capacity,
            now_ms,
            version: None,
        },
        Some(state) => {
            // Never move last_refill backwards when clocks disagree.
            let now_ms = now_ms.max(state.last_refill_ms);
            let elapsed = (now_ms - state.last_refill_ms) as f64;
            let period_ms = quota.refill_period().as_millis() as f64;
            let refilled = elapsed * quota.refill_amount() as f64 / period_ms;
            Snapshot {
                tokens: (state.tokens + refilled).min(capacity),
                now_ms,
                version: Some(state.version),
            }
        }
    }
}

fn evaluate(snapshot: &Snapshot, quota: &QuotaConfig, tokens: u64) -> Decision {
    let requested = tokens as f64;
    if snapshot.tokens >= requested {
        Decision::allow(
            Algorithm::TokenBucket,
            (snapshot.tokens - requested).floor() as u64,
        )
    } else {
        Decision::deny(
            Algorithm::TokenBucket,
            quota.time_to_regenerate(requested - snapshot.tokens),
        )
    }
}

fn backoff(attempt: u32) -> Duration {
    let ceiling = BASE_BACKOFF_MS
        .saturating_mul(1u64 << attempt.min(16))
        .min(MAX_BACKOFF_MS);
    Duration::from_millis(rand::thread_rng().gen_range(1..=ceiling))
}
