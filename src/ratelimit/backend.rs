//! Limiter trait shared by the fixed window, sliding window and token bucket
//! implementations.

use async_trait::async_trait;
use std::time::Duration;

use super::decision::{Algorithm, Decision, FailurePolicy};
use super::key::StoreKey;
use super::quota::QuotaConfig;
use crate::error::Result;

/// Default deadline for a single store round trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(50);
/// Default compare-and-swap attempts before giving up on a contended bucket.
pub const DEFAULT_MAX_CAS_RETRIES: u32 = 5;

/// Trait for rate limiter implementations.
///
/// This trait abstracts over the three algorithms so the facade and the
/// security guard can drive any of them.
#[async_trait]
pub trait Limiter: Send + Sync {
    /// The algorithm this limiter implements.
    fn algorithm(&self) -> Algorithm;

    /// Consume one unit of quota for `key` and report whether it was allowed.
    async fn decide(&self, key: &StoreKey, quota: &QuotaConfig) -> Result<Decision>;
}

/// Settings every limiter instance is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterSettings {
    /// What to do when the store is unreachable
    pub failure_policy: FailurePolicy,
    /// Deadline for each store round trip
    pub store_timeout: Duration,
    /// Compare-and-swap attempts for the token bucket
    pub max_cas_retries: u32,
}

impl LimiterSettings {
    /// Settings with the given failure policy and default timeouts.
    pub fn new(failure_policy: FailurePolicy) -> Self {
        Self {
            failure_policy,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            max_cas_retries: DEFAULT_MAX_CAS_RETRIES,
        }
    }

    /// Override the store deadline.
    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// Override the compare-and-swap retry budget.
    pub fn with_max_cas_retries(mut self, max_cas_retries: u32) -> Self {
        self.max_cas_retries = max_cas_retries;
        self
    }

    /// Apply the failure policy to the outcome of a decision attempt.
    pub(crate) fn settle(
        &self,
        outcome: Result<Decision>,
        algorithm: Algorithm,
        quota: &QuotaConfig,
        key: &StoreKey,
    ) -> Result<Decision> {
        outcome.or_else(|err| {
            self.failure_policy
                .resolve(err, algorithm, quota, &key.to_string())
        })
    }
}
