//! Quota configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{RatewardenError, Result};

/// A validated quota: `capacity` tokens, refilled by `refill_amount` every
/// `refill_period`.
///
/// Construction rejects zero values, so a `QuotaConfig` that exists is always
/// usable in a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaConfig {
    capacity: u64,
    refill_amount: u64,
    refill_period: Duration,
}

impl QuotaConfig {
    /// Create a quota, failing with `InvalidConfig` on any zero value.
    pub fn new(capacity: u64, refill_amount: u64, refill_period: Duration) -> Result<Self> {
        if capacity == 0 {
            return Err(RatewardenError::InvalidConfig(
                "capacity must be greater than zero".into(),
            ));
        }
        if refill_amount == 0 {
            return Err(RatewardenError::InvalidConfig(
                "refill amount must be greater than zero".into(),
            ));
        }
        if refill_period.as_millis() == 0 {
            return Err(RatewardenError::InvalidConfig(
                "refill period must be at least one millisecond".into(),
            ));
        }
        Ok(Self {
            capacity,
            refill_amount,
            refill_period,
        })
    }

    /// Build a quota from compile-time constants. All arguments must be non-zero.
    pub(crate) const fn from_static(capacity: u64, refill_amount: u64, period_secs: u64) -> Self {
        assert!(capacity > 0 && refill_amount > 0 && period_secs > 0);
        Self {
            capacity,
            refill_amount,
            refill_period: Duration::from_secs(period_secs),
        }
    }

    /// Shorthand for a quota refilled to `capacity` every `period`.
    pub fn per_period(capacity: u64, period: Duration) -> Result<Self> {
        Self::new(capacity, capacity, period)
    }

    /// Maximum tokens (or requests per window).
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Tokens added per refill period.
    pub fn refill_amount(&self) -> u64 {
        self.refill_amount
    }

    /// Refill period, also the window length for the window algorithms.
    pub fn refill_period(&self) -> Duration {
        self.refill_period
    }

    /// Continuous refill rate in tokens per millisecond.
    pub fn refill_rate_per_ms(&self) -> f64 {
        self.refill_amount as f64 / self.refill_period.as_millis() as f64
    }

    /// Time for a single token to regenerate.
    pub fn token_interval(&self) -> Duration {
        self.time_to_regenerate(1.0)
    }

    /// Time for `tokens` tokens to regenerate.
    pub fn time_to_regenerate(&self, tokens: f64) -> Duration {
        if tokens <= 0.0 {
            return Duration::ZERO;
        }
        let period_ms = self.refill_period.as_millis() as f64;
        let millis = (tokens * period_ms / self.refill_amount as f64).ceil();
        Duration::from_millis(millis as u64)
    }

    /// Time for an empty bucket to refill to capacity.
    pub fn time_to_full(&self) -> Duration {
        self.time_to_regenerate(self.capacity as f64)
    }
}

/// Quota as written in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSettings {
    /// Maximum tokens
    pub capacity: u64,
    /// Tokens added per period
    pub refill_amount: u64,
    /// Period length in seconds
    pub refill_period_seconds: u64,
}

impl TryFrom<QuotaSettings> for QuotaConfig {
    type Error = RatewardenError;

    fn try_from(settings: QuotaSettings) -> Result<Self> {
        QuotaConfig::new(
            settings.capacity,
            settings.refill_amount,
            Duration::from_secs(settings.refill_period_seconds),
        )
    }
}

impl From<QuotaConfig> for QuotaSettings {
    fn from(quota: QuotaConfig) -> Self {
        Self {
            capacity: quota.capacity,
            refill_amount: quota.refill_amount,
            refill_period_seconds: quota.refill_period.as_secs(),
        }
    }
}
