//! Limiter decisions and the store failure policy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::warn;

use super::quota::QuotaConfig;
use crate::error::{RatewardenError, Result};

/// Rate limiting algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Counter reset at the end of a window opened by the first request
    FixedWindow,
    /// Exact log of request timestamps over the trailing window
    SlidingWindow,
    /// Continuously refilled bucket
    TokenBucket,
}

impl Algorithm {
    /// Every algorithm, in store-key order.
    pub const ALL: [Algorithm; 3] = [
        Algorithm::TokenBucket,
        Algorithm::FixedWindow,
        Algorithm::SlidingWindow,
    ];

    /// Short tag used inside store keys.
    pub fn tag(&self) -> &'static str {
        match self {
            Algorithm::FixedWindow => "fixed",
            Algorithm::SlidingWindow => "sliding",
            Algorithm::TokenBucket => "token",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Algorithm::FixedWindow => "FixedWindow",
            Algorithm::SlidingWindow => "SlidingWindow",
            Algorithm::TokenBucket => "TokenBucket",
        };
        f.write_str(name)
    }
}

/// Outcome of a single limiter check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Estimated remaining quota; not authoritative under concurrent callers
    pub remaining: u64,
    /// How long to wait before the next request can succeed
    pub retry_after: Duration,
    /// Algorithm that produced the decision
    pub algorithm: Algorithm,
    /// Set when the store was unavailable and the failure policy decided
    pub degraded: bool,
}

impl Decision {
    /// An allowed decision.
    pub fn allow(algorithm: Algorithm, remaining: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after: Duration::ZERO,
            algorithm,
            degraded: false,
        }
    }

    /// A denied decision.
    pub fn deny(algorithm: Algorithm, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            retry_after,
            algorithm,
            degraded: false,
        }
    }

    /// Inverse of `allowed`.
    pub fn is_rate_limited(&self) -> bool {
        !self.allowed
    }

    /// `retry_after` in whole seconds, rounded up so callers never retry early.
    pub fn retry_after_seconds(&self) -> i64 {
        let millis = i64::try_from(self.retry_after.as_millis()).unwrap_or(i64::MAX);
        millis / 1000 + i64::from(millis % 1000 != 0)
    }

    /// The decision as exposed to request-handling middleware.
    pub fn to_response(&self) -> LimitResponse {
        LimitResponse {
            allowed: self.allowed,
            remaining: i64::try_from(self.remaining).unwrap_or(i64::MAX),
            retry_after_seconds: self.retry_after_seconds(),
        }
    }
}

/// Wire form of a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitResponse {
    pub allowed: bool,
    pub remaining: i64,
    pub retry_after_seconds: i64,
}

/// What a limiter does when the shared store cannot be reached.
///
/// Has no `Default`; every limiter instance is built with an explicit choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Allow the request and log
    FailOpen,
    /// Deny the request and log
    FailClosed,
}

impl FailurePolicy {
    /// Turn a store failure into a decision according to the policy.
    ///
    /// Errors other than `StoreUnavailable` are returned unchanged.
    pub fn resolve(
        self,
        err: RatewardenError,
        algorithm: Algorithm,
        quota: &QuotaConfig,
        key: &str,
    ) -> Result<Decision> {
        let reason = match err {
            RatewardenError::StoreUnavailable(reason) => reason,
            other => return Err(other),
        };

        let decision = match self {
            FailurePolicy::FailOpen => {
                warn!(
                    key = %key,
                    algorithm = %algorithm,
                    error = %reason,
                    "Store unavailable, failing open"
                );
                Decision {
                    degraded: true,
                    ..Decision::allow(algorithm, quota.capacity())
                }
            }
            FailurePolicy::FailClosed => {
                warn!(
                    key = %key,
                    algorithm = %algorithm,
                    error = %reason,
                    "Store unavailable, failing closed"
                );
                Decision {
                    degraded: true,
                    ..Decision::deny(algorithm, quota.token_interval())
                }
            }
        };
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quota() -> QuotaConfig {
        QuotaConfig::per_period(10, Duration::from_secs(60)).unwrap()
    }

    #[test]
    fn test_retry_after_seconds_rounds_up() {
        let decision = Decision::deny(Algorithm::TokenBucket, Duration::from_millis(1_001));
        assert_eq!(decision.retry_after_seconds(), 2);

        let decision = Decision::deny(Algorithm::TokenBucket, Duration::from_secs(3));
        assert_eq!(decision.retry_after_seconds(), 3);

        let decision = Decision::allow(Algorithm::TokenBucket, 4);
        assert_eq!(decision.retry_after_seconds(), 0);
    }

    #[test]
    fn test_retry_after_seconds_saturates() {
        let ceiling = i64::MAX / 1000 + 1;
        for retry_after in [Duration::from_millis(u64::MAX), Duration::MAX] {
            let decision = Decision::deny(Algorithm::TokenBucket, retry_after);
            assert_eq!(decision.retry_after_seconds(), ceiling);
            assert!(decision.to_response().retry_after_seconds > 0);
        }

        let just_below = Duration::from_millis(i64::MAX as u64 - 1);
        let decision = Decision::deny(Algorithm::TokenBucket, just_below);
        assert_eq!(decision.retry_after_seconds(), ceiling);
    }

    #[test]
    fn test_response_serializes_camel_case() {
        let decision = Decision::deny(Algorithm::FixedWindow, Duration::from_secs(30));
        let json = serde_json::to_value(decision.to_response()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"allowed": false, "remaining": 0, "retryAfterSeconds": 30})
        );
    }

    #[test]
    fn test_fail_open_allows_degraded() {
        let decision = FailurePolicy::FailOpen
            .resolve(
                RatewardenError::StoreUnavailable("connection refused".into()),
                Algorithm::TokenBucket,
                &quota(),
                "k",
            )
            .unwrap();
        assert!(decision.allowed);
        assert!(decision.degraded);
        assert_eq!(decision.remaining, 10);
    }

    #[test]
    fn test_fail_closed_denies_degraded() {
        let decision = FailurePolicy::FailClosed
            .resolve(
                RatewardenError::StoreUnavailable("timeout".into()),
                Algorithm::SlidingWindow,
                &quota(),
                "k",
            )
            .unwrap();
        assert!(!decision.allowed);
        assert!(decision.degraded);
        assert_eq!(decision.retry_after, Duration::from_secs(6));
    }

    #[test]
    fn test_other_errors_pass_through() {
        let result = FailurePolicy::FailOpen.resolve(
            RatewardenError::TransientContention {
                key: "k".into(),
                attempts: 5,
            },
            Algorithm::TokenBucket,
            &quota(),
            "k",
        );
        assert!(matches!(
            result,
            Err(RatewardenError::TransientContention { .. })
        ));
    }

    #[test]
    fn test_policy_deserializes_snake_case() {
        let policy: FailurePolicy = serde_yaml::from_str("fail_closed").unwrap();
        assert_eq!(policy, FailurePolicy::FailClosed);
    }
}
