//! Security-facing limiter.
//!
//! Wraps the sliding window limiter with a single `max_attempts` over
//! `window_minutes` quota and the attempt tracker, which is what request
//! middleware needs to turn a path and a client into an accept or a 429.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, trace};

use super::attempts::{AttemptRecord, AttemptTracker};
use super::backend::Limiter;
use super::category::RateLimitCategory;
use super::classify::PathClassifier;
use super::key::KeyCodec;
use super::quota::QuotaConfig;
use super::rejection::RejectionResponse;
use super::sliding_window::SlidingWindowLimiter;
use crate::config::SecurityConfig;
use crate::error::Result;

/// Sliding window guard with attempt recording.
#[derive(Debug, Clone)]
pub struct SecurityGuard {
    limiter: Arc<SlidingWindowLimiter>,
    codec: KeyCodec,
    attempts: Arc<AttemptTracker>,
    quota: QuotaConfig,
    window_minutes: u64,
}

impl SecurityGuard {
    /// Create a guard. Fails with `InvalidConfig` when `max_attempts` or
    /// `window_minutes` is zero.
    pub fn new(
        limiter: Arc<SlidingWindowLimiter>,
        codec: KeyCodec,
        attempts: Arc<AttemptTracker>,
        config: &SecurityConfig,
    ) -> Result<Self> {
        let quota = QuotaConfig::per_period(
            u64::from(config.max_attempts),
            Duration::from_secs(config.window_minutes.saturating_mul(60)),
        )?;
        Ok(Self {
            limiter,
            codec,
            attempts,
            quota,
            window_minutes: config.window_minutes,
        })
    }

    /// Count this request and report whether it is over the limit.
    pub async fn is_rate_limited(
        &self,
        identifier: &str,
        category: &RateLimitCategory,
    ) -> Result<bool> {
        let key = self.codec.build_key(identifier, category);
        let decision = self.limiter.decide(&key, &self.quota).await?;
        trace!(key = %key, allowed = decision.allowed, "Security guard checked");
        Ok(decision.is_rate_limited())
    }

    /// Record an attempt outcome for auditing.
    pub fn record_attempt(
        &self,
        identifier: &str,
        category: &RateLimitCategory,
        success: bool,
    ) -> AttemptRecord {
        self.attempts.record_attempt(identifier, category, success)
    }

    /// Current attempt record, without changing it.
    pub fn attempt_info(&self, identifier: &str, category: &RateLimitCategory) -> AttemptRecord {
        self.attempts.get_info(identifier, category)
    }

    /// The response sent when a request is rejected.
    pub fn rejection(&self) -> RejectionResponse {
        RejectionResponse::new(self.window_minutes)
    }

    /// Classify `path`, count the request against `"{client}:{path}"` and
    /// return the rejection when it is over the limit.
    pub async fn check_request(
        &self,
        client_id: &str,
        path: &str,
        classifier: &PathClassifier,
    ) -> Result<Option<RejectionResponse>> {
        let category = classifier.classify(path);
        let identifier = format!("{}:{}", client_id, path);

        if self.is_rate_limited(&identifier, &category).await? {
            info!(category = %category, path = %path, "Request rejected");
            return Ok(Some(self.rejection()));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, MockClock};
    use crate::error::RatewardenError;
    use crate::ratelimit::backend::LimiterSettings;
    use crate::ratelimit::decision::FailurePolicy;
    use crate::store::InMemoryStore;

    fn guard(config: &SecurityConfig) -> (SecurityGuard, MockClock) {
        let clock = MockClock::default();
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let store = Arc::new(InMemoryStore::new(Arc::clone(&shared)));
        let limiter = Arc::new(SlidingWindowLimiter::new(
            store,
            shared,
            LimiterSettings::new(FailurePolicy::FailClosed),
        ));
        let guard = SecurityGuard::new(
            limiter,
            KeyCodec::default(),
            Arc::new(AttemptTracker::with_block_threshold(config.block_threshold)),
            config,
        )
        .unwrap();
        (guard, clock)
    }

    fn config(max_attempts: u32, window_minutes: u64) -> SecurityConfig {
        SecurityConfig {
            max_attempts,
            window_minutes,
            block_threshold: None,
        }
    }

    #[tokio::test]
    async fn test_limits_after_max_attempts() {
        let (guard, clock) = guard(&config(3, 1));
        let category = RateLimitCategory::LoginAttempt;

        for _ in 0..3 {
            assert!(!guard.is_rate_limited("10.0.0.1", &category).await.unwrap());
        }
        assert!(guard.is_rate_limited("10.0.0.1", &category).await.unwrap());
        assert!(!guard.is_rate_limited("10.0.0.2", &category).await.unwrap());

        clock.advance(Duration::from_secs(61));
        assert!(!guard.is_rate_limited("10.0.0.1", &category).await.unwrap());
    }

    #[tokio::test]
    async fn test_check_request_scopes_by_path() {
        let (guard, _clock) = guard(&config(1, 15));
        let classifier = PathClassifier::default();

        assert!(guard
            .check_request("203.0.113.9", "/login", &classifier)
            .await
            .unwrap()
            .is_none());

        let rejection = guard
            .check_request("203.0.113.9", "/login", &classifier)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rejection.status, 429);
        assert_eq!(
            rejection.body.message,
            "Rate limit exceeded. Try again in 15 minutes."
        );

        assert!(guard
            .check_request("203.0.113.9", "/orders", &classifier)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_attempt_recording_delegates_to_tracker() {
        let mut security = config(5, 15);
        security.block_threshold = Some(2);
        let (guard, _clock) = guard(&security);
        let category = RateLimitCategory::OtpEmail;

        guard.record_attempt("user@example.com", &category, false);
        let record = guard.record_attempt("user@example.com", &category, false);
        assert!(record.blocked);
        assert_eq!(guard.attempt_info("user@example.com", &category).attempt_count, 2);
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let clock: Arc<dyn Clock> = Arc::new(MockClock::default());
        let store = Arc::new(InMemoryStore::new(Arc::clone(&clock)));
        let limiter = Arc::new(SlidingWindowLimiter::new(
            store,
            clock,
            LimiterSettings::new(FailurePolicy::FailOpen),
        ));

        let result = SecurityGuard::new(
            limiter,
            KeyCodec::default(),
            Arc::new(AttemptTracker::new()),
            &config(0, 15),
        );
        assert!(matches!(result, Err(RatewardenError::InvalidConfig(_))));
    }
}
