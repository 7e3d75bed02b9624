//! Public rate limiting API.
//!
//! `RateLimitFacade` turns `(identifier, category)` pairs into decisions:
//! it derives the store key, resolves the category quota and drives the
//! selected limiter. All state it reads lives in the shared store or in the
//! `RateLimitContext` it was built with.

use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

use super::attempts::AttemptTracker;
use super::backend::{Limiter, LimiterSettings};
use super::category::RateLimitCategory;
use super::decision::{Algorithm, Decision};
use super::fixed_window::FixedWindowLimiter;
use super::key::{KeyCodec, StoreKey};
use super::quota::QuotaConfig;
use super::registry::ConfigRegistry;
use super::sliding_window::SlidingWindowLimiter;
use super::token_bucket::TokenBucketLimiter;
use crate::clock::Clock;
use crate::config::RatewardenConfig;
use crate::error::Result;
use crate::store::{with_deadline, QuotaStore};

/// Registries and helpers shared by a facade and its callers.
#[derive(Debug, Clone)]
pub struct RateLimitContext {
    pub registry: Arc<ConfigRegistry>,
    pub attempts: Arc<AttemptTracker>,
    pub codec: KeyCodec,
    pub clock: Arc<dyn Clock>,
}

impl RateLimitContext {
    /// Bundle the shared pieces every limiter in a process works from.
    pub fn new(
        registry: Arc<ConfigRegistry>,
        attempts: Arc<AttemptTracker>,
        codec: KeyCodec,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            attempts,
            codec,
            clock,
        }
    }

    /// Context described by the configuration.
    pub fn from_config(config: &RatewardenConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self {
            registry: Arc::new(ConfigRegistry::from_settings(&config.rate_limiting)?),
            attempts: Arc::new(AttemptTracker::with_block_threshold(
                config.security.block_threshold,
            )),
            codec: KeyCodec::new(config.store.key_namespace.clone()),
            clock,
        })
    }
}

/// Entry point for rate limit checks.
#[derive(Debug, Clone)]
pub struct RateLimitFacade {
    store: Arc<dyn QuotaStore>,
    context: RateLimitContext,
    settings: LimiterSettings,
    enabled: bool,
    composite_stages: Vec<Algorithm>,
    fixed_window: Arc<FixedWindowLimiter>,
    sliding_window: Arc<SlidingWindowLimiter>,
    token_bucket: Arc<TokenBucketLimiter>,
}

impl RateLimitFacade {
    /// Create an enabled facade whose composite checks run the fixed and
    /// sliding window after the token bucket.
    pub fn new(
        store: Arc<dyn QuotaStore>,
        context: RateLimitContext,
        settings: LimiterSettings,
    ) -> Self {
        let clock = Arc::clone(&context.clock);
        Self {
            fixed_window: Arc::new(FixedWindowLimiter::new(Arc::clone(&store), settings)),
            sliding_window: Arc::new(SlidingWindowLimiter::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                settings,
            )),
            token_bucket: Arc::new(TokenBucketLimiter::new(
                Arc::clone(&store),
                clock,
                settings,
            )),
            store,
            context,
            settings,
            enabled: true,
            composite_stages: vec![Algorithm::FixedWindow, Algorithm::SlidingWindow],
        }
    }

    /// Facade built from configuration.
    pub fn from_config(
        store: Arc<dyn QuotaStore>,
        context: RateLimitContext,
        config: &RatewardenConfig,
    ) -> Self {
        Self::new(store, context, config.limiter_settings())
            .with_enabled(config.rate_limiting.enabled)
            .with_composite_stages(config.rate_limiting.composite_stages.clone())
    }

    /// Turn limiting on or off. A disabled facade allows everything without
    /// touching the store.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        if !enabled {
            info!("Rate limiting disabled, all checks will be allowed");
        }
        self.enabled = enabled;
        self
    }

    /// Algorithms consulted after the token bucket by `check_composite`.
    /// The token bucket itself is skipped if listed.
    pub fn with_composite_stages(mut self, stages: Vec<Algorithm>) -> Self {
        self.composite_stages = stages
            .into_iter()
            .filter(|stage| *stage != Algorithm::TokenBucket)
            .collect();
        self
    }

    fn prepare(&self, identifier: &str, category: &RateLimitCategory) -> (StoreKey, QuotaConfig) {
        let key = self.context.codec.build_key(identifier, category);
        let quota = self.context.registry.resolve(category);
        trace!(key = %key, capacity = quota.capacity(), "Checking rate limit");
        (key, quota)
    }

    fn limiter(&self, algorithm: Algorithm) -> &dyn Limiter {
        match algorithm {
            Algorithm::FixedWindow => self.fixed_window.as_ref(),
            Algorithm::SlidingWindow => self.sliding_window.as_ref(),
            Algorithm::TokenBucket => self.token_bucket.as_ref(),
        }
    }

    /// Check with the given algorithm.
    pub async fn check_with(
        &self,
        identifier: &str,
        category: &RateLimitCategory,
        algorithm: Algorithm,
    ) -> Result<Decision> {
        let (key, quota) = self.prepare(identifier, category);
        if !self.enabled {
            return Ok(Decision::allow(algorithm, quota.capacity()));
        }
        self.limiter(algorithm).decide(&key, &quota).await
    }

    /// Consume one token bucket token.
    pub async fn check(&self, identifier: &str, category: &RateLimitCategory) -> Result<Decision> {
        self.check_with(identifier, category, Algorithm::TokenBucket)
            .await
    }

    /// Consume `tokens` token bucket tokens at once.
    pub async fn check_tokens(
        &self,
        identifier: &str,
        category: &RateLimitCategory,
        tokens: u64,
    ) -> Result<Decision> {
        let (key, quota) = self.prepare(identifier, category);
        if !self.enabled {
            return Ok(Decision::allow(Algorithm::TokenBucket, quota.capacity()));
        }
        self.token_bucket.decide_tokens(&key, &quota, tokens).await
    }

    /// Whether `tokens` tokens are available, without consuming them.
    pub async fn estimate(
        &self,
        identifier: &str,
        category: &RateLimitCategory,
        tokens: u64,
    ) -> Result<Decision> {
        let (key, quota) = self.prepare(identifier, category);
        if !self.enabled {
            return Ok(Decision::allow(Algorithm::TokenBucket, quota.capacity()));
        }
        self.token_bucket.estimate(&key, &quota, tokens).await
    }

    /// Token bucket first, then each configured stage. The first denial is
    /// returned as is; when everything allows, the decision with the least
    /// remaining quota wins.
    ///
    /// A token consumed by an earlier stage is not refunded when a later
    /// stage denies.
    pub async fn check_composite(
        &self,
        identifier: &str,
        category: &RateLimitCategory,
    ) -> Result<Decision> {
        let (key, quota) = self.prepare(identifier, category);
        if !self.enabled {
            return Ok(Decision::allow(Algorithm::TokenBucket, quota.capacity()));
        }

        let mut tightest = self.token_bucket.decide(&key, &quota).await?;
        if !tightest.allowed {
            warn!(key = %key, algorithm = %tightest.algorithm, "Composite check denied");
            return Ok(tightest);
        }

        for stage in &self.composite_stages {
            let decision = self.limiter(*stage).decide(&key, &quota).await?;
            if !decision.allowed {
                warn!(key = %key, algorithm = %decision.algorithm, "Composite check denied");
                return Ok(decision);
            }
            if decision.remaining < tightest.remaining {
                tightest = decision;
            }
        }

        Ok(tightest)
    }

    /// Delete all quota state for an identifier. Store failures are logged
    /// and reported as `false`.
    pub async fn reset(&self, identifier: &str, category: &RateLimitCategory) -> bool {
        let key = self.context.codec.build_key(identifier, category);
        let keys = key.all_storage_keys();

        match with_deadline(self.settings.store_timeout, "delete", self.store.delete(&keys)).await {
            Ok(deleted) => {
                debug!(key = %key, deleted, "Rate limit state reset");
                true
            }
            Err(e) => {
                error!(key = %key, error = %e, "Failed to reset rate limit state");
                false
            }
        }
    }

    /// Whether a default-algorithm check for `identifier` is allowed.
    pub async fn is_allowed(&self, identifier: &str, category: &RateLimitCategory) -> Result<bool> {
        Ok(self.check(identifier, category).await?.allowed)
    }

    /// Consume one token and report only whether it was granted.
    pub async fn is_allowed_token_bucket(
        &self,
        identifier: &str,
        category: &RateLimitCategory,
    ) -> Result<bool> {
        Ok(self
            .check_with(identifier, category, Algorithm::TokenBucket)
            .await?
            .allowed)
    }

    /// Count one request in the fixed window and report whether it fit.
    pub async fn is_allowed_fixed_window(
        &self,
        identifier: &str,
        category: &RateLimitCategory,
    ) -> Result<bool> {
        Ok(self
            .check_with(identifier, category, Algorithm::FixedWindow)
            .await?
            .allowed)
    }

    /// Record one request in the sliding log and report whether it fit.
    pub async fn is_allowed_sliding_window(
        &self,
        identifier: &str,
        category: &RateLimitCategory,
    ) -> Result<bool> {
        Ok(self
            .check_with(identifier, category, Algorithm::SlidingWindow)
            .await?
            .allowed)
    }

    /// Category quotas used by every check.
    pub fn registry(&self) -> &Arc<ConfigRegistry> {
        &self.context.registry
    }

    /// Attempt records kept alongside the quotas.
    pub fn attempts(&self) -> &Arc<AttemptTracker> {
        &self.context.attempts
    }

    /// The shared context this facade was built from.
    pub fn context(&self) -> &RateLimitContext {
        &self.context
    }

    /// The sliding window limiter, shared with security guards.
    pub fn sliding_window(&self) -> Arc<SlidingWindowLimiter> {
        Arc::clone(&self.sliding_window)
    }

    /// Whether checks consult the store. When disabled, every check is
    /// allowed without touching it.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}
