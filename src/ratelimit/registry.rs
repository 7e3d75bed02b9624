//! Category to quota registry.
//!
//! Each process keeps its own registry, built at startup from the built-in
//! quotas plus configuration, and mutable at runtime. Runtime registrations
//! are not shared between instances, so instances may briefly disagree on a
//! newly added category.

use dashmap::DashMap;
use std::collections::HashMap;
use tracing::{debug, info};

use super::category::RateLimitCategory;
use super::quota::{QuotaConfig, QuotaSettings};
use crate::config::RateLimitingConfig;
use crate::error::{RatewardenError, Result};

const OTP_EMAIL_QUOTA: QuotaConfig = QuotaConfig::from_static(5, 5, 5 * 60);
const OTP_SMS_QUOTA: QuotaConfig = QuotaConfig::from_static(3, 3, 5 * 60);
const LOGIN_ATTEMPT_QUOTA: QuotaConfig = QuotaConfig::from_static(5, 5, 15 * 60);
const API_REQUEST_QUOTA: QuotaConfig = QuotaConfig::from_static(100, 100, 60 * 60);

/// Concurrent registry of per-category quotas with a default fallback.
#[derive(Debug)]
pub struct ConfigRegistry {
    quotas: DashMap<RateLimitCategory, QuotaConfig>,
    default_quota: QuotaConfig,
}

impl ConfigRegistry {
    /// Create an empty registry that falls back to `default_quota`.
    pub fn new(default_quota: QuotaConfig) -> Self {
        Self {
            quotas: DashMap::new(),
            default_quota,
        }
    }

    /// Create a registry seeded with the built-in category quotas.
    pub fn with_builtin_categories(default_quota: QuotaConfig) -> Self {
        let registry = Self::new(default_quota);
        for category in RateLimitCategory::builtin() {
            if let Some(quota) = Self::builtin_quota(&category) {
                registry.quotas.insert(category, quota);
            }
        }
        registry
    }

    /// Build the registry described by the rate limiting configuration:
    /// built-ins first, then configured categories on top.
    ///
    /// Names go through [`RateLimitCategory::from`], so they match however the
    /// classifier or callers spell them; environment overlays lower-case keys.
    pub fn from_settings(settings: &RateLimitingConfig) -> Result<Self> {
        let registry = Self::with_builtin_categories(settings.default_quota()?);
        for (name, quota) in &settings.categories {
            let category = RateLimitCategory::from(name.as_str());
            registry.add_settings(category, *quota)?;
        }
        Ok(registry)
    }

    /// Built-in quota for a category, if it has one.
    pub fn builtin_quota(category: &RateLimitCategory) -> Option<QuotaConfig> {
        match category {
            RateLimitCategory::OtpEmail => Some(OTP_EMAIL_QUOTA),
            RateLimitCategory::OtpSms => Some(OTP_SMS_QUOTA),
            RateLimitCategory::LoginAttempt => Some(LOGIN_ATTEMPT_QUOTA),
            RateLimitCategory::ApiRequest => Some(API_REQUEST_QUOTA),
            RateLimitCategory::Custom(_) => None,
        }
    }

    /// Quota for a category, falling back to the default when none is registered.
    pub fn resolve(&self, category: &RateLimitCategory) -> QuotaConfig {
        match self.lookup(category) {
            Ok(quota) => quota,
            Err(_) => {
                debug!(category = %category, "No quota registered, using default");
                self.default_quota
            }
        }
    }

    /// Quota for a category, or `ConfigNotFound`.
    pub fn lookup(&self, category: &RateLimitCategory) -> Result<QuotaConfig> {
        self.quotas
            .get(category)
            .map(|entry| *entry.value())
            .ok_or_else(|| RatewardenError::ConfigNotFound(category.to_string()))
    }

    /// Register or replace the quota for a category.
    pub fn add(&self, category: RateLimitCategory, quota: QuotaConfig) {
        info!(
            category = %category,
            capacity = quota.capacity(),
            refill_amount = quota.refill_amount(),
            refill_period = ?quota.refill_period(),
            "Registered quota"
        );
        self.quotas.insert(category, quota);
    }

    /// Validate raw settings and register them.
    pub fn add_settings(&self, category: RateLimitCategory, settings: QuotaSettings) -> Result<()> {
        let quota = QuotaConfig::try_from(settings).map_err(|e| match e {
            RatewardenError::InvalidConfig(reason) => {
                RatewardenError::InvalidConfig(format!("{}: {}", category, reason))
            }
            other => other,
        })?;
        self.add(category, quota);
        Ok(())
    }

    /// Remove the quota for a category, returning it if it was registered.
    pub fn remove(&self, category: &RateLimitCategory) -> Option<QuotaConfig> {
        let removed = self.quotas.remove(category).map(|(_, quota)| quota);
        if removed.is_some() {
            info!(category = %category, "Removed quota");
        }
        removed
    }

    /// Whether a category has its own quota.
    pub fn contains(&self, category: &RateLimitCategory) -> bool {
        self.quotas.contains_key(category)
    }

    /// Copy of every registered quota.
    pub fn snapshot(&self) -> HashMap<RateLimitCategory, QuotaConfig> {
        self.quotas
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// The fallback quota.
    pub fn default_quota(&self) -> QuotaConfig {
        self.default_quota
    }

    /// Number of registered categories.
    pub fn len(&self) -> usize {
        self.quotas.len()
    }

    /// Check if no category is registered.
    pub fn is_empty(&self) -> bool {
        self.quotas.is_empty()
    }
}
