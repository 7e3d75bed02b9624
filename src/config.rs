//! Configuration management for Ratewarden.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{RatewardenError, Result};
use crate::ratelimit::{
    Algorithm, ClassifierRule, FailurePolicy, LimiterSettings, PathClassifier, QuotaConfig,
    QuotaSettings, RateLimitCategory,
};

/// Prefix of environment variables overriding file settings, e.g.
/// `RATEWARDEN__STORE__TIMEOUT_MS=100`.
pub const ENV_PREFIX: &str = "RATEWARDEN";

/// Main configuration for Ratewarden.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatewardenConfig {
    /// Shared store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limiting configuration
    pub rate_limiting: RateLimitingConfig,

    /// Security guard configuration
    #[serde(default)]
    pub security: SecurityConfig,

    /// Cache-aside configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Path classification rules
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

/// Which store implementation holds quota state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Process memory; single instance only
    #[default]
    Memory,
    /// Shared Redis server
    Redis,
}

/// Shared store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store implementation
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Deadline for a single store round trip in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Namespace prefixed to every quota key
    #[serde(default = "default_key_namespace")]
    pub key_namespace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            timeout_ms: default_timeout_ms(),
            key_namespace: default_key_namespace(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1/".to_string()
}

fn default_timeout_ms() -> u64 {
    50
}

fn default_key_namespace() -> String {
    crate::ratelimit::DEFAULT_NAMESPACE.to_string()
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// When false every check is allowed without touching the store
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Behaviour when the store is unreachable; must be set explicitly
    pub failure_policy: FailurePolicy,

    /// Capacity of the default quota
    #[serde(default = "default_capacity")]
    pub default_capacity: u64,

    /// Tokens refilled per period by the default quota
    #[serde(default = "default_refill_tokens")]
    pub default_refill_tokens: u64,

    /// Refill period of the default quota in minutes
    #[serde(default = "default_refill_minutes")]
    pub default_refill_minutes: u64,

    /// Compare-and-swap attempts before a token bucket check gives up
    #[serde(default = "default_max_cas_retries")]
    pub max_cas_retries: u32,

    /// Algorithms consulted after the token bucket by composite checks
    #[serde(default = "default_composite_stages")]
    pub composite_stages: Vec<Algorithm>,

    /// Per-category quotas, overriding the built-ins
    #[serde(default)]
    pub categories: HashMap<String, QuotaSettings>,
}

fn default_enabled() -> bool {
    true
}

fn default_capacity() -> u64 {
    10
}

fn default_refill_tokens() -> u64 {
    5
}

fn default_refill_minutes() -> u64 {
    1
}

fn default_max_cas_retries() -> u32 {
    crate::ratelimit::DEFAULT_MAX_CAS_RETRIES
}

fn default_composite_stages() -> Vec<Algorithm> {
    vec![Algorithm::FixedWindow, Algorithm::SlidingWindow]
}

impl RateLimitingConfig {
    /// Defaults for everything except the failure policy.
    pub fn new(failure_policy: FailurePolicy) -> Self {
        Self {
            enabled: default_enabled(),
            failure_policy,
            default_capacity: default_capacity(),
            default_refill_tokens: default_refill_tokens(),
            default_refill_minutes: default_refill_minutes(),
            max_cas_retries: default_max_cas_retries(),
            composite_stages: default_composite_stages(),
            categories: HashMap::new(),
        }
    }

    /// The quota applied to categories without their own.
    pub fn default_quota(&self) -> Result<QuotaConfig> {
        QuotaConfig::new(
            self.default_capacity,
            self.default_refill_tokens,
            Duration::from_secs(self.default_refill_minutes.saturating_mul(60)),
        )
        .map_err(|e| match e {
            RatewardenError::InvalidConfig(reason) => {
                RatewardenError::InvalidConfig(format!("default quota: {}", reason))
            }
            other => other,
        })
    }
}

/// Security guard configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Requests allowed per window
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Window length in minutes
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u64,

    /// Consecutive failures after which attempt records are marked blocked
    #[serde(default)]
    pub block_threshold: Option<u32>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            window_minutes: default_window_minutes(),
            block_threshold: None,
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_window_minutes() -> u64 {
    15
}

/// Cache-aside configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL for entries whose policy sets none
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Prefix of every cache key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Whether `null` results are stored
    #[serde(default)]
    pub cache_null_values: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            key_prefix: default_key_prefix(),
            cache_null_values: false,
        }
    }
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_key_prefix() -> String {
    "app".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Path classification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Ordered rules; the first match wins
    #[serde(default = "PathClassifier::default_rules")]
    pub rules: Vec<ClassifierRule>,

    /// Category for paths no rule matches
    #[serde(default = "default_fallback_category")]
    pub fallback: RateLimitCategory,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            rules: PathClassifier::default_rules(),
            fallback: default_fallback_category(),
        }
    }
}

fn default_fallback_category() -> RateLimitCategory {
    RateLimitCategory::ApiRequest
}

impl ClassifierConfig {
    /// Build the path classifier these settings describe.
    pub fn classifier(&self) -> PathClassifier {
        PathClassifier::new(self.rules.clone(), self.fallback.clone())
    }
}

impl RatewardenConfig {
    /// Defaults for everything except the failure policy.
    pub fn new(failure_policy: FailurePolicy) -> Self {
        Self {
            store: StoreConfig::default(),
            rate_limiting: RateLimitingConfig::new(failure_policy),
            security: SecurityConfig::default(),
            cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
            classifier: ClassifierConfig::default(),
        }
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: RatewardenConfig = serde_yaml::from_str(&contents)
            .map_err(|e| RatewardenError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional YAML file overlaid with
    /// `RATEWARDEN__*` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::new(path, ::config::FileFormat::Yaml));
        }
        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| RatewardenError::Config(e.to_string()))?;

        let config: RatewardenConfig = settings
            .try_deserialize()
            .map_err(|e| RatewardenError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every quota and limit for values no limiter can work with.
    pub fn validate(&self) -> Result<()> {
        if self.store.timeout_ms == 0 {
            return Err(RatewardenError::InvalidConfig(
                "store.timeout_ms must be greater than zero".into(),
            ));
        }
        if self.rate_limiting.max_cas_retries == 0 {
            return Err(RatewardenError::InvalidConfig(
                "rate_limiting.max_cas_retries must be greater than zero".into(),
            ));
        }
        if self
            .rate_limiting
            .composite_stages
            .contains(&Algorithm::TokenBucket)
        {
            return Err(RatewardenError::InvalidConfig(
                "rate_limiting.composite_stages: token_bucket always runs first and cannot be a stage"
                    .into(),
            ));
        }
        self.rate_limiting.default_quota()?;
        for (name, settings) in &self.rate_limiting.categories {
            QuotaConfig::try_from(*settings).map_err(|e| match e {
                RatewardenError::InvalidConfig(reason) => {
                    RatewardenError::InvalidConfig(format!("category {}: {}", name, reason))
                }
                other => other,
            })?;
        }
        if self.security.max_attempts == 0 || self.security.window_minutes == 0 {
            return Err(RatewardenError::InvalidConfig(
                "security.max_attempts and security.window_minutes must be greater than zero"
                    .into(),
            ));
        }
        Ok(())
    }

    /// Limiter settings derived from the store and rate limiting sections.
    pub fn limiter_settings(&self) -> LimiterSettings {
        LimiterSettings::new(self.rate_limiting.failure_policy)
            .with_store_timeout(Duration::from_millis(self.store.timeout_ms))
            .with_max_cas_retries(self.rate_limiting.max_cas_retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
store:
  backend: redis
  redis_url: redis://cache:6379/
  timeout_ms: 80
rate_limiting:
  failure_policy: fail_closed
  default_capacity: 20
  composite_stages: [sliding_window]
  categories:
    PASSWORD_RESET:
      capacity: 2
      refill_amount: 1
      refill_period_seconds: 600
security:
  max_attempts: 3
  block_threshold: 10
classifier:
  rules:
    - contains: /reset
      category: PASSWORD_RESET
  fallback: API_REQUEST
"#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_yaml_with_defaults() {
        let file = write_config(SAMPLE);
        let config = RatewardenConfig::from_file(file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.timeout_ms, 80);
        assert_eq!(config.store.key_namespace, "rate_limit");
        assert_eq!(config.rate_limiting.failure_policy, FailurePolicy::FailClosed);
        assert!(config.rate_limiting.enabled);
        assert_eq!(config.rate_limiting.default_capacity, 20);
        assert_eq!(config.rate_limiting.default_refill_tokens, 5);
        assert_eq!(
            config.rate_limiting.composite_stages,
            vec![Algorithm::SlidingWindow]
        );
        assert_eq!(config.security.max_attempts, 3);
        assert_eq!(config.security.window_minutes, 15);
        assert_eq!(config.security.block_threshold, Some(10));
        assert_eq!(config.cache.default_ttl_secs, 3600);
        assert_eq!(config.logging.level, "info");

        let classifier = config.classifier.classifier();
        assert_eq!(
            classifier.classify("/account/reset"),
            RateLimitCategory::Custom("PASSWORD_RESET".into())
        );
    }

    #[test]
    fn test_lower_case_custom_category_resolves_its_quota() {
        let file = write_config(
            r#"
rate_limiting:
  failure_policy: fail_open
  categories:
    password_reset:
      capacity: 2
      refill_amount: 1
      refill_period_seconds: 600
classifier:
  rules:
    - contains: /reset
      category: password_reset
"#,
        );
        let config = RatewardenConfig::from_file(file.path().to_str().unwrap()).unwrap();
        let registry = crate::ratelimit::ConfigRegistry::from_settings(&config.rate_limiting)
            .unwrap();

        let category = config.classifier.classifier().classify("/account/reset");
        assert_eq!(category, RateLimitCategory::Custom("PASSWORD_RESET".into()));
        assert_eq!(registry.lookup(&category).unwrap().capacity(), 2);
        assert_eq!(registry.resolve(&category).capacity(), 2);
        assert_eq!(
            registry
                .resolve(&RateLimitCategory::from("Password_Reset"))
                .capacity(),
            2
        );
    }

    #[test]
    fn test_failure_policy_is_required() {
        let file = write_config("rate_limiting:\n  enabled: true\n");
        let result = RatewardenConfig::from_file(file.path().to_str().unwrap());
        match result {
            Err(RatewardenError::Config(msg)) => assert!(msg.contains("failure_policy")),
            other => panic!("expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_bad_quotas() {
        let mut config = RatewardenConfig::new(FailurePolicy::FailOpen);
        assert!(config.validate().is_ok());

        config.rate_limiting.categories.insert(
            "BROKEN".into(),
            QuotaSettings {
                capacity: 1,
                refill_amount: 0,
                refill_period_seconds: 60,
            },
        );
        assert!(matches!(
            config.validate(),
            Err(RatewardenError::InvalidConfig(msg)) if msg.contains("BROKEN")
        ));

        let mut config = RatewardenConfig::new(FailurePolicy::FailOpen);
        config.rate_limiting.default_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = RatewardenConfig::new(FailurePolicy::FailOpen);
        config.rate_limiting.composite_stages = vec![Algorithm::TokenBucket];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_limiter_settings() {
        let mut config = RatewardenConfig::new(FailurePolicy::FailClosed);
        config.store.timeout_ms = 120;
        config.rate_limiting.max_cas_retries = 8;

        let settings = config.limiter_settings();
        assert_eq!(settings.failure_policy, FailurePolicy::FailClosed);
        assert_eq!(settings.store_timeout, Duration::from_millis(120));
        assert_eq!(settings.max_cas_retries, 8);
    }

    #[test]
    fn test_load_layers_environment_over_file() {
        let file = write_config(SAMPLE);
        let path = file.path().to_str().unwrap().to_string();

        let config = RatewardenConfig::load(Some(&path)).unwrap();
        assert_eq!(config.store.timeout_ms, 80);
        assert_eq!(config.rate_limiting.failure_policy, FailurePolicy::FailClosed);

        std::env::set_var("RATEWARDEN__STORE__TIMEOUT_MS", "250");
        std::env::set_var("RATEWARDEN__RATE_LIMITING__FAILURE_POLICY", "fail_open");
        let config = RatewardenConfig::load(Some(&path));
        std::env::remove_var("RATEWARDEN__STORE__TIMEOUT_MS");
        std::env::remove_var("RATEWARDEN__RATE_LIMITING__FAILURE_POLICY");

        let config = config.unwrap();
        assert_eq!(config.store.timeout_ms, 250);
        assert_eq!(config.rate_limiting.failure_policy, FailurePolicy::FailOpen);
        assert_eq!(config.security.max_attempts, 3);
    }
}
