//! Request path classification and client identification.

use serde::{Deserialize, Serialize};

use super::category::RateLimitCategory;

/// Maps a path containing `contains` to `category`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierRule {
    /// Substring matched against the request path
    pub contains: String,
    /// Category assigned on match
    pub category: RateLimitCategory,
}

impl ClassifierRule {
    /// Match any path containing `contains`.
    pub fn new(contains: impl Into<String>, category: RateLimitCategory) -> Self {
        Self {
            contains: contains.into(),
            category,
        }
    }
}

/// Ordered rules; the first matching rule wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathClassifier {
    rules: Vec<ClassifierRule>,
    fallback: RateLimitCategory,
}

impl PathClassifier {
    /// Create a classifier that tries `rules` in order before `fallback`.
    pub fn new(rules: Vec<ClassifierRule>, fallback: RateLimitCategory) -> Self {
        Self { rules, fallback }
    }

    /// The rules shipped by default.
    pub fn default_rules() -> Vec<ClassifierRule> {
        vec![
            ClassifierRule::new("/communication/auth/otp/send", RateLimitCategory::OtpEmail),
            ClassifierRule::new("/login", RateLimitCategory::LoginAttempt),
        ]
    }

    /// Category for a request path: the first matching rule, else the fallback.
    pub fn classify(&self, path: &str) -> RateLimitCategory {
        self.rules
            .iter()
            .find(|rule| path.contains(&rule.contains))
            .map(|rule| rule.category.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[ClassifierRule] {
        &self.rules
    }

    /// Category used when no rule matches.
    pub fn fallback(&self) -> &RateLimitCategory {
        &self.fallback
    }
}

impl Default for PathClassifier {
    fn default() -> Self {
        Self::new(Self::default_rules(), RateLimitCategory::ApiRequest)
    }
}

/// Client identifier: the first `X-Forwarded-For` entry when present,
/// otherwise the remote address.
pub fn client_identifier(forwarded_for: Option<&str>, remote_addr: &str) -> String {
    forwarded_for
        .and_then(|header| header.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty())
        .unwrap_or(remote_addr)
        .to_string()
}
