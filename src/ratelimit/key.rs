//! Store key derivation.

use sha2::{Digest, Sha256};
use std::fmt;

use super::category::RateLimitCategory;
use super::decision::Algorithm;

/// Default namespace prefixed to every store key.
pub const DEFAULT_NAMESPACE: &str = "rate_limit";

/// Separator hashed between identifier and category so that
/// ("ab", "c") and ("a", "bc") never share a digest.
const FIELD_SEPARATOR: u8 = 0x1f;

/// A key that identifies the quota state of one identifier in one category.
///
/// The raw identifier (often an IP address or email) never reaches the store;
/// only its SHA-256 digest does.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    /// Namespace shared by all keys of this deployment
    pub namespace: String,
    /// The category the key belongs to
    pub category: RateLimitCategory,
    /// Lowercase hex SHA-256 of identifier and category
    pub digest: String,
}

impl StoreKey {
    /// Physical store key for one algorithm's state.
    ///
    /// Format: "{namespace}:{algorithm}:{category}:{digest}"
    pub fn storage_key(&self, algorithm: Algorithm) -> String {
        format!(
            "{}:{}:{}:{}",
            self.namespace,
            algorithm.tag(),
            self.category,
            self.digest
        )
    }

    /// Physical keys for every algorithm, used by resets.
    pub fn all_storage_keys(&self) -> Vec<String> {
        Algorithm::ALL
            .iter()
            .map(|algorithm| self.storage_key(*algorithm))
            .collect()
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short digest keeps log lines readable.
        let short = self.digest.get(0..12).unwrap_or(&self.digest);
        write!(f, "{}:{}:{}", self.namespace, self.category, short)
    }
}

/// Derives store keys from caller identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCodec {
    namespace: String,
}

impl KeyCodec {
    /// Create a codec writing keys under `namespace`.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// The namespace this codec writes under.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Build the key for an identifier in a category.
    pub fn build_key(&self, identifier: &str, category: &RateLimitCategory) -> StoreKey {
        let mut hasher = Sha256::new();
        hasher.update(identifier.as_bytes());
        hasher.update([FIELD_SEPARATOR]);
        hasher.update(category.as_str().as_bytes());

        StoreKey {
            namespace: self.namespace.clone(),
            category: category.clone(),
            digest: hex::encode(hasher.finalize()),
        }
    }
}

impl Default for KeyCodec {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}
