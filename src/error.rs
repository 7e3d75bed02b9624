//! Error types for the Ratewarden engine.

use thiserror::Error;

/// Main error type for Ratewarden operations.
#[derive(Error, Debug)]
pub enum RatewardenError {
    /// Configuration could not be loaded or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// A quota with non-positive capacity, refill amount or refill period
    #[error("Invalid quota configuration: {0}")]
    InvalidConfig(String),

    /// No quota is registered for the requested category
    #[error("No quota registered for category {0}")]
    ConfigNotFound(String),

    /// The shared store could not be reached or did not answer before the deadline
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The token bucket compare-and-swap retry budget was exhausted
    #[error("Transient contention on {key} after {attempts} attempts")]
    TransientContention { key: String, attempts: u32 },

    /// The caller asked for something no quota can ever satisfy
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RatewardenError {
    /// Whether retrying the same call later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RatewardenError::StoreUnavailable(_) | RatewardenError::TransientContention { .. }
        )
    }
}

impl From<redis::RedisError> for RatewardenError {
    fn from(err: redis::RedisError) -> Self {
        RatewardenError::StoreUnavailable(err.to_string())
    }
}

/// Result type alias for Ratewarden operations.
pub type Result<T> = std::result::Result<T, RatewardenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(RatewardenError::StoreUnavailable("down".into()).is_retryable());
        assert!(RatewardenError::TransientContention {
            key: "k".into(),
            attempts: 5
        }
        .is_retryable());
        assert!(!RatewardenError::InvalidConfig("capacity".into()).is_retryable());
        assert!(!RatewardenError::ConfigNotFound("OTP_EMAIL".into()).is_retryable());
    }

    #[test]
    fn test_contention_message() {
        let err = RatewardenError::TransientContention {
            key: "rate_limit:token:x".into(),
            attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "Transient contention on rate_limit:token:x after 3 attempts"
        );
    }
}
