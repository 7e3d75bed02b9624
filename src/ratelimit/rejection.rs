//! The response returned to clients that hit a limit.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// HTTP status for rate limited requests.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// JSON body of a rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionBody {
    pub success: bool,
    pub message: String,
}

/// Status and body sent back when a request is rate limited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectionResponse {
    pub status: u16,
    pub body: RejectionBody,
}

impl RejectionResponse {
    /// Rejection telling the client to come back after `window_minutes`.
    pub fn new(window_minutes: u64) -> Self {
        Self {
            status: TOO_MANY_REQUESTS,
            body: RejectionBody {
                success: false,
                message: format!(
                    "Rate limit exceeded. Try again in {} minutes.",
                    window_minutes
                ),
            },
        }
    }

    /// The body serialized as JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_body() {
        let rejection = RejectionResponse::new(15);
        assert_eq!(rejection.status, 429);

        let body: serde_json::Value = serde_json::from_str(&rejection.to_json().unwrap()).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "success": false,
                "message": "Rate limit exceeded. Try again in 15 minutes."
            })
        );
    }
}
