//! Rate limit categories.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tag selecting a quota policy.
///
/// The built-in variants cover the policies every deployment ships with;
/// `Custom` carries categories registered at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RateLimitCategory {
    /// One-time passwords delivered by email
    OtpEmail,
    /// One-time passwords delivered by SMS
    OtpSms,
    /// Login attempts
    LoginAttempt,
    /// General API traffic
    ApiRequest,
    /// Any category registered at runtime
    Custom(String),
}

impl RateLimitCategory {
    /// The canonical string form, used in store keys and configuration.
    pub fn as_str(&self) -> &str {
        match self {
            RateLimitCategory::OtpEmail => "OTP_EMAIL",
            RateLimitCategory::OtpSms => "OTP_SMS",
            RateLimitCategory::LoginAttempt => "LOGIN_ATTEMPT",
            RateLimitCategory::ApiRequest => "API_REQUEST",
            RateLimitCategory::Custom(name) => name,
        }
    }

    /// The categories with built-in quotas.
    pub fn builtin() -> [RateLimitCategory; 4] {
        [
            RateLimitCategory::OtpEmail,
            RateLimitCategory::OtpSms,
            RateLimitCategory::LoginAttempt,
            RateLimitCategory::ApiRequest,
        ]
    }
}

/// Names are case-insensitive; custom names are stored upper-cased.
impl From<&str> for RateLimitCategory {
    fn from(value: &str) -> Self {
        let name = value.trim().to_ascii_uppercase();
        match name.as_str() {
            "OTP_EMAIL" => RateLimitCategory::OtpEmail,
            "OTP_SMS" => RateLimitCategory::OtpSms,
            "LOGIN_ATTEMPT" | "LOGIN_ATTEMPTS" => RateLimitCategory::LoginAttempt,
            "API_REQUEST" | "API_GENERAL" => RateLimitCategory::ApiRequest,
            _ => RateLimitCategory::Custom(name),
        }
    }
}

impl From<String> for RateLimitCategory {
    fn from(value: String) -> Self {
        RateLimitCategory::from(value.as_str())
    }
}

impl From<RateLimitCategory> for String {
    fn from(category: RateLimitCategory) -> Self {
        category.as_str().to_string()
    }
}

impl FromStr for RateLimitCategory {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(RateLimitCategory::from(s))
    }
}

impl fmt::Display for RateLimitCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_builtin_and_aliases() {
        assert_eq!(RateLimitCategory::from("OTP_EMAIL"), RateLimitCategory::OtpEmail);
        assert_eq!(RateLimitCategory::from("otp_sms"), RateLimitCategory::OtpSms);
        assert_eq!(
            RateLimitCategory::from("LOGIN_ATTEMPTS"),
            RateLimitCategory::LoginAttempt
        );
        assert_eq!(
            RateLimitCategory::from("API_GENERAL"),
            RateLimitCategory::ApiRequest
        );
    }

    #[test]
    fn test_custom_category_round_trips_through_display() {
        let category: RateLimitCategory = "PASSWORD_RESET".parse().unwrap();
        assert_eq!(category, RateLimitCategory::Custom("PASSWORD_RESET".into()));
        assert_eq!(category.to_string(), "PASSWORD_RESET");
    }

    #[test]
    fn test_custom_names_share_one_case() {
        let lower = RateLimitCategory::from(" password_reset ");
        assert_eq!(lower, RateLimitCategory::Custom("PASSWORD_RESET".into()));
        assert_eq!(lower, RateLimitCategory::from("Password_Reset"));

        let parsed: RateLimitCategory = serde_json::from_str("\"password_reset\"").unwrap();
        assert_eq!(parsed, lower);
    }

    #[test]
    fn test_serde_uses_string_form() {
        let json = serde_json::to_string(&RateLimitCategory::LoginAttempt).unwrap();
        assert_eq!(json, "\"LOGIN_ATTEMPT\"");

        let parsed: RateLimitCategory = serde_json::from_str("\"OTP_SMS\"").unwrap();
        assert_eq!(parsed, RateLimitCategory::OtpSms);
    }
}
