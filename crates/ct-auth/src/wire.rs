//! Wire formats shared by the provider's token endpoints
//!
//! The device-code completion, the refresh grant, and the
//! managed-identity exchange all answer with the same token body.
//! Numeric fields arrive as strings on the v1 endpoints, so decoding
//! accepts both representations.

use chrono::{Duration, TimeZone, Utc};
use serde::{Deserialize, Deserializer};

use ct_core::Token;

/// Success body of a token endpoint
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    pub token_type: String,
    #[serde(default)]
    pub resource: String,
    /// Lifetime in seconds, relative to now
    #[serde(default, deserialize_with = "opt_u64_lenient")]
    pub expires_in: Option<u64>,
    /// Absolute expiry as a Unix timestamp
    #[serde(default, deserialize_with = "opt_u64_lenient")]
    pub expires_on: Option<u64>,
}

impl TokenResponse {
    /// Materialize a cacheable token.
    ///
    /// The absolute timestamp wins when both expiry fields are present.
    /// A response carrying neither is treated as already expired so it
    /// can never be reused without a refresh.
    pub fn into_token(self) -> Token {
        let expires_on = match (self.expires_on, self.expires_in) {
            (Some(epoch), _) => Utc
                .timestamp_opt(epoch as i64, 0)
                .single()
                .unwrap_or_else(Utc::now),
            (None, Some(secs)) => Utc::now() + Duration::seconds(secs as i64),
            (None, None) => Utc::now(),
        };

        Token {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type,
            resource: self.resource,
            expires_on,
        }
    }
}

/// Error body of a token endpoint
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub error_description: String,
}

pub(crate) fn opt_u64_lenient<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("expected an unsigned integer")),
        Some(serde_json::Value::String(s)) => {
            s.parse::<u64>().map(Some).map_err(serde::de::Error::custom)
        }
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected number or string, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_numeric_fields_accept_strings() {
        let body = r#"{
            "access_token": "at",
            "refresh_token": "rt",
            "token_type": "Bearer",
            "resource": "https://management.core.windows.net/",
            "expires_in": "3600",
            "expires_on": "4102444800"
        }"#;
        let parsed: TokenResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.expires_in, Some(3600));
        assert_eq!(parsed.expires_on, Some(4_102_444_800));
    }

    #[test]
    fn test_numeric_fields_accept_numbers() {
        let body = r#"{"access_token":"at","token_type":"Bearer","expires_in":3600}"#;
        let parsed: TokenResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.expires_in, Some(3600));
        assert_eq!(parsed.expires_on, None);
    }

    #[test]
    fn test_absolute_expiry_wins() {
        let parsed: TokenResponse = serde_json::from_str(
            r#"{"access_token":"at","token_type":"Bearer","expires_in":"1","expires_on":"4102444800"}"#,
        )
        .unwrap();
        let token = parsed.into_token();
        assert_eq!(token.expires_on.timestamp(), 4_102_444_800);
    }

    #[test]
    fn test_relative_expiry_lands_in_the_future() {
        let parsed: TokenResponse =
            serde_json::from_str(r#"{"access_token":"at","token_type":"Bearer","expires_in":3600}"#)
                .unwrap();
        let token = parsed.into_token();
        assert!(token.expires_on > Utc::now());
        assert!(!token.is_expired());
    }

    #[test]
    fn test_missing_expiry_is_already_expired() {
        let parsed: TokenResponse =
            serde_json::from_str(r#"{"access_token":"at","token_type":"Bearer"}"#).unwrap();
        assert!(parsed.into_token().is_expired());
    }
}
