//! OAuth token record
//!
//! Tokens are minted per tenant by the device-code flow (or the
//! managed-identity exchange) and cached on disk between runs. The
//! field names match the provider's wire format so a cached record
//! reads the same as a token-endpoint response.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cached OAuth token scoped to one tenant and one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Bearer credential presented to the control plane
    pub access_token: String,
    /// Long-lived credential used for silent renewal
    pub refresh_token: String,
    /// Token scheme, normally "Bearer"
    pub token_type: String,
    /// Audience the token was minted for
    pub resource: String,
    /// Instant after which the access token is no longer valid
    pub expires_on: DateTime<Utc>,
}

impl Token {
    /// Whether the access token has passed its expiry instant.
    ///
    /// An expired token must never be presented without a refresh
    /// attempt first; the broker branches on this.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_on
    }

    /// Render the `Authorization` header value for this token
    pub fn bearer(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(expires_on: DateTime<Utc>) -> Token {
        Token {
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            token_type: "Bearer".to_string(),
            resource: "https://management.core.windows.net/".to_string(),
            expires_on,
        }
    }

    #[test]
    fn test_expired_in_the_past() {
        let token = sample(Utc::now() - Duration::minutes(1));
        assert!(token.is_expired());
    }

    #[test]
    fn test_not_expired_in_the_future() {
        let token = sample(Utc::now() + Duration::hours(1));
        assert!(!token.is_expired());
    }

    #[test]
    fn test_bearer_header_format() {
        let token = sample(Utc::now());
        assert_eq!(token.bearer(), "Bearer at");
    }

    #[test]
    fn test_wire_field_names() {
        let token = sample(Utc::now());
        let json = serde_json::to_value(&token).unwrap();
        assert!(json.get("access_token").is_some());
        assert!(json.get("refresh_token").is_some());
        assert!(json.get("token_type").is_some());
        assert!(json.get("expires_on").is_some());
    }
}
