//! Interactive device-code flow
//!
//! The client asks the authority for a device code, shows the operator
//! the verification URL and user code, and polls the token endpoint
//! until the operator finishes signing in out-of-band or the code
//! expires. Polling is bounded by the lifetime the provider assigns to
//! the code; there is no open-ended retry.

use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;

use ct_core::Token;

use crate::broker::OAuthConfig;
use crate::error::AuthError;
use crate::wire::{ErrorResponse, TokenResponse};

/// Poll interval to fall back on when the provider omits one
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Code lifetime to fall back on when the provider omits one
const DEFAULT_CODE_LIFETIME_SECS: u64 = 900;

/// Extra delay added when the provider asks us to back off
const SLOW_DOWN_BACKOFF_SECS: u64 = 5;

/// Grant type for the device-code token exchange
const GRANT_DEVICE_CODE: &str = "device_code";

/// Poll outcome meaning the operator has not finished signing in yet
const ERROR_AUTHORIZATION_PENDING: &str = "authorization_pending";

/// Poll outcome asking the client to poll less often
const ERROR_SLOW_DOWN: &str = "slow_down";

/// Device-authorization response
#[derive(Debug, Deserialize)]
pub struct DeviceCode {
    /// Opaque code the client presents while polling
    pub device_code: String,
    /// Short code the operator types at the verification URL
    pub user_code: String,
    #[serde(default)]
    pub verification_url: String,
    /// Ready-made instruction line for the operator
    #[serde(default)]
    pub message: String,
    #[serde(default, deserialize_with = "crate::wire::opt_u64_lenient")]
    pub interval: Option<u64>,
    #[serde(default, deserialize_with = "crate::wire::opt_u64_lenient")]
    pub expires_in: Option<u64>,
}

/// Start the device-authorization flow for one tenant
pub async fn initiate(
    http: &reqwest::Client,
    oauth: &OAuthConfig,
    client_id: &str,
    resource: &str,
) -> Result<DeviceCode, AuthError> {
    const OPERATION: &str = "device authorization";

    let response = http
        .post(oauth.device_code_endpoint.clone())
        .form(&[("client_id", client_id), ("resource", resource)])
        .send()
        .await
        .map_err(|source| AuthError::Http {
            operation: OPERATION,
            source,
        })?;

    if !response.status().is_success() {
        return Err(AuthError::UnexpectedStatus {
            operation: OPERATION,
            status: response.status(),
        });
    }

    let body = response.text().await.map_err(|source| AuthError::Http {
        operation: OPERATION,
        source,
    })?;
    serde_json::from_str(&body).map_err(|source| AuthError::Decode {
        operation: OPERATION,
        source,
    })
}

/// Poll the token endpoint until the operator completes the flow.
///
/// `authorization_pending` keeps polling, `slow_down` widens the
/// interval, anything else is terminal. The loop gives up once the
/// code's lifetime has elapsed.
pub async fn wait_for_completion(
    http: &reqwest::Client,
    oauth: &OAuthConfig,
    client_id: &str,
    resource: &str,
    code: &DeviceCode,
) -> Result<Token, AuthError> {
    const OPERATION: &str = "device-code token poll";

    let mut interval = Duration::from_secs(
        code.interval
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS)
            .max(1),
    );
    let lifetime = Duration::from_secs(code.expires_in.unwrap_or(DEFAULT_CODE_LIFETIME_SECS));
    let deadline = Instant::now() + lifetime;

    loop {
        let response = http
            .post(oauth.token_endpoint.clone())
            .form(&[
                ("grant_type", GRANT_DEVICE_CODE),
                ("code", &code.device_code),
                ("client_id", client_id),
                ("resource", resource),
            ])
            .send()
            .await
            .map_err(|source| AuthError::Http {
                operation: OPERATION,
                source,
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|source| AuthError::Http {
            operation: OPERATION,
            source,
        })?;

        if status.is_success() {
            let parsed: TokenResponse =
                serde_json::from_str(&body).map_err(|source| AuthError::Decode {
                    operation: OPERATION,
                    source,
                })?;
            return Ok(parsed.into_token());
        }

        let err: ErrorResponse =
            serde_json::from_str(&body).map_err(|source| AuthError::Decode {
                operation: OPERATION,
                source,
            })?;

        match err.error.as_str() {
            ERROR_AUTHORIZATION_PENDING => {
                tracing::debug!("Device-code flow pending, polling again");
            }
            ERROR_SLOW_DOWN => {
                interval += Duration::from_secs(SLOW_DOWN_BACKOFF_SECS);
                tracing::debug!(?interval, "Provider asked to slow down polling");
            }
            _ => {
                return Err(AuthError::DeviceFlow(format!(
                    "{}: {}",
                    err.error, err.error_description
                )));
            }
        }

        if Instant::now() + interval > deadline {
            return Err(AuthError::DeviceFlowTimeout);
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_code_parses_provider_response() {
        let body = r#"{
            "user_code": "FJJ82AM9L",
            "device_code": "opaque-device-code",
            "verification_url": "https://microsoft.com/devicelogin",
            "expires_in": "900",
            "interval": "5",
            "message": "To sign in, use a web browser to open the page ..."
        }"#;

        let code: DeviceCode = serde_json::from_str(body).unwrap();
        assert_eq!(code.user_code, "FJJ82AM9L");
        assert_eq!(code.interval, Some(5));
        assert_eq!(code.expires_in, Some(900));
        assert!(code.message.starts_with("To sign in"));
    }
}
