//! Managed-identity token exchange
//!
//! When the process runs inside cloud-hosted compute, a local metadata
//! endpoint can mint tokens without any interaction. One request, no
//! cache, no tenant logic.

use ct_core::Token;

use crate::error::AuthError;

/// Exchange the ambient identity for a token scoped to `resource`
pub async fn exchange(
    http: &reqwest::Client,
    endpoint: &str,
    resource: &str,
) -> Result<Token, AuthError> {
    const OPERATION: &str = "managed-identity exchange";

    let url = reqwest::Url::parse_with_params(endpoint, &[("resource", resource)])
        .map_err(|e| AuthError::InvalidEndpoint(format!("managed-identity endpoint: {e}")))?;

    let response = http
        .get(url)
        .header("Metadata", "true")
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
    let parsed: crate::wire::TokenResponse =
        serde_json::from_str(&body).map_err(|source| AuthError::Decode {
            operation: OPERATION,
            source,
        })?;

    Ok(parsed.into_token())
}
