//! Token broker
//!
//! Orchestrates acquisition: managed-identity shortcut, tenant
//! resolution, cache reuse, silent refresh, and the common-tenant
//! fallback chain. The common tenant's session can mint tokens for any
//! tenant the account reaches, so a non-common tenant without a usable
//! cache entry is resolved through the common anchor instead of a
//! second interactive prompt.

use std::time::Duration;

use ct_core::{CredentialStore, StoreError, Token};

use crate::device_code;
use crate::error::AuthError;
use crate::msi;
use crate::tenants::{self, Tenant};
use crate::wire::{ErrorResponse, TokenResponse};

/// Pseudo-tenant that accepts any account and anchors the fallback chain
pub const COMMON_TENANT: &str = "common";

/// Authority that issues device codes and tokens
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com/";

/// Audience for the management control plane
pub const MANAGEMENT_RESOURCE: &str = "https://management.core.windows.net/";

/// Control-plane base URL (tenant listing)
pub const DEFAULT_MANAGEMENT_URL: &str = "https://management.azure.com";

/// Fixed public client identifier registered for device-code sign-in
pub const CLIENT_APP_ID: &str = "aebc6443-996d-45c2-90f0-388ff96faa56";

/// Environment variable announcing a managed-identity endpoint
pub const MSI_ENDPOINT_ENV: &str = "MSI_ENDPOINT";

/// Per-request timeout for token traffic
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Grant type for silent renewal
const GRANT_REFRESH_TOKEN: &str = "refresh_token";

/// OAuth API version on the v1 endpoints
const OAUTH_API_VERSION: &str = "1.0";

/// OAuth endpoints for one tenant, derived from the authority URL
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub device_code_endpoint: reqwest::Url,
    pub token_endpoint: reqwest::Url,
}

impl OAuthConfig {
    pub fn new(authority: &str, tenant_id: &str) -> Result<Self, AuthError> {
        let base = authority.trim_end_matches('/');

        let device_code_endpoint = reqwest::Url::parse(&format!(
            "{base}/{tenant_id}/oauth2/devicecode?api-version={OAUTH_API_VERSION}"
        ))
        .map_err(|e| AuthError::InvalidEndpoint(format!("device-code endpoint: {e}")))?;

        let token_endpoint = reqwest::Url::parse(&format!(
            "{base}/{tenant_id}/oauth2/token?api-version={OAUTH_API_VERSION}"
        ))
        .map_err(|e| AuthError::InvalidEndpoint(format!("token endpoint: {e}")))?;

        Ok(Self {
            device_code_endpoint,
            token_endpoint,
        })
    }
}

/// Broker configuration; defaults target the public cloud
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Authority base URL, trailing slash tolerated
    pub authority: String,
    /// Control-plane base URL for the tenant listing
    pub management_url: String,
    /// Audience tokens are minted for
    pub resource: String,
    /// Public client identifier
    pub client_id: String,
    /// Managed-identity endpoint, when running inside cloud compute
    pub msi_endpoint: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            authority: DEFAULT_AUTHORITY.to_string(),
            management_url: DEFAULT_MANAGEMENT_URL.to_string(),
            resource: MANAGEMENT_RESOURCE.to_string(),
            client_id: CLIENT_APP_ID.to_string(),
            msi_endpoint: None,
        }
    }
}

impl BrokerConfig {
    /// Default configuration plus the ambient managed-identity
    /// endpoint, if the environment declares one
    pub fn from_env() -> Self {
        Self {
            msi_endpoint: std::env::var(MSI_ENDPOINT_ENV).ok(),
            ..Self::default()
        }
    }
}

/// Acquires bearer headers for control-plane calls.
///
/// Callers get a rendered `"{type} {token}"` string; token fields stay
/// inside the broker and the on-disk cache.
pub struct TokenBroker {
    store: CredentialStore,
    http: reqwest::Client,
    config: BrokerConfig,
}

impl TokenBroker {
    /// Create a broker over the given store.
    ///
    /// Fails if the configured authority cannot form endpoint URLs;
    /// nothing could ever authenticate, so this is fatal.
    pub fn new(store: CredentialStore, config: BrokerConfig) -> Result<Self, AuthError> {
        OAuthConfig::new(&config.authority, COMMON_TENANT)?;

        let http = reqwest::Client::builder()
            .user_agent(concat!("cloudterm/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|source| AuthError::Http {
                operation: "http client construction",
                source,
            })?;

        Ok(Self {
            store,
            http,
            config,
        })
    }

    /// The credential store this broker persists through
    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Acquire a bearer header for a concrete tenant
    pub async fn acquire(&self, tenant_id: &str) -> Result<String, AuthError> {
        if let Some(endpoint) = &self.config.msi_endpoint {
            let token = msi::exchange(&self.http, endpoint, &self.config.resource).await?;
            return Ok(token.bearer());
        }

        self.acquire_tenant(tenant_id).await
    }

    /// Acquire a bearer header for the currently selected tenant,
    /// resolving and persisting one if none is selected yet
    pub async fn acquire_current(&self) -> Result<String, AuthError> {
        if let Some(endpoint) = &self.config.msi_endpoint {
            let token = msi::exchange(&self.http, endpoint, &self.config.resource).await?;
            return Ok(token.bearer());
        }

        let mut settings = self.store.load_settings()?;
        if !settings.has_active_tenant() {
            let tenants = self.list_accessible_tenants().await?;
            let first = tenants.first().ok_or(AuthError::NoAccess)?;
            tracing::info!(tenant = %first.tenant_id, "Selected first accessible tenant");
            settings.active_tenant = first.tenant_id.clone();
            self.store.save_settings(&settings)?;
        }

        self.acquire_tenant(&settings.active_tenant).await
    }

    /// List the tenants the signed-in account can reach, bootstrapping
    /// a common-tenant session if needed
    pub async fn list_accessible_tenants(&self) -> Result<Vec<Tenant>, AuthError> {
        let bearer = if let Some(endpoint) = &self.config.msi_endpoint {
            msi::exchange(&self.http, endpoint, &self.config.resource)
                .await?
                .bearer()
        } else {
            self.acquire_tenant(COMMON_TENANT).await?
        };

        tenants::list(&self.http, &self.config.management_url, &bearer).await
    }

    /// Persist an explicit tenant selection
    pub fn set_active_tenant(&self, tenant_id: &str) -> Result<(), AuthError> {
        let mut settings = self.store.load_settings()?;
        settings.active_tenant = tenant_id.to_string();
        self.store.save_settings(&settings)?;
        Ok(())
    }

    /// Cache/refresh/fallback decision tree for one tenant
    async fn acquire_tenant(&self, tenant_id: &str) -> Result<String, AuthError> {
        match self.store.load_token(tenant_id) {
            Ok(token) if !token.is_expired() => {
                tracing::debug!(tenant = tenant_id, "Reusing cached token");
                return Ok(token.bearer());
            }
            Ok(expired) => {
                match self
                    .refresh_and_save(tenant_id, &expired.refresh_token)
                    .await
                {
                    Ok(token) => return Ok(token.bearer()),
                    Err(e) => {
                        tracing::warn!(tenant = tenant_id, error = %e, "Silent refresh failed");
                    }
                }
            }
            Err(StoreError::NotFound(_)) => {
                tracing::debug!(tenant = tenant_id, "No cached token");
            }
            // Malformed cache files are surfaced, never regenerated over
            Err(e) => return Err(e.into()),
        }

        if tenant_id != COMMON_TENANT {
            self.acquire_via_common(tenant_id).await
        } else {
            let token = self.device_flow(COMMON_TENANT).await?;
            Ok(token.bearer())
        }
    }

    /// Fallback chain: ensure a usable common-tenant session, then use
    /// its refresh token as the anchor for the target tenant
    async fn acquire_via_common(&self, tenant_id: &str) -> Result<String, AuthError> {
        tracing::info!(tenant = tenant_id, "Resolving through the common tenant");

        match self.store.load_token(COMMON_TENANT) {
            Ok(token) if !token.is_expired() => {}
            Ok(expired) => {
                if let Err(e) = self
                    .refresh_and_save(COMMON_TENANT, &expired.refresh_token)
                    .await
                {
                    tracing::warn!(error = %e, "Common-tenant refresh failed, re-acquiring");
                    self.device_flow(COMMON_TENANT).await?;
                }
            }
            Err(StoreError::NotFound(_)) => {
                self.device_flow(COMMON_TENANT).await?;
            }
            Err(e) => return Err(e.into()),
        }

        let anchor = self.store.load_token(COMMON_TENANT)?;
        let token = self
            .refresh_and_save(tenant_id, &anchor.refresh_token)
            .await?;
        Ok(token.bearer())
    }

    /// Run the interactive device-code flow and persist the result
    async fn device_flow(&self, tenant_id: &str) -> Result<Token, AuthError> {
        let oauth = OAuthConfig::new(&self.config.authority, tenant_id)?;

        let code = device_code::initiate(
            &self.http,
            &oauth,
            &self.config.client_id,
            &self.config.resource,
        )
        .await?;

        // Operator instructions go to stderr so they survive stdout
        // redirection
        eprintln!();
        eprintln!("{}", code.message);
        eprintln!();

        tracing::info!(tenant = tenant_id, "Waiting for device-code sign-in");
        let token = device_code::wait_for_completion(
            &self.http,
            &oauth,
            &self.config.client_id,
            &self.config.resource,
            &code,
        )
        .await?;

        self.store.save_token(tenant_id, &token)?;
        Ok(token)
    }

    /// Exchange a refresh token at the target tenant's token endpoint
    /// and persist the result under that tenant
    async fn refresh_and_save(
        &self,
        tenant_id: &str,
        refresh_token: &str,
    ) -> Result<Token, AuthError> {
        const OPERATION: &str = "token refresh";

        let oauth = OAuthConfig::new(&self.config.authority, tenant_id)?;

        let response = self
            .http
            .post(oauth.token_endpoint.clone())
            .form(&[
                ("grant_type", GRANT_REFRESH_TOKEN),
                ("refresh_token", refresh_token),
                ("client_id", &self.config.client_id),
                ("resource", &self.config.resource),
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

        if !status.is_success() {
            let err: ErrorResponse = serde_json::from_str(&body).unwrap_or(ErrorResponse {
                error: status.to_string(),
                error_description: String::new(),
            });
            return Err(AuthError::RefreshRejected(format!(
                "{}: {}",
                err.error, err.error_description
            )));
        }

        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|source| AuthError::Decode {
                operation: OPERATION,
                source,
            })?;

        let token = parsed.into_token();
        self.store.save_token(tenant_id, &token)?;
        tracing::debug!(tenant = tenant_id, "Refreshed token cached");
        Ok(token)
    }
}
