//! Control-plane session provisioning
//!
//! A single PUT creates (or attaches to) the user's console; a POST
//! inside it negotiates a terminal and yields the socket endpoint the
//! duplex channel dials. Every call re-acquires a bearer header from
//! the token broker, so a token that expires mid-session is renewed
//! transparently on the next control-plane call.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use ct_auth::{AuthError, TokenBroker};

use crate::bridge::ResizeTarget;

/// API version of the console and user-settings endpoints
const PORTAL_API_VERSION: &str = "2018-10-01";

/// API version of the terminal endpoints
const TERMINAL_API_VERSION: &str = "2019-01-01";

/// Geometry sent with the terminal negotiation. The resize watcher
/// reports the real local geometry within one poll interval, so these
/// only have to be plausible.
const INITIAL_COLS: u16 = 120;
const INITIAL_ROWS: u16 = 80;

/// Per-request timeout for control-plane traffic
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Errors raised while provisioning a session or terminal
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Could not obtain a bearer header for the call
    #[error("Failed to acquire auth token: {0}")]
    Auth(#[from] AuthError),

    /// Network-level request failure
    #[error("Request failed during {operation}: {source}")]
    Http {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// Endpoint answered with an unexpected HTTP status
    #[error("{operation} returned HTTP {status}")]
    UnexpectedStatus {
        operation: &'static str,
        status: reqwest::StatusCode,
    },

    /// Response body did not match the expected wire format
    #[error("Malformed response from {operation}: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The response carried no endpoint to connect to
    #[error("{operation} answered without a usable endpoint")]
    MissingEndpoint { operation: &'static str },

    /// The account has never set up cloud shell storage
    #[error(
        "Cloud shell is not provisioned for this account. \
         Complete the one-time setup at https://shell.azure.com first"
    )]
    NotOnboarded,
}

/// A negotiated terminal session; lives for one run only
#[derive(Debug, Clone)]
pub struct Session {
    /// Console resource the terminal lives in
    pub console_uri: String,
    /// Terminal identifier inside the console
    pub terminal_id: String,
    /// WebSocket endpoint carrying the terminal's byte stream
    pub socket_uri: String,
    /// Tenant the session was provisioned under; resize calls
    /// re-acquire tokens scoped to it
    pub tenant_id: String,
}

/// Cloud shell preferences read from the user-settings endpoint
#[derive(Debug, Clone, Default)]
pub struct UserSettings {
    pub preferred_shell_type: Option<String>,
}

#[derive(Serialize)]
struct ConsoleRequest {
    properties: ConsoleRequestProperties,
}

#[derive(Serialize)]
struct ConsoleRequestProperties {
    #[serde(rename = "osType")]
    os_type: &'static str,
}

#[derive(Deserialize)]
struct ConsoleResponse {
    properties: Option<ConsoleResponseProperties>,
}

#[derive(Deserialize)]
struct ConsoleResponseProperties {
    #[serde(rename = "provisioningState")]
    provisioning_state: Option<String>,
    uri: Option<String>,
}

#[derive(Deserialize)]
struct TerminalResponse {
    #[serde(rename = "socketUri")]
    socket_uri: Option<String>,
    id: Option<String>,
}

#[derive(Deserialize)]
struct UserSettingsResponse {
    properties: Option<UserSettingsProperties>,
}

#[derive(Deserialize)]
struct UserSettingsProperties {
    #[serde(rename = "storageProfile")]
    storage_profile: Option<serde_json::Value>,
    #[serde(rename = "preferredShellType")]
    preferred_shell_type: Option<String>,
}

/// Creates the remote console and negotiates terminals inside it
pub struct SessionProvisioner {
    broker: Arc<TokenBroker>,
    http: reqwest::Client,
    management_url: String,
}

impl SessionProvisioner {
    /// Provisioner against the public control plane
    pub fn new(broker: Arc<TokenBroker>) -> Result<Self, ProvisionError> {
        Self::with_management_url(broker, ct_auth::broker::DEFAULT_MANAGEMENT_URL)
    }

    /// Provisioner against an explicit control-plane base URL
    pub fn with_management_url(
        broker: Arc<TokenBroker>,
        management_url: impl Into<String>,
    ) -> Result<Self, ProvisionError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("cloudterm/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|source| ProvisionError::Http {
                operation: "http client construction",
                source,
            })?;

        let management_url: String = management_url.into();
        Ok(Self {
            broker,
            http,
            management_url: management_url.trim_end_matches('/').to_string(),
        })
    }

    /// Verify the account is onboarded and read its preferences.
    ///
    /// A settings record without a storage profile means cloud shell
    /// was never set up; proceeding would only fail later with a far
    /// less actionable error.
    pub async fn check_user_settings(&self, tenant_id: &str) -> Result<UserSettings, ProvisionError> {
        const OPERATION: &str = "user-settings lookup";

        let url = format!(
            "{}/providers/Microsoft.Portal/userSettings/cloudconsole?api-version={}",
            self.management_url, PORTAL_API_VERSION
        );
        let bearer = self.broker.acquire(tenant_id).await?;

        let response = self
            .http
            .get(&url)
            .header(header::AUTHORIZATION, bearer)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|source| ProvisionError::Http {
                operation: OPERATION,
                source,
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProvisionError::NotOnboarded);
        }
        if !response.status().is_success() {
            return Err(ProvisionError::UnexpectedStatus {
                operation: OPERATION,
                status: response.status(),
            });
        }

        let body = response.text().await.map_err(|source| ProvisionError::Http {
            operation: OPERATION,
            source,
        })?;
        let parsed: UserSettingsResponse =
            serde_json::from_str(&body).map_err(|source| ProvisionError::Decode {
                operation: OPERATION,
                source,
            })?;

        let properties = parsed.properties.ok_or(ProvisionError::NotOnboarded)?;
        if properties.storage_profile.is_none() {
            return Err(ProvisionError::NotOnboarded);
        }

        Ok(UserSettings {
            preferred_shell_type: properties.preferred_shell_type,
        })
    }

    /// Create or attach to the user's console; returns its URI.
    ///
    /// The PUT is idempotent and synchronous server-side; the returned
    /// provisioning state is logged but not polled.
    pub async fn provision(&self, tenant_id: &str) -> Result<String, ProvisionError> {
        const OPERATION: &str = "console provisioning";

        let url = format!(
            "{}/providers/Microsoft.Portal/consoles/default?api-version={}",
            self.management_url, PORTAL_API_VERSION
        );
        let bearer = self.broker.acquire(tenant_id).await?;

        tracing::info!("Requesting cloud shell");
        let response = self
            .http
            .put(&url)
            .header(header::AUTHORIZATION, bearer)
            .header(header::ACCEPT, "application/json")
            .json(&ConsoleRequest {
                properties: ConsoleRequestProperties { os_type: "linux" },
            })
            .send()
            .await
            .map_err(|source| ProvisionError::Http {
                operation: OPERATION,
                source,
            })?;

        if !response.status().is_success() {
            return Err(ProvisionError::UnexpectedStatus {
                operation: OPERATION,
                status: response.status(),
            });
        }

        let body = response.text().await.map_err(|source| ProvisionError::Http {
            operation: OPERATION,
            source,
        })?;
        let parsed: ConsoleResponse =
            serde_json::from_str(&body).map_err(|source| ProvisionError::Decode {
                operation: OPERATION,
                source,
            })?;

        let properties = parsed.properties.ok_or(ProvisionError::MissingEndpoint {
            operation: OPERATION,
        })?;

        if let Some(state) = &properties.provisioning_state {
            tracing::info!(state = %state, "Console provisioning state");
        }

        match properties.uri {
            Some(uri) if !uri.is_empty() => Ok(uri),
            _ => Err(ProvisionError::MissingEndpoint {
                operation: OPERATION,
            }),
        }
    }

    /// Negotiate a terminal inside the console; returns the session
    /// the duplex channel connects to
    pub async fn negotiate_terminal(
        &self,
        tenant_id: &str,
        console_uri: &str,
        shell: &str,
    ) -> Result<Session, ProvisionError> {
        const OPERATION: &str = "terminal negotiation";

        let url = format!(
            "{}/terminals?cols={}&rows={}&version={}&shell={}",
            console_uri, INITIAL_COLS, INITIAL_ROWS, TERMINAL_API_VERSION, shell
        );
        let bearer = self.broker.acquire(tenant_id).await?;

        tracing::info!(shell = shell, "Connecting terminal");
        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, bearer)
            .header(header::ACCEPT, "application/json")
            .body("")
            .send()
            .await
            .map_err(|source| ProvisionError::Http {
                operation: OPERATION,
                source,
            })?;

        if !response.status().is_success() {
            return Err(ProvisionError::UnexpectedStatus {
                operation: OPERATION,
                status: response.status(),
            });
        }

        let body = response.text().await.map_err(|source| ProvisionError::Http {
            operation: OPERATION,
            source,
        })?;
        let parsed: TerminalResponse =
            serde_json::from_str(&body).map_err(|source| ProvisionError::Decode {
                operation: OPERATION,
                source,
            })?;

        let socket_uri = match parsed.socket_uri {
            Some(uri) if !uri.is_empty() => uri,
            _ => {
                return Err(ProvisionError::MissingEndpoint {
                    operation: OPERATION,
                })
            }
        };

        Ok(Session {
            console_uri: console_uri.to_string(),
            terminal_id: parsed.id.unwrap_or_default(),
            socket_uri,
            tenant_id: tenant_id.to_string(),
        })
    }

    /// Report new terminal geometry. Best-effort: a failed resize is
    /// logged and swallowed, because it must never tear down an
    /// otherwise-healthy session.
    pub async fn resize(&self, session: &Session, cols: u16, rows: u16) {
        let url = format!(
            "{}/terminals/{}/size?cols={}&rows={}&version={}",
            session.console_uri, session.terminal_id, cols, rows, TERMINAL_API_VERSION
        );

        let bearer = match self.broker.acquire(&session.tenant_id).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "Resize skipped: could not acquire token");
                return;
            }
        };

        let result = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, bearer)
            .header(header::ACCEPT, "application/json")
            .body("")
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(cols, rows, "Reported terminal size");
            }
            Ok(response) => {
                tracing::warn!(status = %response.status(), "Resize rejected");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Resize request failed");
            }
        }
    }
}

/// One provisioned session plus the provisioner that created it;
/// the bridge's resize watcher reports geometry through this
pub struct SessionHandle {
    pub provisioner: Arc<SessionProvisioner>,
    pub session: Session,
}

#[async_trait]
impl ResizeTarget for SessionHandle {
    async fn resize(&self, cols: u16, rows: u16) {
        self.provisioner.resize(&self.session, cols, rows).await;
    }
}
