//! Auth error types

use thiserror::Error;

use ct_core::StoreError;

/// Errors that can occur while acquiring or refreshing a token
#[derive(Error, Debug)]
pub enum AuthError {
    /// The authority or managed-identity endpoint does not parse.
    /// Fatal: no tenant can ever authenticate against it.
    #[error("Invalid OAuth endpoint configuration: {0}")]
    InvalidEndpoint(String),

    /// The device-authorization flow failed with a terminal error code
    #[error("Device authorization failed: {0}")]
    DeviceFlow(String),

    /// The operator did not complete the device-code flow in time
    #[error("Device-code flow timed out before the code was entered")]
    DeviceFlowTimeout,

    /// The token endpoint rejected a refresh attempt
    #[error("Token refresh rejected: {0}")]
    RefreshRejected(String),

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

    /// The signed-in account has access to no tenants at all
    #[error("You don't have access to any tenants (directories)")]
    NoAccess,

    /// Credential cache failure
    #[error(transparent)]
    Store(#[from] StoreError),
}
