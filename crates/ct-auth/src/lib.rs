//! ct-auth: Token acquisition for cloudterm
//!
//! This crate owns the credential lifecycle: the interactive
//! device-code flow, silent refresh against the cached refresh token,
//! the common-tenant fallback chain, and the managed-identity shortcut
//! for cloud-hosted compute. Callers receive a rendered bearer-header
//! string; raw token fields never leave the broker.

pub mod broker;
pub mod device_code;
pub mod error;
pub mod msi;
pub mod tenants;
pub mod wire;

pub use broker::{BrokerConfig, OAuthConfig, TokenBroker, COMMON_TENANT};
pub use error::AuthError;
pub use tenants::Tenant;
