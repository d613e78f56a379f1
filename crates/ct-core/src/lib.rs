//! ct-core: Core models and credential storage for cloudterm
//!
//! This crate provides the token and settings records, the on-disk
//! credential store with atomic-replace semantics, and the shared
//! error types used by the auth and session layers.

pub mod error;
pub mod settings;
pub mod store;
pub mod token;

pub use error::StoreError;
pub use settings::Settings;
pub use store::CredentialStore;
pub use token::Token;
