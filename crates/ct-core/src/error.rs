//! Core error types for cloudterm

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the on-disk credential store
#[derive(Error, Debug)]
pub enum StoreError {
    /// No cache entry exists at the given path
    #[error("No cached credential at {0}")]
    NotFound(PathBuf),

    /// A cache file exists but does not contain well-formed JSON
    #[error("Malformed cache file {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
