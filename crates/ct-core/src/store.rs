//! On-disk credential storage
//!
//! The store owns two kinds of files under one user-scoped directory:
//! a per-tenant token cache (`accessToken.{tenant}.json`) and a single
//! settings file (`settings.json`).
//!
//! Every write goes through the same sequence: serialize to a temp file
//! in the target directory, atomically rename over the destination,
//! then restrict permissions to the owner. A concurrent reader (e.g. a
//! second terminal running the client) can therefore never observe a
//! half-written file. There is no file locking; racing writers resolve
//! by last-rename-wins.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::settings::Settings;
use crate::token::Token;

/// Settings file name inside the cache directory
const SETTINGS_FILE: &str = "settings.json";

/// Directory under the user's home that holds all cached state
const CACHE_DIR_NAME: &str = ".cloudterm";

/// Reads and writes the token cache and settings records.
///
/// The cache directory is supplied at construction; nothing in this
/// type consults process-wide state.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    base_dir: PathBuf,
}

impl CredentialStore {
    /// Create a store rooted at the given directory
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Default cache directory: `~/.cloudterm`
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CACHE_DIR_NAME)
    }

    /// Path of the token cache file for a tenant
    pub fn token_path(&self, tenant_id: &str) -> PathBuf {
        self.base_dir
            .join(format!("accessToken.{}.json", tenant_id.to_lowercase()))
    }

    /// Path of the settings file
    pub fn settings_path(&self) -> PathBuf {
        self.base_dir.join(SETTINGS_FILE)
    }

    /// Load the cached token for a tenant.
    ///
    /// A missing file is `StoreError::NotFound`; a present but
    /// malformed file is `StoreError::Decode` and is never defaulted.
    pub fn load_token(&self, tenant_id: &str) -> Result<Token, StoreError> {
        let path = self.token_path(tenant_id);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(path));
            }
            Err(e) => return Err(StoreError::Io(e)),
        };

        serde_json::from_str(&contents).map_err(|source| StoreError::Decode { path, source })
    }

    /// Persist a token for a tenant, replacing any previous record
    pub fn save_token(&self, tenant_id: &str, token: &Token) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(token)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        self.write_atomic(&self.token_path(tenant_id), &json)
    }

    /// Load the settings record.
    ///
    /// An absent file yields defaults; a malformed file is a decode
    /// error.
    pub fn load_settings(&self) -> Result<Settings, StoreError> {
        let path = self.settings_path();
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Settings::default());
            }
            Err(e) => return Err(StoreError::Io(e)),
        };

        serde_json::from_str(&contents).map_err(|source| StoreError::Decode { path, source })
    }

    /// Persist the settings record
    pub fn save_settings(&self, settings: &Settings) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(settings)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        self.write_atomic(&self.settings_path(), &json)
    }

    /// Delete the settings file; absence is not an error
    pub fn reset(&self) -> Result<(), StoreError> {
        match fs::remove_file(self.settings_path()) {
            Ok(()) => {
                tracing::debug!("Removed settings file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    /// Write a file via temp-file-then-rename, then restrict it to the
    /// owner.
    ///
    /// The temp file is created in the destination directory so the
    /// rename stays on one filesystem and is atomic.
    fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<(), StoreError> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(contents)?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }
}
