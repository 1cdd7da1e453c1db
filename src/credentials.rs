//! API credential lookup.
//!
//! The key is looked up in the application secret store first, a TOML file
//! such as:
//!
//! ```toml
//! OPENAI_API_KEY = "sk-..."
//! ```
//!
//! then in the process environment. The provider factory only reads the
//! environment, so a key found in the store must be exported with
//! [`ApiCredential::export_to_env`] before the tokio runtime starts any
//! worker threads.

use crate::error::HandscribeError;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the key in both the secret store and the environment.
pub const API_KEY_NAME: &str = "OPENAI_API_KEY";

/// Environment variable overriding the secret-store location.
pub const SECRETS_PATH_ENV: &str = "HANDSCRIBE_SECRETS";

/// Default secret-store location, relative to the working directory.
pub fn default_secrets_path() -> PathBuf {
    PathBuf::from(".handscribe").join("secrets.toml")
}

/// Where a credential was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    SecretStore(PathBuf),
    Environment,
}

/// A resolved API key. `Debug` never prints the value.
#[derive(Clone)]
pub struct ApiCredential {
    name: String,
    value: String,
    source: CredentialSource,
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

impl ApiCredential {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn source(&self) -> &CredentialSource {
        &self.source
    }

    /// Resolve `key`, secret store first, then the environment.
    ///
    /// A missing store is not an error; a store that exists but does not
    /// parse is. Returns `Ok(None)` when neither place has a non-empty key.
    pub fn resolve(secrets_path: &Path, key: &str) -> Result<Option<Self>, HandscribeError> {
        if let Some(value) = read_secret(secrets_path, key)? {
            debug!("{} loaded from {}", key, secrets_path.display());
            return Ok(Some(Self {
                name: key.to_string(),
                value,
                source: CredentialSource::SecretStore(secrets_path.to_path_buf()),
            }));
        }

        match std::env::var(key) {
            Ok(value) if !value.trim().is_empty() => Ok(Some(Self {
                name: key.to_string(),
                value,
                source: CredentialSource::Environment,
            })),
            _ => Ok(None),
        }
    }

    /// Make the key visible to the provider factory.
    ///
    /// Must run before any other thread reads the environment.
    pub fn export_to_env(&self) {
        if self.source != CredentialSource::Environment {
            std::env::set_var(&self.name, &self.value);
        }
    }
}

/// Resolve the API key and export it; warn when none is found.
pub fn load_api_credential(secrets_path: &Path) -> Result<Option<ApiCredential>, HandscribeError> {
    let credential = ApiCredential::resolve(secrets_path, API_KEY_NAME)?;
    match &credential {
        Some(c) => c.export_to_env(),
        None => warn!(
            "{} not found in {} or the environment; remote calls will fail",
            API_KEY_NAME,
            secrets_path.display()
        ),
    }
    Ok(credential)
}

fn read_secret(path: &Path, key: &str) -> Result<Option<String>, HandscribeError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(HandscribeError::SecretStore {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })
        }
    };

    let table: toml::Table = toml::from_str(&raw).map_err(|e| HandscribeError::SecretStore {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    Ok(table
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string))
}
