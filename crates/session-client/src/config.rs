//! Client configuration
//!
//! Precedence: explicit builder calls > env vars > config file > defaults.
//! Tokens never live in the TOML; the optional `credentials_file` points at
//! the file-backed credential store instead.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use session_auth::{CredentialStore, FileCredentialStore, MemoryCredentialStore};

/// Env var that overrides `api.base_url`.
pub const BASE_URL_ENV: &str = "API_BASE_URL";
/// Env var naming the config file when no explicit path is given.
pub const CONFIG_PATH_ENV: &str = "SESSION_CLIENT_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "session-client.toml";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(15);

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    pub api: ApiConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Backend API settings
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Session and refresh settings
#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,
    /// Persist credentials here; in-memory only when unset
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,
    #[serde(default = "default_login_route")]
    pub login_route: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_path: default_refresh_path(),
            refresh_timeout_secs: default_refresh_timeout(),
            credentials_file: None,
            login_route: default_login_route(),
        }
    }
}

fn default_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}

fn default_refresh_timeout() -> u64 {
    DEFAULT_REFRESH_TIMEOUT.as_secs()
}

fn default_refresh_path() -> String {
    session_auth::REFRESH_TOKEN_PATH.to_string()
}

fn default_login_route() -> String {
    session_auth::DEFAULT_LOGIN_ROUTE.to_string()
}

impl ClientConfig {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: ClientConfig = toml::from_str(&contents)?;

        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            config.api.base_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> common::Result<()> {
        validate_base_url(&self.api.base_url)?;

        if self.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "api.timeout_secs must be greater than 0".into(),
            ));
        }
        if self.auth.refresh_timeout_secs == 0 {
            return Err(common::Error::Config(
                "auth.refresh_timeout_secs must be greater than 0".into(),
            ));
        }
        if !self.auth.refresh_path.starts_with('/') {
            return Err(common::Error::Config(format!(
                "auth.refresh_path must start with /, got: {}",
                self.auth.refresh_path
            )));
        }
        Ok(())
    }

    /// Resolve config file path from an explicit argument or the env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var(CONFIG_PATH_ENV) {
            return PathBuf::from(p);
        }
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.auth.refresh_timeout_secs)
    }

    /// Open the configured credential store.
    pub fn credential_store(&self) -> common::Result<Arc<dyn CredentialStore>> {
        match &self.auth.credentials_file {
            Some(path) => {
                let store = FileCredentialStore::load(path.clone()).map_err(|e| {
                    common::Error::Config(format!(
                        "failed to open credentials_file {}: {e}",
                        path.display()
                    ))
                })?;
                Ok(Arc::new(store))
            }
            None => Ok(Arc::new(MemoryCredentialStore::new())),
        }
    }
}

pub(crate) fn validate_base_url(url: &str) -> common::Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(common::Error::Config(format!(
            "base_url must start with http:// or https://, got: {url}"
        )));
    }
    Ok(())
}
