//! Session configuration management.
//!
//! This module handles loading the configuration that tells the session
//! layer where the API lives, which cookie names hold the tokens, and
//! which routes the route guard redirects to.
//!
//! Configuration is stored at `~/.config/authkeeper/config.json` and can be
//! overridden per key through `AUTHKEEPER_*` environment variables.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "authkeeper";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const ENV_API_URL: &str = "AUTHKEEPER_API_URL";
const ENV_ACCESS_COOKIE: &str = "AUTHKEEPER_ACCESS_COOKIE";
const ENV_REFRESH_COOKIE: &str = "AUTHKEEPER_REFRESH_COOKIE";

fn default_access_cookie() -> String {
    "access_token".to_string()
}

fn default_refresh_cookie() -> String {
    "refresh_token".to_string()
}

fn default_login_route() -> String {
    "/login".to_string()
}

fn default_home_route() -> String {
    "/".to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(default)]
    pub api_url: String,
    #[serde(default = "default_access_cookie")]
    pub access_token_cookie_name: String,
    #[serde(default = "default_refresh_cookie")]
    pub refresh_token_cookie_name: String,
    #[serde(default = "default_login_route")]
    pub login_route: String,
    #[serde(default = "default_home_route")]
    pub home_route: String,
    #[serde(default)]
    pub hide_login_when_authenticated: bool,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
}

impl AuthConfig {
    /// Configuration for `api_url` with every other option at its default
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            access_token_cookie_name: default_access_cookie(),
            refresh_token_cookie_name: default_refresh_cookie(),
            login_route: default_login_route(),
            home_route: default_home_route(),
            hide_login_when_authenticated: false,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }

    /// Load from the default config path, apply environment overrides and validate
    pub fn load() -> Result<Self, AuthError> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific file; a missing file yields an empty config
    pub fn load_from(path: &Path) -> Result<Self, AuthError> {
        if !path.exists() {
            return Ok(Self::new(String::new()));
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AuthError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&contents)
            .map_err(|e| AuthError::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Write to the default config path
    pub fn save(&self) -> Result<PathBuf, AuthError> {
        let path = Self::config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), AuthError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AuthError::Config(format!("Failed to create {}: {}", parent.display(), e)))?;
        }
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| AuthError::Config(e.to_string()))?;
        std::fs::write(path, contents)
            .map_err(|e| AuthError::Config(format!("Failed to write {}: {}", path.display(), e)))
    }

    /// Overlay values from the environment. `lookup` is injectable for tests.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_URL) {
            self.api_url = url;
        }
        if let Some(name) = lookup(ENV_ACCESS_COOKIE) {
            self.access_token_cookie_name = name;
        }
        if let Some(name) = lookup(ENV_REFRESH_COOKIE) {
            self.refresh_token_cookie_name = name;
        }
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        if self.api_url.trim().is_empty() {
            return Err(AuthError::Config("apiUrl is required".to_string()));
        }
        let url = reqwest::Url::parse(&self.api_url)
            .map_err(|e| AuthError::Config(format!("apiUrl '{}' is not a valid URL: {}", self.api_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AuthError::Config(format!("apiUrl must be http(s), got '{}'", url.scheme())));
        }
        if self.access_token_cookie_name.is_empty() || self.refresh_token_cookie_name.is_empty() {
            return Err(AuthError::Config("cookie names must not be empty".to_string()));
        }
        if self.access_token_cookie_name == self.refresh_token_cookie_name {
            return Err(AuthError::Config("access and refresh cookie names must differ".to_string()));
        }
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf, AuthError> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AuthError::Config("Could not find config directory".to_string()))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir() -> Result<PathBuf, AuthError> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| AuthError::Config("Could not find cache directory".to_string()))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
