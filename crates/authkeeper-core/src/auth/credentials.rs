use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use super::clock::TokenClock;
use super::jar::CookieJar;
use crate::api::TokenPair;
use crate::config::AuthConfig;

/// Snapshot of the stored credential.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }
}

/// Token persistence on top of a cookie jar.
///
/// Storage failures are logged and reads degrade to "absent", so the store
/// is always safe to consult before any network activity.
#[derive(Clone)]
pub struct CredentialStore {
    jar: Arc<dyn CookieJar>,
    access_key: String,
    refresh_key: String,
}

impl CredentialStore {
    pub fn new(jar: Arc<dyn CookieJar>, config: &AuthConfig) -> Self {
        Self {
            jar,
            access_key: config.access_token_cookie_name.clone(),
            refresh_key: config.refresh_token_cookie_name.clone(),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match self.jar.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Failed to read credential");
                None
            }
        }
    }

    /// Store a value, returning it back to the caller
    pub fn set(&self, key: &str, value: String) -> String {
        if let Err(e) = self.jar.set(key, &value) {
            warn!(key, error = %e, "Failed to store credential");
        }
        value
    }

    /// Remove a value, returning what was stored before
    pub fn delete(&self, key: &str) -> Option<String> {
        let previous = self.get(key);
        if let Err(e) = self.jar.remove(key) {
            warn!(key, error = %e, "Failed to remove credential");
        }
        previous
    }

    pub fn access_token(&self) -> Option<String> {
        self.get(&self.access_key)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.get(&self.refresh_key)
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token().is_some()
    }

    pub fn set_access_token(&self, token: String) -> String {
        self.set(&self.access_key, token)
    }

    pub fn set_refresh_token(&self, token: String) -> String {
        self.set(&self.refresh_key, token)
    }

    pub fn set_tokens(&self, tokens: &TokenPair) {
        self.set_access_token(tokens.access_token.clone());
        self.set_refresh_token(tokens.refresh_token.clone());
    }

    /// Remove both tokens
    pub fn clear(&self) {
        self.delete(&self.access_key);
        self.delete(&self.refresh_key);
    }

    /// Current credential, with the expiry derived from the access token
    pub fn credential(&self) -> Credential {
        let access_token = self.access_token();
        let expires_at = access_token
            .as_deref()
            .and_then(|t| TokenClock::decode_expiry(t).ok());
        Credential {
            access_token,
            refresh_token: self.refresh_token(),
            expires_at,
        }
    }
}
