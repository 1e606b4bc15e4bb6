//! Error types for session and credential handling.

use thiserror::Error;

use crate::api::{ApiError, ErrorDetail};

#[derive(Error, Debug)]
pub enum AuthError {
    /// Login failed. `details` holds the server's error entries, empty when
    /// the failure was not a credential rejection.
    #[error("Authentication failure: {message}")]
    Authentication {
        message: String,
        details: Vec<ErrorDetail>,
    },

    /// The refresh endpoint rejected the refresh token or was unreachable.
    /// Local session state has been cleared, unless the session had
    /// already ended while the refresh was running.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl AuthError {
    /// Build an authentication error from the server's error entries
    pub fn authentication(details: Vec<ErrorDetail>) -> Self {
        let message = details
            .first()
            .map(|d| d.message.clone())
            .unwrap_or_else(|| "Authentication Failure".to_string());
        AuthError::Authentication { message, details }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenDecodeError {
    #[error("Token is not a JWT: expected 3 segments, found {0}")]
    Segments(usize),

    #[error("Token payload is not valid base64url: {0}")]
    Base64(String),

    #[error("Token payload is not valid JSON: {0}")]
    Json(String),

    #[error("Token payload has no numeric exp claim")]
    MissingExpiry,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Cookie file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cookie file is corrupt: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Keychain access failed: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Cookie jar lock poisoned")]
    Poisoned,
}
