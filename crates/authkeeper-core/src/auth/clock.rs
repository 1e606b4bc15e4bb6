//! Token expiry arithmetic.
//!
//! Access tokens are JWTs; only the `exp` claim of the payload is read.
//! The signature is not verified, that is the server's job.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::error::TokenDecodeError;

/// Lead time before actual expiry at which a refresh is triggered (5 minutes)
pub const SAFETY_MARGIN_MS: i64 = 300_000;

/// Source of the current time.
///
/// Production code uses `SystemClock`; tests pin time with their own impl.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Clone)]
pub struct TokenClock {
    clock: Arc<dyn Clock>,
    margin: Duration,
}

impl Default for TokenClock {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl TokenClock {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            margin: Duration::milliseconds(SAFETY_MARGIN_MS),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Decode the `exp` claim of a JWT into a timestamp
    pub fn decode_expiry(token: &str) -> Result<DateTime<Utc>, TokenDecodeError> {
        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 {
            return Err(TokenDecodeError::Segments(segments.len()));
        }

        // Some issuers keep the padding, the no-pad engine rejects it
        let payload = segments[1].trim_end_matches('=');
        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| TokenDecodeError::Base64(e.to_string()))?;
        let claims: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| TokenDecodeError::Json(e.to_string()))?;

        let exp = claims
            .get("exp")
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
            .ok_or(TokenDecodeError::MissingExpiry)?;

        Utc.timestamp_opt(exp, 0)
            .single()
            .ok_or(TokenDecodeError::MissingExpiry)
    }

    /// Time left before a refresh is due: `exp - now - margin`.
    ///
    /// Negative means the refresh is already due.
    pub fn time_until_refresh_needed(&self, token: &str) -> Result<Duration, TokenDecodeError> {
        let expires_at = Self::decode_expiry(token)?;
        Ok(expires_at - self.now() - self.margin)
    }

    /// True when the token is inside the safety margin or cannot be decoded
    pub fn needs_refresh(&self, token: &str) -> bool {
        match self.time_until_refresh_needed(token) {
            Ok(remaining) => remaining < Duration::zero(),
            Err(_) => true,
        }
    }

    /// Timer delay for the next refresh, clamped at zero
    pub fn delay_for(&self, token: &str) -> Result<std::time::Duration, TokenDecodeError> {
        let remaining = self.time_until_refresh_needed(token)?;
        Ok(remaining.to_std().unwrap_or(std::time::Duration::ZERO))
    }
}
