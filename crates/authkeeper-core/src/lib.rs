//! Client-side session and token lifecycle management.
//!
//! `authkeeper-core` keeps an access token valid for an application talking
//! to an identity-bearing REST API: it restores stored sessions, refreshes
//! tokens before they expire (one refresh in flight at a time), retries
//! requests rejected for an expired token, and publishes the signed-in user.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{ApiClient, ApiError, AuthApi, LoginCredentials, TokenPair, User};
pub use auth::{CookieJar, FileJar, KeyringJar, MemoryJar, Redirect, SessionAuth};
pub use config::AuthConfig;
pub use error::AuthError;
