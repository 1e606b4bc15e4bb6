//! REST API client module for the identity-bearing API.
//!
//! This module provides the `AuthApi` trait describing the four endpoints
//! the session layer consumes (login, refresh, logout, "who am I") and
//! `ApiClient`, its reqwest-backed implementation.
//!
//! Responses are wrapped in a `{ "data": ... }` envelope; failures carry
//! an `{ "errors": [...] }` body.

pub mod client;
pub mod error;
pub mod models;

pub use client::{ApiClient, AuthApi};
pub use error::ApiError;
pub use models::{ErrorDetail, ErrorExtensions, LoginCredentials, TokenPair, User};
