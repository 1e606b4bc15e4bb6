//! API client for communicating with the identity-bearing REST API.
//!
//! This module provides the `ApiClient` struct for the authentication
//! endpoints and for arbitrary bearer-authenticated JSON requests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::models::{DataEnvelope, ErrorEnvelope, LoginCredentials, TokenPair, User};
use super::ApiError;
use crate::config::AuthConfig;
use crate::error::AuthError;

// ============================================================================
// Constants
// ============================================================================

const LOGIN_PATH: &str = "/auth/login";
const REFRESH_PATH: &str = "/auth/refresh";
const LOGOUT_PATH: &str = "/auth/logout";
const ME_PATH: &str = "/users/me";

/// Token delivery mode requested from the auth endpoints.
/// "json" returns the refresh token in the body instead of a server cookie.
const TOKEN_MODE: &str = "json";

/// The remote endpoints the session layer depends on.
///
/// `refresh` must never attach an access token and must never be routed
/// through the request interceptor.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchange user credentials for a token pair.
    /// A rejection is `AuthError::Authentication` with the server's error entries.
    async fn login(&self, credentials: &LoginCredentials) -> Result<TokenPair, AuthError>;

    /// Exchange a refresh token for a new token pair
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError>;

    /// Invalidate a refresh token server-side
    async fn logout(&self, refresh_token: &str) -> Result<(), ApiError>;

    /// Fetch the user the access token belongs to
    async fn me(&self, access_token: &str) -> Result<User, ApiError>;
}

/// API client for the remote API.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client for the configured API URL
    pub fn new(config: &AuthConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn auth_headers(token: Option<&str>) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        if let Some(token) = token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ApiError::InvalidResponse(format!("Unusable access token: {}", e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse_data<T: DeserializeOwned>(response: reqwest::Response, url: &str) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str::<DataEnvelope<T>>(&text)
            .map(|envelope| envelope.data)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse response from {}: {}", url, e)))
    }

    /// Send a JSON request, optionally bearer-authenticated, and unwrap the
    /// `data` envelope of the response.
    pub async fn request_json<T, B>(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<&B>,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.url(path);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .headers(Self::auth_headers(token)?);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        debug!(%method, url = %url, status = %response.status(), "API response received");

        let response = Self::check_response(response).await?;
        Self::parse_data(response, &url).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str, token: Option<&str>) -> Result<T, ApiError> {
        self.request_json::<T, ()>(Method::GET, path, token, None).await
    }

    pub async fn post_json<T, B>(&self, path: &str, token: Option<&str>, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request_json(Method::POST, path, token, Some(body)).await
    }
}

#[async_trait]
impl AuthApi for ApiClient {
    async fn login(&self, credentials: &LoginCredentials) -> Result<TokenPair, AuthError> {
        let url = self.url(LOGIN_PATH);
        let mut body = serde_json::to_value(credentials)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to encode credentials: {}", e)))?;
        body["mode"] = serde_json::Value::from(TOKEN_MODE);

        let response = self
            .client
            .post(&url)
            .headers(Self::auth_headers(None)?)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::from)?;

        let status = response.status();
        if status.is_success() {
            return Ok(Self::parse_data(response, &url).await?);
        }

        // Rejections carry an errors list; keep it whatever the status
        let text = response.text().await.unwrap_or_default();
        debug!(status = %status, "Login rejected");
        let envelope: ErrorEnvelope = serde_json::from_str(&text).unwrap_or_default();
        Err(AuthError::authentication(envelope.errors))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        let body = serde_json::json!({
            "refresh_token": refresh_token,
            "mode": TOKEN_MODE,
        });
        self.post_json(REFRESH_PATH, None, &body).await
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), ApiError> {
        let url = self.url(LOGOUT_PATH);
        let response = self
            .client
            .post(&url)
            .headers(Self::auth_headers(None)?)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        Self::check_response(response).await?;
        Ok(())
    }

    async fn me(&self, access_token: &str) -> Result<User, ApiError> {
        self.get_json(ME_PATH, Some(access_token)).await
    }
}
