//! Transparent retry of API calls rejected for an expired access token.

use std::future::Future;

use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::coordinator::RefreshCoordinator;
use super::credentials::CredentialStore;
use crate::api::{ApiClient, ApiError};

/// Runs an outbound call with the stored access token and, when the server
/// answers with an authentication failure, refreshes once and replays it.
///
/// The refresh endpoint itself never goes through here.
#[derive(Clone)]
pub struct RequestInterceptor {
    store: CredentialStore,
    coordinator: RefreshCoordinator,
}

impl RequestInterceptor {
    pub fn new(store: CredentialStore, coordinator: RefreshCoordinator) -> Self {
        Self { store, coordinator }
    }

    /// Run `op` with the current access token, retrying at most once.
    ///
    /// If no refresh token is stored or the refresh fails, the original
    /// error is returned unchanged. The retry's own error is returned as is.
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<T, ApiError>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let original = match op(self.store.access_token()).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !original.is_auth_failure() {
            return Err(original);
        }
        if !self.store.has_refresh_token() {
            debug!("Request unauthorized and no refresh token stored");
            return Err(original);
        }

        match self.coordinator.refresh().await {
            Ok(token) => {
                debug!("Replaying request with refreshed access token");
                op(Some(token)).await
            }
            Err(e) => {
                warn!(error = %e, "Refresh after unauthorized request failed");
                Err(original)
            }
        }
    }
}

/// Bearer-authenticated JSON calls routed through the interceptor.
#[derive(Clone)]
pub struct AuthorizedClient {
    http: ApiClient,
    interceptor: RequestInterceptor,
}

impl AuthorizedClient {
    pub fn new(http: ApiClient, interceptor: RequestInterceptor) -> Self {
        Self { http, interceptor }
    }

    pub async fn request_json<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let http = &self.http;
        self.interceptor
            .execute(|token| {
                let method = method.clone();
                async move { http.request_json(method, path, token.as_deref(), body).await }
            })
            .await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request_json::<T, ()>(Method::GET, path, None).await
    }

    pub async fn post_json<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request_json(Method::POST, path, Some(body)).await
    }
}
