//! Scripted in-memory `AuthApi` used by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;

use crate::api::{ApiError, AuthApi, ErrorDetail, ErrorExtensions, LoginCredentials, TokenPair, User};
use crate::auth::{CredentialStore, MemoryJar, RefreshCoordinator, SessionAuth, TokenClock, UserSlot};
use crate::config::AuthConfig;
use crate::error::AuthError;

pub(crate) const PASSWORD: &str = "correct horse";

/// Unsigned JWT expiring `ttl_secs` from now, made unique by `jti`
pub(crate) fn token_expiring_in(ttl_secs: i64, jti: usize) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let exp = Utc::now().timestamp() + ttl_secs;
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"id":"u1","jti":{},"exp":{}}}"#, jti, exp));
    format!("{}.{}.sig", header, payload)
}

pub(crate) struct FakeApi {
    /// Lifetime of issued access tokens, in seconds
    pub token_ttl_secs: Mutex<i64>,
    pub reject_refresh: Mutex<bool>,
    pub refresh_delay: Duration,
    pub fail_logout: Mutex<bool>,
    /// Login answers with a server error instead of checking the password
    pub login_unavailable: Mutex<bool>,
    /// Issue access tokens that are not JWTs
    pub opaque_tokens: Mutex<bool>,
    /// Access tokens `me` accepts; `None` accepts anything
    pub accepted_tokens: Mutex<Option<Vec<String>>>,
    pub user: User,
    pub login_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub me_calls: AtomicUsize,
    /// Ordered log of endpoint calls
    pub events: Mutex<Vec<String>>,
    issued: AtomicUsize,
}

impl FakeApi {
    pub(crate) fn new() -> Self {
        let mut user = User::new("u1");
        user.fields.insert("email".into(), "ada@example.com".into());
        Self {
            token_ttl_secs: Mutex::new(900),
            reject_refresh: Mutex::new(false),
            refresh_delay: Duration::from_millis(50),
            fail_logout: Mutex::new(false),
            login_unavailable: Mutex::new(false),
            opaque_tokens: Mutex::new(false),
            accepted_tokens: Mutex::new(None),
            user,
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            me_calls: AtomicUsize::new(0),
            events: Mutex::new(Vec::new()),
            issued: AtomicUsize::new(0),
        }
    }

    pub(crate) fn issue(&self) -> TokenPair {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        let ttl = *self.token_ttl_secs.lock().unwrap();
        let access_token = if *self.opaque_tokens.lock().unwrap() {
            format!("opaque-{}", n)
        } else {
            token_expiring_in(ttl, n)
        };
        TokenPair {
            access_token,
            refresh_token: format!("refresh-{}", n),
            expires: Some(ttl * 1000),
        }
    }

    pub(crate) fn accept_only(&self, tokens: Vec<String>) {
        *self.accepted_tokens.lock().unwrap() = Some(tokens);
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }
}

#[async_trait]
impl AuthApi for FakeApi {
    async fn login(&self, credentials: &LoginCredentials) -> Result<TokenPair, AuthError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.record("login");
        if *self.login_unavailable.lock().unwrap() {
            return Err(ApiError::ServerError("login unavailable".to_string()).into());
        }
        if credentials.password != PASSWORD {
            return Err(AuthError::authentication(vec![ErrorDetail {
                message: "Invalid user credentials.".to_string(),
                extensions: Some(ErrorExtensions {
                    code: Some("INVALID_CREDENTIALS".to_string()),
                }),
            }]));
        }
        Ok(self.issue())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.record(format!("refresh:{}", refresh_token));
        tokio::time::sleep(self.refresh_delay).await;
        if *self.reject_refresh.lock().unwrap() {
            return Err(ApiError::Unauthorized);
        }
        Ok(self.issue())
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), ApiError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.record(format!("logout:{}", refresh_token));
        if *self.fail_logout.lock().unwrap() {
            return Err(ApiError::ServerError("logout unavailable".to_string()));
        }
        Ok(())
    }

    async fn me(&self, access_token: &str) -> Result<User, ApiError> {
        self.me_calls.fetch_add(1, Ordering::SeqCst);
        self.record("me");
        if let Some(accepted) = self.accepted_tokens.lock().unwrap().as_ref() {
            if !accepted.iter().any(|t| t == access_token) {
                return Err(ApiError::Unauthorized);
            }
        }
        Ok(self.user.clone())
    }
}

pub(crate) struct Harness {
    pub api: Arc<FakeApi>,
    pub store: CredentialStore,
    pub user: Arc<UserSlot>,
    pub coordinator: RefreshCoordinator,
}

pub(crate) fn harness(api: FakeApi) -> Harness {
    let api = Arc::new(api);
    let config = AuthConfig::new("https://api.example.com");
    let store = CredentialStore::new(Arc::new(MemoryJar::new()), &config);
    let user = Arc::new(UserSlot::new());
    let coordinator = RefreshCoordinator::new(api.clone(), store.clone(), TokenClock::default(), user.clone());
    Harness {
        api,
        store,
        user,
        coordinator,
    }
}

pub(crate) fn session(api: FakeApi) -> (Arc<FakeApi>, SessionAuth) {
    let api = Arc::new(api);
    let config = AuthConfig::new("https://api.example.com");
    let session = SessionAuth::builder(config)
        .api(api.clone())
        .jar(Arc::new(MemoryJar::new()))
        .build()
        .expect("session should build");
    (api, session)
}
