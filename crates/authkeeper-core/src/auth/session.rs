//! Public session façade.
//!
//! `SessionAuth` ties the credential store, the refresh coordinator and the
//! reactive user slot together behind login/logout/bootstrap.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock, TokenClock};
use super::coordinator::RefreshCoordinator;
use super::credentials::{Credential, CredentialStore};
use super::guard::{Redirect, RouteGuard};
use super::interceptor::{AuthorizedClient, RequestInterceptor};
use super::jar::{CookieJar, MemoryJar};
use super::user::UserSlot;
use crate::api::{ApiClient, AuthApi, LoginCredentials, User};
use crate::config::AuthConfig;
use crate::error::AuthError;

pub struct SessionAuth {
    config: AuthConfig,
    api: Arc<dyn AuthApi>,
    http: ApiClient,
    store: CredentialStore,
    clock: TokenClock,
    user: Arc<UserSlot>,
    coordinator: RefreshCoordinator,
    guard: RouteGuard,
}

pub struct SessionAuthBuilder {
    config: AuthConfig,
    api: Option<Arc<dyn AuthApi>>,
    jar: Option<Arc<dyn CookieJar>>,
    clock: Option<Arc<dyn Clock>>,
}

impl SessionAuthBuilder {
    /// Use a custom implementation of the auth endpoints
    pub fn api(mut self, api: Arc<dyn AuthApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// Storage for the tokens; defaults to process memory
    pub fn jar(mut self, jar: Arc<dyn CookieJar>) -> Self {
        self.jar = Some(jar);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<SessionAuth, AuthError> {
        let http = ApiClient::new(&self.config)?;
        let api = self.api.unwrap_or_else(|| Arc::new(http.clone()) as Arc<dyn AuthApi>);
        let jar = self.jar.unwrap_or_else(|| Arc::new(MemoryJar::new()) as Arc<dyn CookieJar>);
        let clock = TokenClock::new(self.clock.unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>));

        let store = CredentialStore::new(jar, &self.config);
        let user = Arc::new(UserSlot::new());
        let coordinator = RefreshCoordinator::new(Arc::clone(&api), store.clone(), clock.clone(), Arc::clone(&user));

        Ok(SessionAuth {
            guard: RouteGuard::new(&self.config),
            config: self.config,
            api,
            http,
            store,
            clock,
            user,
            coordinator,
        })
    }
}

impl SessionAuth {
    pub fn builder(config: AuthConfig) -> SessionAuthBuilder {
        SessionAuthBuilder {
            config,
            api: None,
            jar: None,
            clock: None,
        }
    }

    /// Session against the real API, storing tokens in `jar`
    pub fn new(config: AuthConfig, jar: Arc<dyn CookieJar>) -> Result<Self, AuthError> {
        config.validate()?;
        Self::builder(config).jar(jar).build()
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Restore a stored session. Run once at start-up.
    ///
    /// Tokens inside the safety margin are refreshed before "who am I" is
    /// asked. Any failure leaves the session signed out with no stored
    /// credentials; nothing here is fatal.
    pub async fn bootstrap(&self) -> Option<User> {
        let Some(stored) = self.store.access_token() else {
            debug!("No stored access token, starting signed out");
            return None;
        };

        let token = if self.clock.needs_refresh(&stored) {
            // Inside the margin or unreadable; a successful refresh arms the timer itself
            match self.coordinator.refresh().await {
                Ok(token) => token,
                Err(e) => {
                    warn!(error = %e, "Could not refresh stored session");
                    return None;
                }
            }
        } else {
            debug!("Adopting stored access token");
            self.coordinator.schedule(&stored);
            stored
        };

        match self.api.me(&token).await {
            Ok(user) => {
                info!(user_id = %user.id, "Session restored");
                self.user.set_user(Some(user.clone()));
                Some(user)
            }
            Err(e) => {
                warn!(error = %e, "Stored session rejected, clearing credentials");
                self.coordinator.cancel_timer();
                self.store.clear();
                None
            }
        }
    }

    /// Sign in and load the user.
    ///
    /// Nothing is stored unless both the login and the "who am I" call
    /// succeed. Every failure is reported as `AuthError::Authentication`,
    /// carrying the server's error entries when it sent any.
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<User, AuthError> {
        let tokens = self
            .api
            .login(credentials)
            .await
            .map_err(|e| login_failure(&credentials.email, e))?;

        let user = self
            .api
            .me(&tokens.access_token)
            .await
            .map_err(|e| login_failure(&credentials.email, e.into()))?;

        // Any refresh still running for a previous session must not overwrite these tokens
        self.coordinator.end_session();
        self.store.set_tokens(&tokens);
        self.user.set_user(Some(user.clone()));
        self.coordinator.schedule(&tokens.access_token);
        info!(user_id = %user.id, "Logged in");
        Ok(user)
    }

    /// Sign out. The server is told on a best-effort basis; local state is
    /// always cleared.
    pub async fn logout(&self) {
        let refresh_token = self.store.refresh_token();
        self.coordinator.end_session();

        match refresh_token {
            Some(refresh_token) => {
                if let Err(e) = self.api.logout(&refresh_token).await {
                    warn!(error = %e, "Remote logout failed, clearing local session anyway");
                }
            }
            None => debug!("No refresh token stored, skipping remote logout"),
        }

        self.store.clear();
        self.user.set_user(None);
        info!("Logged out");
    }

    /// Force a token refresh now
    pub async fn refresh(&self) -> Result<String, AuthError> {
        self.coordinator.refresh().await
    }

    /// Current user; never touches the network
    pub fn user(&self) -> Option<User> {
        self.user.user()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<User>> {
        self.user.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_set()
    }

    pub fn credential(&self) -> Credential {
        self.store.credential()
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Redirect required before showing `path`, if any
    pub fn guard(&self, path: &str) -> Option<Redirect> {
        self.guard.check(path, self.is_authenticated())
    }

    pub fn interceptor(&self) -> RequestInterceptor {
        RequestInterceptor::new(self.store.clone(), self.coordinator.clone())
    }

    /// Client for arbitrary API calls that retries once after a refresh
    pub fn client(&self) -> AuthorizedClient {
        AuthorizedClient::new(self.http.clone(), self.interceptor())
    }
}

fn login_failure(email: &str, error: AuthError) -> AuthError {
    warn!(email = %email, error = %error, "Login failed");
    match error {
        AuthError::Authentication { .. } => error,
        _ => AuthError::authentication(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use crate::auth::coordinator::RefreshPhase;
    use crate::test_support::{session, token_expiring_in, FakeApi, PASSWORD};

    fn credentials(password: &str) -> LoginCredentials {
        LoginCredentials::new("ada@example.com", password)
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_sets_user_and_arms_timer() {
        let (api, session) = session(FakeApi::new());
        let user = session.login(&credentials(PASSWORD)).await.expect("login");

        assert_eq!(user.id, "u1");
        assert_eq!(session.user().map(|u| u.id), Some("u1".to_string()));
        assert!(session.is_authenticated());

        let credential = session.credential();
        assert!(credential.access_token.is_some());
        assert_eq!(credential.refresh_token.as_deref(), Some("refresh-0"));

        // 900s token: timer set for exp - now - 300s
        let remaining = session.coordinator().timer_remaining().expect("timer armed");
        assert!(remaining <= std::time::Duration::from_secs(600));
        assert!(remaining > std::time::Duration::from_secs(595));
        assert_eq!(api.events(), vec!["login".to_string(), "me".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_failure_leaves_no_state() {
        let (api, session) = session(FakeApi::new());
        let err = session.login(&credentials("wrong")).await.expect_err("should fail");

        match err {
            AuthError::Authentication { message, details } => {
                assert_eq!(message, "Invalid user credentials.");
                assert_eq!(details[0].code(), Some("INVALID_CREDENTIALS"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(session.user().is_none());
        assert!(session.credential().is_empty());
        assert!(!session.coordinator().is_timer_armed());
        assert_eq!(api.me_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_with_rejected_me_stores_nothing() {
        let api = FakeApi::new();
        api.accept_only(Vec::new());
        let (_api, session) = session(api);

        let result = session.login(&credentials(PASSWORD)).await;
        match result {
            Err(AuthError::Authentication { message, details }) => {
                assert_eq!(message, "Authentication Failure");
                assert!(details.is_empty());
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(session.credential().is_empty());
        assert!(session.user().is_none());
        assert!(!session.coordinator().is_timer_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_server_error_is_authentication_failure() {
        let api = FakeApi::new();
        *api.login_unavailable.lock().unwrap() = true;
        let (api, session) = session(api);

        let err = session.login(&credentials(PASSWORD)).await.expect_err("should fail");
        assert!(matches!(err, AuthError::Authentication { ref details, .. } if details.is_empty()));
        assert_eq!(err.to_string(), "Authentication failure: Authentication Failure");
        assert_eq!(api.me_calls.load(Ordering::SeqCst), 0);
        assert!(session.credential().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_during_refresh_keeps_session_cleared() {
        let (api, session) = session(FakeApi::new());
        session.login(&credentials(PASSWORD)).await.expect("login");

        let coordinator = session.coordinator().clone();
        let refresh = tokio::spawn(async move { coordinator.refresh().await.map_err(|e| e.to_string()) });
        // The fake refresh takes 50ms; log out while it is in flight
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        session.logout().await;

        assert!(refresh.await.expect("task").is_err());
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 1);
        assert!(session.credential().is_empty());
        assert!(session.user().is_none());
        assert!(!session.coordinator().is_timer_armed());
        assert_eq!(session.coordinator().state(), RefreshPhase::Idle);

        // Nothing left for the next start-up to restore
        assert!(session.bootstrap().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_during_refresh_keeps_new_tokens() {
        let (api, session) = session(FakeApi::new());
        session.login(&credentials(PASSWORD)).await.expect("login");

        let coordinator = session.coordinator().clone();
        let refresh = tokio::spawn(async move { coordinator.refresh().await.map_err(|e| e.to_string()) });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        session.login(&credentials(PASSWORD)).await.expect("second login");
        let fresh = session.credential();
        assert_eq!(fresh.refresh_token.as_deref(), Some("refresh-1"));

        assert!(refresh.await.expect("task").is_err());
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.credential().access_token, fresh.access_token);
        assert_eq!(session.credential().refresh_token.as_deref(), Some("refresh-1"));
        assert!(session.is_authenticated());
        assert!(session.coordinator().is_timer_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_clears_everything() {
        let (api, session) = session(FakeApi::new());
        session.login(&credentials(PASSWORD)).await.expect("login");

        session.logout().await;
        assert!(session.credential().is_empty());
        assert!(session.user().is_none());
        assert!(!session.coordinator().is_timer_armed());
        assert_eq!(api.events().last().map(String::as_str), Some("logout:refresh-0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_proceeds_when_server_fails() {
        let api = FakeApi::new();
        *api.fail_logout.lock().unwrap() = true;
        let (api, session) = session(api);
        session.login(&credentials(PASSWORD)).await.expect("login");

        session.logout().await;
        assert_eq!(api.logout_calls.load(Ordering::SeqCst), 1);
        assert!(session.credential().is_empty());
        assert!(session.user().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_without_tokens_skips_remote_call() {
        let (api, session) = session(FakeApi::new());
        session.logout().await;
        assert_eq!(api.logout_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_without_token_does_nothing() {
        let (api, session) = session(FakeApi::new());
        assert!(session.bootstrap().await.is_none());
        assert!(api.events().is_empty());
        assert!(!session.coordinator().is_timer_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_adopts_fresh_token() {
        let (api, session) = session(FakeApi::new());
        session.store.set_access_token(token_expiring_in(3600, 1));
        session.store.set_refresh_token("r".to_string());

        let user = session.bootstrap().await.expect("user restored");
        assert_eq!(user.id, "u1");
        assert_eq!(api.events(), vec!["me".to_string()]);
        let remaining = session.coordinator().timer_remaining().expect("timer armed");
        assert!(remaining > std::time::Duration::from_secs(3200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_refreshes_token_near_expiry_first() {
        let (api, session) = session(FakeApi::new());
        // Four minutes left, inside the five minute margin
        session.store.set_access_token(token_expiring_in(240, 1));
        session.store.set_refresh_token("stored-refresh".to_string());
        let mut rx = session.subscribe();

        let user = session.bootstrap().await.expect("user restored");
        assert_eq!(user.id, "u1");
        assert_eq!(api.events(), vec!["refresh:stored-refresh".to_string(), "me".to_string()]);
        assert_eq!(session.credential().refresh_token.as_deref(), Some("refresh-0"));
        assert!(rx.has_changed().expect("sender alive"));
        assert!(rx.borrow_and_update().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_undecodable_token_refreshes() {
        let (api, session) = session(FakeApi::new());
        session.store.set_access_token("not-a-jwt".to_string());
        session.store.set_refresh_token("r".to_string());

        assert!(session.bootstrap().await.is_some());
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_refresh_failure_stays_signed_out() {
        let api = FakeApi::new();
        *api.reject_refresh.lock().unwrap() = true;
        let (api, session) = session(api);
        session.store.set_access_token(token_expiring_in(60, 1));
        session.store.set_refresh_token("revoked".to_string());

        assert!(session.bootstrap().await.is_none());
        assert_eq!(api.me_calls.load(Ordering::SeqCst), 0);
        assert!(session.credential().is_empty());
        assert_eq!(session.coordinator().state(), RefreshPhase::Failed);

        // Reading the user afterwards makes no calls
        let calls_before = api.events().len();
        assert!(session.user().is_none());
        assert_eq!(api.events().len(), calls_before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_rejected_me_clears_credentials() {
        let api = FakeApi::new();
        api.accept_only(Vec::new());
        let (_api, session) = session(api);
        session.store.set_access_token(token_expiring_in(3600, 1));
        session.store.set_refresh_token("r".to_string());

        assert!(session.bootstrap().await.is_none());
        assert!(session.credential().is_empty());
        assert!(session.user().is_none());
        assert!(!session.coordinator().is_timer_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_refresh_failure_signs_out() {
        let api = FakeApi::new();
        *api.token_ttl_secs.lock().unwrap() = 305;
        let (api, session) = session(api);
        session.login(&credentials(PASSWORD)).await.expect("login");
        *api.reject_refresh.lock().unwrap() = true;

        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 1);
        assert!(session.user().is_none());
        assert!(session.credential().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_follows_user_state() {
        let (_api, session) = session(FakeApi::new());
        assert_eq!(session.guard("/account").map(|r| r.path), Some("/login".to_string()));
        session.login(&credentials(PASSWORD)).await.expect("login");
        assert_eq!(session.guard("/account"), None);
    }
}
