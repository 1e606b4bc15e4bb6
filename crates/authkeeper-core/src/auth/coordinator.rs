//! Single-flight token refresh.
//!
//! `RefreshCoordinator` owns the refresh state machine:
//!
//! ```text
//!   Idle ──refresh()──▶ Refreshing ──ok──▶ Idle (timer re-armed)
//!    ▲                      │
//!    └──refresh()── Failed ◀┘ err (credentials and user cleared)
//! ```
//!
//! While a refresh is in flight every caller awaits the same shared future,
//! so only one network call is ever made. Timer-driven and
//! interceptor-driven refreshes go through the same `refresh()` entry point.
//!
//! Each session (login to logout) has an epoch. A refresh only writes its
//! result back if the epoch it started in is still current, so a refresh
//! that outlives a logout or a new login is discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use super::clock::TokenClock;
use super::credentials::CredentialStore;
use super::timer::RefreshTimer;
use super::user::UserSlot;
use crate::api::AuthApi;
use crate::error::AuthError;

/// Failure delivered to every waiter of a refresh.
#[derive(Debug, Clone)]
struct RefreshFailure(String);

/// Floor for the refresh timer so tokens issued with less lifetime than the
/// safety margin do not trigger back-to-back refreshes
const MIN_REFRESH_DELAY: Duration = Duration::from_secs(5);

/// The outstanding refresh call, awaited by all concurrent callers.
type PendingRefresh = Shared<BoxFuture<'static, Result<String, RefreshFailure>>>;

enum RefreshState {
    Idle,
    Refreshing(PendingRefresh),
    Failed,
}

/// Observable phase of the refresh state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    Idle,
    Refreshing,
    Failed,
}

struct Inner {
    api: Arc<dyn AuthApi>,
    store: CredentialStore,
    clock: TokenClock,
    user: Arc<UserSlot>,
    timer: RefreshTimer,
    state: Mutex<RefreshState>,
    /// Bumped under the state lock whenever the session ends or is replaced
    epoch: AtomicU64,
}

/// Clone is cheap; clones share one state machine.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        api: Arc<dyn AuthApi>,
        store: CredentialStore,
        clock: TokenClock,
        user: Arc<UserSlot>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                store,
                clock,
                user,
                timer: RefreshTimer::new(),
                state: Mutex::new(RefreshState::Idle),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Obtain a new access token, joining the in-flight refresh if there is one.
    ///
    /// On failure all stored credentials and the session user are cleared
    /// before the error is returned. A refresh detached by `end_session`
    /// fails without touching anything.
    pub async fn refresh(&self) -> Result<String, AuthError> {
        let pending = self.join_or_start();
        pending.await.map_err(|failure| AuthError::RefreshFailed(failure.0))
    }

    /// Check and claim the Refreshing state in one critical section
    fn join_or_start(&self) -> PendingRefresh {
        let mut state = self.inner.lock_state();
        if let RefreshState::Refreshing(pending) = &*state {
            debug!("Joining in-flight token refresh");
            return pending.clone();
        }

        self.inner.timer.cancel();
        let epoch = self.inner.epoch.load(Ordering::SeqCst);

        // Run on its own task so the call completes even if every waiter goes away
        let handle = tokio::spawn(Arc::clone(&self.inner).run_refresh(epoch));
        let weak = Arc::downgrade(&self.inner);
        let pending = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    let reason = format!("refresh task did not complete: {}", e);
                    match weak.upgrade() {
                        Some(inner) => Err(inner.fail(epoch, reason)),
                        None => Err(RefreshFailure(reason)),
                    }
                }
            }
        }
        .boxed()
        .shared();

        *state = RefreshState::Refreshing(pending.clone());
        debug!("Token refresh started");
        pending
    }

    /// Arm the refresh timer for `access_token`'s expiry, replacing any pending one.
    /// Tokens without a readable expiry leave the timer disarmed.
    pub fn schedule(&self, access_token: &str) {
        self.inner.schedule(access_token);
    }

    /// End the current session epoch.
    ///
    /// Cancels the timer and detaches any in-flight refresh; when that
    /// refresh completes its tokens are dropped instead of stored. Later
    /// `refresh()` calls start a new attempt.
    pub fn end_session(&self) {
        let mut state = self.inner.lock_state();
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.timer.cancel();
        *state = RefreshState::Idle;
        debug!("Refresh session epoch ended");
    }

    pub fn cancel_timer(&self) -> bool {
        self.inner.timer.cancel()
    }

    pub fn is_timer_armed(&self) -> bool {
        self.inner.timer.is_armed()
    }

    /// Time left before the scheduled refresh fires
    pub fn timer_remaining(&self) -> Option<Duration> {
        self.inner.timer.remaining()
    }

    pub fn state(&self) -> RefreshPhase {
        match &*self.inner.lock_state() {
            RefreshState::Idle => RefreshPhase::Idle,
            RefreshState::Refreshing(_) => RefreshPhase::Refreshing,
            RefreshState::Failed => RefreshPhase::Failed,
        }
    }

    pub fn clock(&self) -> &TokenClock {
        &self.inner.clock
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run_refresh(self: Arc<Self>, epoch: u64) -> Result<String, RefreshFailure> {
        // Refresh calls carry the refresh token only, never the access token
        let Some(refresh_token) = self.store.refresh_token() else {
            return Err(self.fail(epoch, "no refresh token stored".to_string()));
        };

        let outcome = self.api.refresh(&refresh_token).await;

        let mut state = self.lock_state();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("Session ended during refresh, discarding result");
            return Err(RefreshFailure("session ended during refresh".to_string()));
        }
        match outcome {
            Ok(tokens) => {
                self.store.set_tokens(&tokens);
                *state = RefreshState::Idle;
                self.schedule(&tokens.access_token);
                drop(state);
                info!("Access token refreshed");
                Ok(tokens.access_token)
            }
            Err(e) => {
                drop(state);
                Err(self.fail(epoch, e.to_string()))
            }
        }
    }

    /// Drop every trace of the session after a failed refresh.
    /// A refresh from an ended epoch leaves the current session alone.
    fn fail(&self, epoch: u64, reason: String) -> RefreshFailure {
        let mut state = self.lock_state();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!(reason = %reason, "Stale refresh failed, ignoring");
            return RefreshFailure(reason);
        }
        warn!(reason = %reason, "Token refresh failed, clearing session");
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.timer.cancel();
        self.store.clear();
        self.user.set_user(None);
        *state = RefreshState::Failed;
        RefreshFailure(reason)
    }

    fn schedule(self: &Arc<Self>, access_token: &str) {
        let delay = match self.clock.delay_for(access_token) {
            Ok(delay) => delay.max(MIN_REFRESH_DELAY),
            Err(e) => {
                // Re-arming at zero would refresh in a loop
                warn!(error = %e, "Access token expiry unreadable, not scheduling a refresh");
                self.timer.cancel();
                return;
            }
        };
        let weak: Weak<Inner> = Arc::downgrade(self);
        self.timer.arm(delay, move || async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let coordinator = RefreshCoordinator { inner };
            if let Err(e) = coordinator.refresh().await {
                // Background failures just leave the session signed out
                warn!(error = %e, "Scheduled token refresh failed");
            }
        });
    }
}
