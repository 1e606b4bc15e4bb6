use tokio::sync::watch;
use tracing::debug;

use crate::api::User;

/// Reactive holder of the signed-in user.
///
/// `set_user` is the only writer. Readers either take a snapshot with
/// `user()` or `subscribe()` to be notified of every change.
#[derive(Debug)]
pub struct UserSlot {
    tx: watch::Sender<Option<User>>,
}

impl Default for UserSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl UserSlot {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn user(&self) -> Option<User> {
        self.tx.borrow().clone()
    }

    pub fn is_set(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<User>> {
        self.tx.subscribe()
    }

    /// Replace the current user. Subscribers are only woken on an actual change.
    pub(crate) fn set_user(&self, user: Option<User>) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == user {
                false
            } else {
                *current = user;
                true
            }
        });
        if changed {
            debug!(signed_in = self.is_set(), "Session user changed");
        }
    }
}
