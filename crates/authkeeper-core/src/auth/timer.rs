//! One-shot cancellable wake-up used to schedule the next token refresh.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

struct Armed {
    id: u64,
    deadline: Instant,
    handle: AbortHandle,
}

/// Holds at most one scheduled task. Arming always cancels the previous one.
///
/// Must be armed from within a tokio runtime.
#[derive(Default)]
pub struct RefreshTimer {
    slot: Arc<Mutex<Option<Armed>>>,
    next_id: AtomicU64,
}

fn lock(slot: &Mutex<Option<Armed>>) -> MutexGuard<'_, Option<Armed>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RefreshTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`, replacing any pending wake-up.
    ///
    /// When the timer fires it frees its slot before running `task`, so a
    /// task that cancels or re-arms this timer does not abort itself.
    pub fn arm<F, Fut>(&self, delay: Duration, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + delay;
        let slot = Arc::clone(&self.slot);

        let mut guard = lock(&self.slot);
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            {
                let mut armed = lock(&slot);
                if armed.as_ref().map(|a| a.id) == Some(id) {
                    *armed = None;
                }
            }
            debug!(timer = id, "Refresh timer fired");
            task().await;
        });

        if let Some(previous) = guard.replace(Armed {
            id,
            deadline,
            handle: handle.abort_handle(),
        }) {
            debug!(timer = previous.id, "Replacing armed refresh timer");
            previous.handle.abort();
        }
        debug!(timer = id, delay_ms = delay.as_millis() as u64, "Refresh timer armed");
    }

    /// Cancel the pending wake-up, if any. Returns whether one was armed.
    pub fn cancel(&self) -> bool {
        match lock(&self.slot).take() {
            Some(armed) => {
                armed.handle.abort();
                debug!(timer = armed.id, "Refresh timer cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        lock(&self.slot).is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        lock(&self.slot).as_ref().map(|a| a.deadline)
    }

    /// Time left until the pending wake-up fires
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_task(counter: &Arc<AtomicUsize>) -> impl FnOnce() -> futures::future::Ready<()> + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_delay() {
        let timer = RefreshTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        timer.arm(Duration::from_secs(60), counter_task(&fired));

        assert!(timer.is_armed());
        assert_eq!(timer.remaining(), Some(Duration::from_secs(60)));

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_cancels_previous() {
        let timer = RefreshTimer::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        timer.arm(Duration::from_secs(10), counter_task(&first));
        timer.arm(Duration::from_secs(20), counter_task(&second));
        assert_eq!(timer.remaining(), Some(Duration::from_secs(20)));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let timer = RefreshTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        timer.arm(Duration::from_secs(5), counter_task(&fired));

        assert!(timer.cancel());
        assert!(!timer.cancel());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_can_rearm_its_own_timer() {
        let timer = Arc::new(RefreshTimer::new());
        let fired = Arc::new(AtomicUsize::new(0));

        let inner_timer = Arc::clone(&timer);
        let inner_fired = Arc::clone(&fired);
        timer.arm(Duration::from_secs(1), move || async move {
            inner_fired.fetch_add(1, Ordering::SeqCst);
            // Cancelling from inside the fired task must not abort it
            inner_timer.cancel();
            tokio::task::yield_now().await;
            inner_fired.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
