//! Cooperative Cancellation
//!
//! A shared token that lets one thread ask running workflow loops to stop at
//! their next safe point. Waiters sleep on a condition variable, so a cancel
//! issued from another thread wakes them immediately instead of at the end
//! of a poll interval.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Shared cancellation flag with prompt wakeup.
///
/// Cloning is cheap and every clone observes the same flag. Once cancelled
/// the token stays cancelled.
///
/// # Example
///
/// ```rust
/// use simflow::execution::CancelToken;
/// use std::time::Duration;
///
/// let token = CancelToken::new();
/// let for_handler = token.clone();
///
/// std::thread::spawn(move || for_handler.cancel());
///
/// // Returns as soon as the other thread cancels, not after 30s.
/// let cancelled = token.wait_timeout(Duration::from_secs(30));
/// assert!(cancelled);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: Mutex<bool>,
    condvar: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes every waiter.
    pub fn cancel(&self) {
        let mut cancelled = lock_flag(&self.inner.cancelled);
        *cancelled = true;
        self.inner.condvar.notify_all();
    }

    /// True once [`cancel`](CancelToken::cancel) has been called on any clone.
    pub fn is_cancelled(&self) -> bool {
        *lock_flag(&self.inner.cancelled)
    }

    /// Sleeps for up to `timeout`, waking early if the token is cancelled.
    ///
    /// Returns whether the token is cancelled, so callers can use it both
    /// as an interruptible sleep and as a wait-for-cancel.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut cancelled = lock_flag(&self.inner.cancelled);

        // Condition variable wakeups can be spurious, so loop against the
        // deadline until the flag flips or time runs out.
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .inner
                .condvar
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            cancelled = guard;
        }

        true
    }
}

// A poisoned flag just means a waiter panicked mid-check; the bool itself
// is always valid.
fn lock_flag(flag: &Mutex<bool>) -> MutexGuard<'_, bool> {
    flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
