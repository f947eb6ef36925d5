//! Cancellation signal scoped to a tracker's lifetime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Cloneable cancellation handle.
///
/// `Tracker::run` blocks on [`wait`](Self::wait); any clone may call
/// [`cancel`](Self::cancel) from any thread. Cancellation is one-way and
/// idempotent.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    guard: Mutex<()>,
    signal: Condvar,
}

impl ShutdownHandle {
    /// Create a handle in the running state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake all waiters.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        // Taking the guard orders the store before any waiter re-checks.
        drop(
            self.inner
                .guard
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        self.inner.signal.notify_all();
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Block until cancelled.
    pub fn wait(&self) {
        let mut guard = self
            .inner
            .guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while !self.is_cancelled() {
            guard = self
                .inner
                .signal
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until cancelled or the timeout elapses. Returns whether the
    /// handle was cancelled.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut guard = self
            .inner
            .guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while !self.is_cancelled() {
            let now = std::time::Instant::now();
            let Some(remaining) = deadline.checked_duration_since(now).filter(|d| !d.is_zero())
            else {
                return self.is_cancelled();
            };
            let (next, _) = self
                .inner
                .signal
                .wait_timeout(guard, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            guard = next;
        }
        true
    }
}
