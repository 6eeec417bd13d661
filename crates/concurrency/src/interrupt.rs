//! Cooperative interruption of blocked transactions
//!
//! A thread blocked in a backoff sleep or a retry park can be woken early
//! by interrupting the token it waits with. The flag is sticky: it stays set
//! until `clear()`, so an interrupt that lands between two waits is still
//! observed by the second one.

use crate::latch::RetryLatch;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;

/// A wait was cut short by an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("wait was interrupted")]
pub struct Interrupted;

struct Inner {
    interrupted: AtomicBool,
    /// Latch the owner is currently parked on, if any.
    parked_on: Mutex<Option<Weak<RetryLatch>>>,
    sleep_lock: Mutex<()>,
    sleep_cond: Condvar,
}

/// Shared interrupt flag. Clones refer to the same flag.
#[derive(Clone)]
pub struct InterruptToken {
    inner: Arc<Inner>,
}

impl InterruptToken {
    /// Fresh, not interrupted token.
    pub fn new() -> Self {
        InterruptToken {
            inner: Arc::new(Inner {
                interrupted: AtomicBool::new(false),
                parked_on: Mutex::new(None),
                sleep_lock: Mutex::new(()),
                sleep_cond: Condvar::new(),
            }),
        }
    }

    /// Set the flag and wake whatever the owner is blocked on.
    pub fn interrupt(&self) {
        self.inner.interrupted.store(true, Ordering::SeqCst);

        let latch = self.inner.parked_on.lock().as_ref().and_then(Weak::upgrade);
        if let Some(latch) = latch {
            latch.wake_waiters();
        }

        let _guard = self.inner.sleep_lock.lock();
        self.inner.sleep_cond.notify_all();
    }

    /// Whether the flag is set.
    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::SeqCst)
    }

    /// Reset the flag.
    pub fn clear(&self) {
        self.inner.interrupted.store(false, Ordering::SeqCst);
    }

    /// Fail fast if the flag is set.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.is_interrupted() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration` unless interrupted first.
    pub fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        let deadline = Instant::now() + duration;
        let mut guard = self.inner.sleep_lock.lock();
        loop {
            self.check()?;
            if self
                .inner
                .sleep_cond
                .wait_until(&mut guard, deadline)
                .timed_out()
            {
                return self.check();
            }
        }
    }

    pub(crate) fn park_on(&self, latch: &Arc<RetryLatch>) {
        *self.inner.parked_on.lock() = Some(Arc::downgrade(latch));
    }

    pub(crate) fn unpark(&self) {
        *self.inner.parked_on.lock() = None;
    }
}

impl Default for InterruptToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InterruptToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptToken")
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}
