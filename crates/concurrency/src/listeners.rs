//! Change listeners of a single transactional object
//!
//! Registration and wake-up race against each other without a shared lock
//! around the version check. Both sides use a store-then-load pattern on
//! `SeqCst` atomics: the registrant bumps the listener count and then
//! re-reads the version, the committer publishes the version and then reads
//! the listener count. At least one of them sees the other, so a listener is
//! either woken by the commit or notices the change itself.

use crate::latch::RetryLatch;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Outcome of registering a latch on an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The latch will be opened by the next update.
    Done,
    /// The object already changed; the latch was opened right away.
    NotNeeded,
    /// There is nothing to wait for (e.g. an object constructed by the
    /// waiting transaction itself).
    None,
}

#[derive(Debug)]
struct Waiter {
    latch: Arc<RetryLatch>,
    era: u64,
}

/// Listeners detached from an object by a commit, to be opened once the
/// object's orec is released.
#[derive(Debug, Default)]
#[must_use = "detached listeners must be opened"]
pub struct Listeners {
    waiters: Vec<Waiter>,
}

impl Listeners {
    /// Number of detached latches.
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    /// No latches detached.
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Add the latches of `other`.
    pub fn append(&mut self, mut other: Listeners) {
        self.waiters.append(&mut other.waiters);
    }

    /// Open every latch in the era it was registered for.
    pub fn open_all(self) {
        for waiter in self.waiters {
            waiter.latch.open(waiter.era);
        }
    }
}

/// Per-object listener list.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    count: AtomicUsize,
    waiters: Mutex<Vec<Waiter>>,
}

impl ListenerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `latch` for `era`, then call `unchanged` to re-check that the
    /// value the waiter observed is still current.
    ///
    /// # Arguments
    ///
    /// * `latch` - latch the waiting transaction will park on
    /// * `era` - era of the latch at registration time
    /// * `unchanged` - re-reads the object's version; `false` means an update
    ///   slipped in and the latch is opened immediately
    pub fn register<F>(&self, latch: &Arc<RetryLatch>, era: u64, unchanged: F) -> Registration
    where
        F: FnOnce() -> bool,
    {
        {
            let mut waiters = self.waiters.lock();
            // waiters whose latch moved to a later era can never be woken
            waiters.retain(|waiter| waiter.latch.era() == waiter.era);
            let registered = waiters
                .iter()
                .any(|waiter| waiter.era == era && Arc::ptr_eq(&waiter.latch, latch));
            if !registered {
                waiters.push(Waiter {
                    latch: Arc::clone(latch),
                    era,
                });
            }
            self.count.store(waiters.len(), Ordering::SeqCst);
        }

        if unchanged() {
            Registration::Done
        } else {
            latch.open(era);
            Registration::NotNeeded
        }
    }

    /// Number of registered latches.
    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Whether any latch is registered.
    #[inline]
    pub fn has_listeners(&self) -> bool {
        self.count.load(Ordering::SeqCst) > 0
    }

    /// Detach all registered latches. Call after the new version is
    /// published.
    pub fn take(&self) -> Option<Listeners> {
        if !self.has_listeners() {
            return None;
        }
        let mut waiters = self.waiters.lock();
        self.count.store(0, Ordering::SeqCst);
        if waiters.is_empty() {
            return None;
        }
        Some(Listeners {
            waiters: std::mem::take(&mut *waiters),
        })
    }
}
