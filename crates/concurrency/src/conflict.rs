//! Global conflict counter
//!
//! Every commit that publishes over concurrent readers bumps the counter.
//! A transaction remembers the value it started with; as long as the
//! counter hasn't moved, none of its reads can have been invalidated and the
//! full read-set scan can be skipped.

use std::sync::atomic::{AtomicU64, Ordering};

/// Cache line size assumed for padding.
pub const CACHE_LINE_BYTES: usize = 64;

/// Forces `T` onto its own cache line.
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct CacheAligned<T> {
    value: T,
}

impl<T> CacheAligned<T> {
    /// Wrap `value`.
    #[inline]
    pub const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> std::ops::Deref for CacheAligned<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.value
    }
}

/// Monotonic count of published conflicts.
#[derive(Debug, Default)]
pub struct GlobalConflictCounter {
    count: CacheAligned<AtomicU64>,
}

impl GlobalConflictCounter {
    /// Counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a commit may have invalidated concurrent readers.
    ///
    /// Must happen before the conflicting value is published.
    #[inline]
    pub fn signal_conflict(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    /// Current count.
    #[inline]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}
