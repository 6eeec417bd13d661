//! Thread-local reuse of transaction entry buffers
//!
//! Each thread keeps up to `MAX_POOL_SIZE` cleared entry vectors. A new
//! transaction takes one (capacity preserved) and hands it back when it is
//! dropped, so steady-state transactions don't allocate for their entries.

use super::gamma_txn::Entry;
use std::cell::RefCell;

/// Maximum number of buffers kept per thread.
pub const MAX_POOL_SIZE: usize = 8;

thread_local! {
    static ENTRY_POOL: RefCell<Vec<Vec<Entry>>> = RefCell::new(Vec::new());
}

/// Take a buffer from the current thread's pool, or allocate one.
pub(crate) fn acquire() -> Vec<Entry> {
    ENTRY_POOL
        .try_with(|pool| pool.borrow_mut().pop())
        .ok()
        .flatten()
        .unwrap_or_default()
}

/// Return a buffer. Its entries are dropped; capacity is kept.
pub(crate) fn release(mut buffer: Vec<Entry>) {
    buffer.clear();
    if buffer.capacity() == 0 {
        return;
    }
    // the pool may already be gone during thread teardown
    let _ = ENTRY_POOL.try_with(|pool| {
        let mut pool = pool.borrow_mut();
        if pool.len() < MAX_POOL_SIZE {
            pool.push(buffer);
        }
    });
}

/// Number of buffers pooled on the current thread.
pub fn pooled_buffers() -> usize {
    ENTRY_POOL.try_with(|pool| pool.borrow().len()).unwrap_or(0)
}
