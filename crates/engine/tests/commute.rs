//! Commute Tests
//!
//! Commuting updates don't read the ref, so a concurrent update of the same
//! ref must not make them conflict. Reading the ref inside the transaction
//! turns the pending functions into an ordinary read-modify-write.

use gammastm_core::{TxnError, TxnStatus};
use gammastm_engine::GammaStm;
use std::sync::{Arc, Barrier};
use std::thread;

// ============================================================================
// Interleaved Writers
// ============================================================================

#[test]
fn concurrent_update_does_not_conflict_with_commute() {
    let stm = GammaStm::new();
    let counter = stm.new_long_ref(0);

    let mut txn = stm.new_default_txn();
    counter.increment(&mut txn).unwrap();
    counter.atomic_set(10).unwrap();

    txn.commit().unwrap();
    assert_eq!(txn.status(), TxnStatus::Committed);
    assert_eq!(counter.atomic_get().unwrap(), 11);
    assert_eq!(counter.version(), 3);
    assert!(counter.orec_state().is_idle());
}

#[test]
fn read_after_concurrent_update_sees_both_changes() {
    let stm = GammaStm::new();
    let counter = stm.new_long_ref(0);

    let mut txn = stm.new_default_txn();
    counter.increment(&mut txn).unwrap();
    counter.atomic_set(10).unwrap();

    // the read loads the current value and applies the pending increment
    assert_eq!(counter.get(&mut txn).unwrap(), 11);
    txn.commit().unwrap();
    assert_eq!(counter.atomic_get().unwrap(), 11);
    assert!(counter.orec_state().is_idle());
}

#[test]
fn update_after_the_read_makes_the_commit_conflict() {
    let stm = GammaStm::new();
    let counter = stm.new_long_ref(0);

    let mut txn = stm.new_default_txn();
    counter.increment(&mut txn).unwrap();
    assert_eq!(counter.get(&mut txn).unwrap(), 1);
    counter.atomic_set(10).unwrap();

    assert!(matches!(txn.commit(), Err(TxnError::ReadWriteConflict(_))));
    assert_eq!(txn.status(), TxnStatus::Aborted);
    assert_eq!(counter.atomic_get().unwrap(), 10);
    assert!(counter.orec_state().is_idle());
}

// ============================================================================
// Contention
// ============================================================================

#[test]
fn commuting_increments_from_many_threads_add_up() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 250;

    let stm = GammaStm::new();
    let counter = stm.new_long_ref(0);
    let executor = stm
        .new_txn_factory_builder()
        .speculative_config_enabled(false)
        .new_txn_executor()
        .unwrap();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let counter = counter.clone();
            let executor = executor.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..PER_THREAD {
                    executor.execute(|txn| counter.increment(txn)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let total = (THREADS * PER_THREAD) as i64;
    assert_eq!(counter.atomic_get().unwrap(), total);
    assert_eq!(counter.version(), 1 + total as u64);
    assert!(counter.orec_state().is_idle());
}
