//! Isolation Tests
//!
//! Read consistency, write skew under the different isolation levels and
//! the configuration checks that guard them.

use gammastm_core::{ConflictKind, IsolationLevel, TxnError, TxnStatus};
use gammastm_engine::{GammaStm, TxnFactory, TxnFlavor};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

fn unspeculative_factory(stm: &GammaStm, level: IsolationLevel) -> TxnFactory {
    stm.new_txn_factory_builder()
        .isolation_level(level)
        .speculative_config_enabled(false)
        .build()
        .unwrap()
}

// ============================================================================
// Read Consistency
// ============================================================================

#[test]
fn poor_mans_scan_catches_update_between_reads() {
    let stm = GammaStm::new();
    let a = stm.new_long_ref(1);
    let b = stm.new_long_ref(1);
    let interfered = AtomicBool::new(false);
    let attempts = AtomicU32::new(0);

    let executor = stm.default_txn_executor();
    let (seen_a, seen_b) = executor
        .execute(|txn| {
            attempts.fetch_add(1, Ordering::Relaxed);
            let seen_a = a.get(txn)?;
            if txn.flavor() == TxnFlavor::LeanFixedLength && !interfered.swap(true, Ordering::Relaxed)
            {
                a.atomic_set(2)?;
                b.atomic_set(2)?;
            }
            let seen_b = b.get(txn)?;
            Ok((seen_a, seen_b))
        })
        .unwrap();

    assert_eq!((seen_a, seen_b), (2, 2));
    // mono overflow, the conflicting attempt, the clean one
    assert_eq!(attempts.load(Ordering::Relaxed), 3);
}

#[test]
fn inconsistent_read_aborts_immediately() {
    let stm = GammaStm::new();
    let a = stm.new_long_ref(10);
    let b = stm.new_long_ref(10);
    let factory = unspeculative_factory(&stm, IsolationLevel::Snapshot);

    let mut txn = factory.new_txn();
    a.get(&mut txn).unwrap();
    a.atomic_increment_and_get(1).unwrap();
    let result = b.get(&mut txn);
    assert!(matches!(
        result,
        Err(TxnError::ReadWriteConflict(ConflictKind::InconsistentRead))
    ));
    assert_eq!(txn.status(), TxnStatus::Aborted);
}

#[test]
fn repeatable_read_tolerates_inconsistent_reads() {
    let stm = GammaStm::new();
    let a = stm.new_long_ref(10);
    let b = stm.new_long_ref(10);
    let factory = unspeculative_factory(&stm, IsolationLevel::RepeatableRead);

    let mut txn = factory.new_txn();
    assert_eq!(a.get(&mut txn).unwrap(), 10);
    a.atomic_set(11).unwrap();
    b.atomic_set(11).unwrap();
    assert_eq!(b.get(&mut txn).unwrap(), 11);
    // re-reading returns the value read first
    assert_eq!(a.get(&mut txn).unwrap(), 10);
    txn.commit().unwrap();
}

// ============================================================================
// Write Skew
// ============================================================================

/// Two withdrawals guarded by `x + y >= 100`, interleaved so both read
/// before either commits.
fn withdraw_concurrently(level: IsolationLevel) -> (Result<(), TxnError>, Result<(), TxnError>, i64) {
    let stm = GammaStm::new();
    let x = stm.new_long_ref(50);
    let y = stm.new_long_ref(50);
    let factory = unspeculative_factory(&stm, level);

    let mut first = factory.new_txn();
    let mut second = factory.new_txn();
    assert!(x.get(&mut first).unwrap() + y.get(&mut first).unwrap() >= 100);
    assert!(x.get(&mut second).unwrap() + y.get(&mut second).unwrap() >= 100);

    x.increment_and_get(&mut first, -100).unwrap();
    y.increment_and_get(&mut second, -100).unwrap();

    let first_result = first.commit();
    let second_result = second.commit();
    let total = x.atomic_get().unwrap() + y.atomic_get().unwrap();
    (first_result, second_result, total)
}

#[test]
fn snapshot_allows_write_skew() {
    let (first, second, total) = withdraw_concurrently(IsolationLevel::Snapshot);
    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(total, -100);
}

#[test]
fn serializable_prevents_write_skew() {
    let (first, second, total) = withdraw_concurrently(IsolationLevel::Serializable);
    assert!(first.is_ok());
    assert!(matches!(second, Err(TxnError::ReadWriteConflict(_))));
    assert_eq!(total, 0);
}

#[test]
fn ensure_guards_a_single_read() {
    let stm = GammaStm::new();
    let guard = stm.new_long_ref(1);
    let target = stm.new_long_ref(0);
    let factory = unspeculative_factory(&stm, IsolationLevel::Snapshot);

    let mut txn = factory.new_txn();
    guard.ensure(&mut txn).unwrap();
    target.set(&mut txn, 1).unwrap();
    guard.atomic_set(2).unwrap();
    assert!(matches!(txn.commit(), Err(TxnError::ReadWriteConflict(_))));
    assert_eq!(target.atomic_get().unwrap(), 0);
}

#[test]
fn serializable_transfers_keep_the_invariant() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 200;

    let stm = GammaStm::new();
    let x = stm.new_long_ref(50);
    let y = stm.new_long_ref(50);
    let executor = stm
        .new_txn_factory_builder()
        .isolation_level(IsolationLevel::Serializable)
        .build()
        .unwrap()
        .new_executor();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let (x, y) = (x.clone(), y.clone());
            let executor = executor.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for round in 0..ROUNDS {
                    executor
                        .execute(|txn| {
                            let total = x.get(txn)? + y.get(txn)?;
                            let amount = if (i + round) % 2 == 0 { 30 } else { -30 };
                            let target = if i % 2 == 0 { &x } else { &y };
                            if amount > 0 || total + amount >= 0 {
                                target.increment_and_get(txn, amount)?;
                            }
                            Ok(())
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(x.atomic_get().unwrap() + y.atomic_get().unwrap() >= 0);
    assert!(x.orec_state().is_idle());
    assert!(y.orec_state().is_idle());
}

// ============================================================================
// Configuration Guards
// ============================================================================

#[test]
fn readonly_transaction_rejects_writes() {
    let stm = GammaStm::new();
    let value = stm.new_long_ref(1);
    let executor = stm
        .new_txn_factory_builder()
        .readonly(true)
        .new_txn_executor()
        .unwrap();

    let result = executor.execute(|txn| value.set(txn, 2));
    assert!(matches!(result, Err(TxnError::ReadonlyViolation)));
    assert_eq!(value.atomic_get().unwrap(), 1);
    assert_eq!(executor.execute(|txn| value.get(txn)).unwrap(), 1);
}

#[test]
fn untracked_reads_cannot_block() {
    let stm = GammaStm::new();
    let value = stm.new_long_ref(0);
    let executor = stm
        .new_txn_factory_builder()
        .read_tracking_enabled(false)
        .new_txn_executor()
        .unwrap();

    let result: Result<(), TxnError> = executor.execute(|txn| {
        value.get(txn)?;
        txn.retry()
    });
    assert!(matches!(result, Err(TxnError::RetryNotPossible)));
}
