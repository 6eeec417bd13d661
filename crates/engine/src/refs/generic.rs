//! Generic object ref

use super::{await_payload, describe, read, write};
use crate::object::BaseRef;
use crate::payload::Payload;
use crate::stm::GammaStm;
use crate::txn::GammaTxn;
use gammastm_concurrency::OrecState;
use gammastm_core::{LockMode, TxnResult};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

const KIND: &str = "ref";

/// Transactional reference to a shared value of type `T`.
///
/// Values are immutable once stored: a write installs a new `Arc<T>`.
/// Readers outside a transaction get the current `Arc` without locking.
/// Dirty checking compares allocations, not contents, so writing a fresh
/// `Arc` with equal contents still counts as an update.
pub struct GammaRef<T> {
    base: Arc<BaseRef>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> GammaRef<T> {
    /// Committed ref holding `value`, version 1.
    pub fn new(stm: &GammaStm, value: T) -> Self {
        GammaRef::from_base(BaseRef::new(stm.shared(), wrap(value), KIND))
    }

    /// Ref created inside `txn`. Other transactions can't see it until
    /// `txn` commits; if `txn` aborts the ref stays locked forever.
    pub fn new_in(txn: &mut GammaTxn, value: T) -> TxnResult<Self> {
        let payload = wrap(value);
        let base = Arc::new(BaseRef::new_constructing(txn.stm(), payload.clone(), KIND));
        txn.open_for_construction(&base, payload)?;
        Ok(GammaRef {
            base,
            _marker: PhantomData,
        })
    }

    fn from_base(base: BaseRef) -> Self {
        GammaRef {
            base: Arc::new(base),
            _marker: PhantomData,
        }
    }

    // =========================================================================
    // Transactional operations
    // =========================================================================

    /// Current value.
    pub fn get(&self, txn: &mut GammaTxn) -> TxnResult<Arc<T>> {
        Ok(read(txn, &self.base, LockMode::None)?.downcast())
    }

    /// Current value, acquiring at least `lock_mode`.
    pub fn get_and_lock(&self, txn: &mut GammaTxn, lock_mode: LockMode) -> TxnResult<Arc<T>> {
        Ok(read(txn, &self.base, lock_mode)?.downcast())
    }

    /// Replace the value.
    pub fn set(&self, txn: &mut GammaTxn, value: T) -> TxnResult<()> {
        write(txn, &self.base, LockMode::None, wrap(value)).map(|_| ())
    }

    /// Replace the value, acquiring at least `lock_mode`.
    pub fn set_and_lock(&self, txn: &mut GammaTxn, value: T, lock_mode: LockMode) -> TxnResult<()> {
        write(txn, &self.base, lock_mode, wrap(value)).map(|_| ())
    }

    /// Replace the value and return the previous one.
    pub fn get_and_set(&self, txn: &mut GammaTxn, value: T) -> TxnResult<Arc<T>> {
        Ok(write(txn, &self.base, LockMode::None, wrap(value))?.downcast())
    }

    /// Apply `function` and return the new value.
    pub fn alter_and_get<F>(&self, txn: &mut GammaTxn, function: F) -> TxnResult<Arc<T>>
    where
        F: FnOnce(&T) -> T,
    {
        let tranlocal = txn.open_for_write(&self.base, LockMode::None)?;
        let current: Arc<T> = tranlocal.value.downcast();
        let next = Arc::new(function(&current));
        tranlocal.value = Payload::Object(next.clone());
        Ok(next)
    }

    /// Apply `function` and return the previous value.
    pub fn get_and_alter<F>(&self, txn: &mut GammaTxn, function: F) -> TxnResult<Arc<T>>
    where
        F: FnOnce(&T) -> T,
    {
        let tranlocal = txn.open_for_write(&self.base, LockMode::None)?;
        let current: Arc<T> = tranlocal.value.downcast();
        tranlocal.value = wrap(function(&current));
        Ok(current)
    }

    /// Apply `function` without reading the value now. It runs at commit
    /// under the exclusive lock, unless the transaction reads the ref
    /// first.
    pub fn commute<F>(&self, txn: &mut GammaTxn, function: F) -> TxnResult<()>
    where
        F: FnOnce(&T) -> T + Send + 'static,
    {
        txn.open_for_commute(
            &self.base,
            Box::new(move |current: Payload| wrap(function(&current.downcast::<T>()))),
        )
    }

    /// Make the commit fail if another transaction updates this ref.
    pub fn ensure(&self, txn: &mut GammaTxn) -> TxnResult<()> {
        txn.ensure(&self.base)
    }

    /// Acquire at least `lock_mode` without reading the value.
    pub fn acquire(&self, txn: &mut GammaTxn, lock_mode: LockMode) -> TxnResult<()> {
        txn.open_for_read(&self.base, lock_mode).map(|_| ())
    }

    /// Lock `txn` holds on this ref.
    pub fn lock_mode(&self, txn: &GammaTxn) -> LockMode {
        txn.lock_mode_of(&self.base)
    }

    /// Block until `predicate` holds for the value.
    pub fn await_predicate<F>(&self, txn: &mut GammaTxn, predicate: F) -> TxnResult<()>
    where
        F: FnOnce(&T) -> bool,
    {
        await_payload(txn, &self.base, |value| {
            predicate(&value.downcast::<T>())
        })
    }

    // =========================================================================
    // Atomic operations
    // =========================================================================

    /// Consistent current value.
    pub fn atomic_get(&self) -> TxnResult<Arc<T>> {
        Ok(self.base.atomic_load()?.downcast())
    }

    /// Current value without waiting for a writer to finish.
    pub fn atomic_weak_get(&self) -> Arc<T> {
        self.base.load_payload().downcast()
    }

    /// Store `value` and return it.
    pub fn atomic_set(&self, value: T) -> TxnResult<Arc<T>> {
        let value = wrap(value);
        Ok(self.base.atomic_modify(|_| Some(value))?.new.downcast())
    }

    /// Store `value` and return the previous one.
    pub fn atomic_get_and_set(&self, value: T) -> TxnResult<Arc<T>> {
        let value = wrap(value);
        Ok(self.base.atomic_modify(|_| Some(value))?.old.downcast())
    }

    /// Store `value` if the current value is the very allocation `expected`.
    pub fn atomic_compare_and_set(&self, expected: &Arc<T>, value: T) -> TxnResult<bool> {
        let expected = Payload::Object(expected.clone());
        let value = wrap(value);
        let outcome = self
            .base
            .atomic_modify(|current| current.same(&expected).then_some(value))?;
        Ok(outcome.applied)
    }

    /// Apply `function` atomically and return the new value.
    pub fn atomic_alter_and_get<F>(&self, function: F) -> TxnResult<Arc<T>>
    where
        F: FnOnce(&T) -> T,
    {
        let outcome = self
            .base
            .atomic_modify(|current| Some(wrap(function(&current.downcast::<T>()))))?;
        Ok(outcome.new.downcast())
    }

    /// Apply `function` atomically and return the previous value.
    pub fn atomic_get_and_alter<F>(&self, function: F) -> TxnResult<Arc<T>>
    where
        F: FnOnce(&T) -> T,
    {
        let outcome = self
            .base
            .atomic_modify(|current| Some(wrap(function(&current.downcast::<T>()))))?;
        Ok(outcome.old.downcast())
    }

    /// Strongest lock currently held by anyone.
    pub fn atomic_lock_mode(&self) -> LockMode {
        self.base.orec_state().lock_mode()
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Committed version.
    pub fn version(&self) -> u64 {
        self.base.version()
    }

    /// Snapshot of the orec.
    pub fn orec_state(&self) -> OrecState {
        self.base.orec_state()
    }

    /// Whether reads currently skip arrival bookkeeping.
    pub fn read_biased(&self) -> bool {
        self.base.orec_state().is_read_biased()
    }
}

impl<T: PartialEq + Send + Sync + 'static> GammaRef<T> {
    /// Block until the value equals `expected`.
    pub fn await_value(&self, txn: &mut GammaTxn, expected: &T) -> TxnResult<()> {
        self.await_predicate(txn, |value| value == expected)
    }
}

impl<T: fmt::Debug + Send + Sync + 'static> GammaRef<T> {
    /// Describe the ref with the value `txn` sees.
    pub fn to_debug_string(&self, txn: &mut GammaTxn) -> TxnResult<String> {
        let value = self.get(txn)?;
        Ok(describe(&self.base, &value))
    }

    /// Describe the ref with its committed value.
    pub fn atomic_to_string(&self) -> TxnResult<String> {
        let value = self.atomic_get()?;
        Ok(describe(&self.base, &value))
    }
}

impl<T> Clone for GammaRef<T> {
    fn clone(&self) -> Self {
        GammaRef {
            base: Arc::clone(&self.base),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for GammaRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GammaRef")
            .field("version", &self.base.version())
            .field("orec", &self.base.orec_state())
            .finish()
    }
}

fn wrap<T: Send + Sync + 'static>(value: T) -> Payload {
    Payload::Object(Arc::new(value))
}

#[cfg(test)]
mod tests {
    use crate::GammaStm;
    use gammastm_core::{LockMode, TxnError};

    #[test]
    fn set_publishes_a_new_version() {
        let stm = GammaStm::new();
        let name = stm.new_ref(String::from("a"));
        assert_eq!(name.version(), 1);

        stm.default_txn_executor()
            .execute(|txn| name.set(txn, String::from("b")))
            .unwrap();
        assert_eq!(name.atomic_get().unwrap().as_str(), "b");
        assert_eq!(name.version(), 2);
    }

    #[test]
    fn rewriting_the_same_arc_is_not_an_update() {
        let stm = GammaStm::new();
        let list = stm.new_ref(vec![1, 2, 3]);
        stm.default_txn_executor()
            .execute(|txn| {
                let current = list.get(txn)?;
                let tranlocal_value = list.get_and_alter(txn, |v| v.clone())?;
                assert!(std::sync::Arc::ptr_eq(&current, &tranlocal_value));
                Ok(())
            })
            .unwrap();
        // a fresh allocation was written, so the version moved
        assert_eq!(list.version(), 2);

        stm.default_txn_executor()
            .execute(|txn| list.get(txn).map(|_| ()))
            .unwrap();
        assert_eq!(list.version(), 2);
    }

    #[test]
    fn compare_and_set_uses_identity() {
        let stm = GammaStm::new();
        let cell = stm.new_ref(1u32);
        let seen = cell.atomic_get().unwrap();
        assert!(!cell
            .atomic_compare_and_set(&std::sync::Arc::new(1u32), 2)
            .unwrap());
        assert!(cell.atomic_compare_and_set(&seen, 2).unwrap());
        assert_eq!(*cell.atomic_get().unwrap(), 2);
        assert_eq!(cell.version(), 2);
    }

    #[test]
    fn constructed_ref_is_published_on_commit() {
        let stm = GammaStm::new();
        let created = stm
            .default_txn_executor()
            .execute(|txn| crate::GammaRef::new_in(txn, 7u64))
            .unwrap();
        assert_eq!(*created.atomic_get().unwrap(), 7);
        assert_eq!(created.version(), 1);
        assert!(created.orec_state().is_idle());
    }

    #[test]
    fn constructed_ref_of_aborted_txn_stays_locked() {
        let stm = GammaStm::builder().default_max_retries(3).build().unwrap();
        let mut txn = stm.new_default_txn();
        let created = crate::GammaRef::new_in(&mut txn, 1u8).unwrap();
        txn.abort().unwrap();
        assert_eq!(created.version(), 0);
        assert_eq!(created.atomic_lock_mode(), LockMode::Exclusive);
        assert!(matches!(created.atomic_get(), Err(TxnError::Locked { .. })));
    }

    #[test]
    fn debug_string_mentions_value() {
        let stm = GammaStm::new();
        let cell = stm.new_ref("hello");
        assert!(cell.atomic_to_string().unwrap().contains("hello"));
    }
}
