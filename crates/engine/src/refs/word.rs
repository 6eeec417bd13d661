//! Refs over primitives packed into the 64-bit payload word

use super::{await_payload, describe, read, write};
use crate::object::BaseRef;
use crate::payload::Payload;
use crate::stm::GammaStm;
use crate::txn::GammaTxn;
use gammastm_concurrency::OrecState;
use gammastm_core::{LockMode, TxnResult, TxnWord};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Ref holding an `i64`.
pub type GammaLongRef = GammaWordRef<i64>;
/// Ref holding an `i32`.
pub type GammaIntRef = GammaWordRef<i32>;
/// Ref holding an `f64`, stored by its IEEE-754 bits.
pub type GammaDoubleRef = GammaWordRef<f64>;
/// Ref holding a `bool`.
pub type GammaBooleanRef = GammaWordRef<bool>;

/// Integer words that support increments. Arithmetic wraps.
pub trait TxnInteger: TxnWord {
    /// `self + amount`, wrapping on overflow.
    fn add_wrapping(self, amount: Self) -> Self;
    /// `-self`, wrapping on overflow.
    fn negate_wrapping(self) -> Self;
    /// The value one.
    const ONE: Self;
}

impl TxnInteger for i64 {
    const ONE: Self = 1;

    fn add_wrapping(self, amount: Self) -> Self {
        self.wrapping_add(amount)
    }

    fn negate_wrapping(self) -> Self {
        self.wrapping_neg()
    }
}

impl TxnInteger for i32 {
    const ONE: Self = 1;

    fn add_wrapping(self, amount: Self) -> Self {
        self.wrapping_add(amount)
    }

    fn negate_wrapping(self) -> Self {
        self.wrapping_neg()
    }
}

/// Transactional reference to a primitive value.
///
/// Dirty checking compares the stored words, so writing back the value
/// that was read publishes nothing. For doubles that means bit equality:
/// `-0.0` differs from `0.0` and a NaN equals itself.
pub struct GammaWordRef<W> {
    base: Arc<BaseRef>,
    _marker: PhantomData<fn() -> W>,
}

impl<W: TxnWord> GammaWordRef<W> {
    /// Committed ref holding `value`, version 1.
    pub fn new(stm: &GammaStm, value: W) -> Self {
        GammaWordRef {
            base: Arc::new(BaseRef::new(stm.shared(), pack(value), W::KIND)),
            _marker: PhantomData,
        }
    }

    /// Ref created inside `txn`, published when `txn` commits.
    pub fn new_in(txn: &mut GammaTxn, value: W) -> TxnResult<Self> {
        let base = Arc::new(BaseRef::new_constructing(txn.stm(), pack(value), W::KIND));
        txn.open_for_construction(&base, pack(value))?;
        Ok(GammaWordRef {
            base,
            _marker: PhantomData,
        })
    }

    // =========================================================================
    // Transactional operations
    // =========================================================================

    /// Current value.
    pub fn get(&self, txn: &mut GammaTxn) -> TxnResult<W> {
        Ok(unpack(&read(txn, &self.base, LockMode::None)?))
    }

    /// Current value, acquiring at least `lock_mode`.
    pub fn get_and_lock(&self, txn: &mut GammaTxn, lock_mode: LockMode) -> TxnResult<W> {
        Ok(unpack(&read(txn, &self.base, lock_mode)?))
    }

    /// Replace the value.
    pub fn set(&self, txn: &mut GammaTxn, value: W) -> TxnResult<()> {
        write(txn, &self.base, LockMode::None, pack(value)).map(|_| ())
    }

    /// Replace the value, acquiring at least `lock_mode`.
    pub fn set_and_lock(&self, txn: &mut GammaTxn, value: W, lock_mode: LockMode) -> TxnResult<()> {
        write(txn, &self.base, lock_mode, pack(value)).map(|_| ())
    }

    /// Replace the value and return the previous one.
    pub fn get_and_set(&self, txn: &mut GammaTxn, value: W) -> TxnResult<W> {
        Ok(unpack(&write(txn, &self.base, LockMode::None, pack(value))?))
    }

    /// Apply `function` and return the new value.
    pub fn alter_and_get<F>(&self, txn: &mut GammaTxn, function: F) -> TxnResult<W>
    where
        F: FnOnce(W) -> W,
    {
        let tranlocal = txn.open_for_write(&self.base, LockMode::None)?;
        let next = function(unpack(&tranlocal.value));
        tranlocal.value = pack(next);
        Ok(next)
    }

    /// Apply `function` and return the previous value.
    pub fn get_and_alter<F>(&self, txn: &mut GammaTxn, function: F) -> TxnResult<W>
    where
        F: FnOnce(W) -> W,
    {
        let tranlocal = txn.open_for_write(&self.base, LockMode::None)?;
        let current = unpack(&tranlocal.value);
        tranlocal.value = pack(function(current));
        Ok(current)
    }

    /// Apply `function` lazily, at commit or at the next read in `txn`.
    ///
    /// Two transactions commuting on the same ref don't conflict with each
    /// other.
    pub fn commute<F>(&self, txn: &mut GammaTxn, function: F) -> TxnResult<()>
    where
        F: FnOnce(W) -> W + Send + 'static,
    {
        txn.open_for_commute(
            &self.base,
            Box::new(move |current: Payload| pack(function(unpack(&current)))),
        )
    }

    /// Make the commit fail if another transaction updates this ref.
    pub fn ensure(&self, txn: &mut GammaTxn) -> TxnResult<()> {
        txn.ensure(&self.base)
    }

    /// Acquire at least `lock_mode` on the ref.
    pub fn acquire(&self, txn: &mut GammaTxn, lock_mode: LockMode) -> TxnResult<()> {
        txn.open_for_read(&self.base, lock_mode).map(|_| ())
    }

    /// Lock `txn` holds on this ref.
    pub fn lock_mode(&self, txn: &GammaTxn) -> LockMode {
        txn.lock_mode_of(&self.base)
    }

    /// Block until the value equals `expected`.
    pub fn await_value(&self, txn: &mut GammaTxn, expected: W) -> TxnResult<()> {
        let expected = expected.to_word();
        await_payload(txn, &self.base, |value| value.word() == expected)
    }

    /// Block until `predicate` holds.
    ///
    /// If the predicate panics the transaction is aborted and the panic
    /// continues.
    pub fn await_predicate<F>(&self, txn: &mut GammaTxn, predicate: F) -> TxnResult<()>
    where
        F: FnOnce(W) -> bool,
    {
        await_payload(txn, &self.base, |value| predicate(unpack(value)))
    }

    /// Describe the ref with the value `txn` sees.
    pub fn to_debug_string(&self, txn: &mut GammaTxn) -> TxnResult<String> {
        let value = self.get(txn)?;
        Ok(describe(&self.base, &value))
    }

    // =========================================================================
    // Atomic operations
    // =========================================================================

    /// Consistent current value.
    pub fn atomic_get(&self) -> TxnResult<W> {
        Ok(unpack(&self.base.atomic_load()?))
    }

    /// Current value without waiting for a writer to finish.
    pub fn atomic_weak_get(&self) -> W {
        unpack(&self.base.load_payload())
    }

    /// Store `value` and return it.
    pub fn atomic_set(&self, value: W) -> TxnResult<W> {
        Ok(unpack(&self.base.atomic_modify(|_| Some(pack(value)))?.new))
    }

    /// Store `value` and return the previous one.
    pub fn atomic_get_and_set(&self, value: W) -> TxnResult<W> {
        Ok(unpack(&self.base.atomic_modify(|_| Some(pack(value)))?.old))
    }

    /// Store `value` if the current value is `expected`.
    pub fn atomic_compare_and_set(&self, expected: W, value: W) -> TxnResult<bool> {
        let expected = expected.to_word();
        let outcome = self
            .base
            .atomic_modify(|current| (current.word() == expected).then(|| pack(value)))?;
        Ok(outcome.applied)
    }

    /// Apply `function` atomically and return the new value.
    pub fn atomic_alter_and_get<F>(&self, function: F) -> TxnResult<W>
    where
        F: FnOnce(W) -> W,
    {
        let outcome = self
            .base
            .atomic_modify(|current| Some(pack(function(unpack(current)))))?;
        Ok(unpack(&outcome.new))
    }

    /// Apply `function` atomically and return the previous value.
    pub fn atomic_get_and_alter<F>(&self, function: F) -> TxnResult<W>
    where
        F: FnOnce(W) -> W,
    {
        let outcome = self
            .base
            .atomic_modify(|current| Some(pack(function(unpack(current)))))?;
        Ok(unpack(&outcome.old))
    }

    /// Strongest lock currently held by anyone.
    pub fn atomic_lock_mode(&self) -> LockMode {
        self.base.orec_state().lock_mode()
    }

    /// Describe the ref with its committed value.
    pub fn atomic_to_string(&self) -> TxnResult<String> {
        let value = self.atomic_get()?;
        Ok(describe(&self.base, &value))
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

impl<W: TxnInteger> GammaWordRef<W> {
    /// Add `amount` and return the new value.
    pub fn increment_and_get(&self, txn: &mut GammaTxn, amount: W) -> TxnResult<W> {
        self.alter_and_get(txn, |value| value.add_wrapping(amount))
    }

    /// Add `amount` and return the previous value.
    pub fn get_and_increment(&self, txn: &mut GammaTxn, amount: W) -> TxnResult<W> {
        self.get_and_alter(txn, |value| value.add_wrapping(amount))
    }

    /// Commuting add of `amount`.
    pub fn increment_by(&self, txn: &mut GammaTxn, amount: W) -> TxnResult<()> {
        self.commute(txn, move |value| value.add_wrapping(amount))
    }

    /// Commuting add of one.
    pub fn increment(&self, txn: &mut GammaTxn) -> TxnResult<()> {
        self.increment_by(txn, W::ONE)
    }

    /// Commuting subtract of one.
    pub fn decrement(&self, txn: &mut GammaTxn) -> TxnResult<()> {
        self.increment_by(txn, W::ONE.negate_wrapping())
    }

    /// Atomically add `amount` and return the new value.
    pub fn atomic_increment_and_get(&self, amount: W) -> TxnResult<W> {
        self.atomic_alter_and_get(|value| value.add_wrapping(amount))
    }

    /// Atomically add `amount` and return the previous value.
    pub fn atomic_get_and_increment(&self, amount: W) -> TxnResult<W> {
        self.atomic_get_and_alter(|value| value.add_wrapping(amount))
    }
}

impl GammaWordRef<f64> {
    /// Add `amount` and return the new value.
    pub fn add_and_get(&self, txn: &mut GammaTxn, amount: f64) -> TxnResult<f64> {
        self.alter_and_get(txn, |value| value + amount)
    }

    /// Add `amount` and return the previous value.
    pub fn get_and_add(&self, txn: &mut GammaTxn, amount: f64) -> TxnResult<f64> {
        self.get_and_alter(txn, |value| value + amount)
    }

    /// Atomically add `amount` and return the new value.
    pub fn atomic_add_and_get(&self, amount: f64) -> TxnResult<f64> {
        self.atomic_alter_and_get(|value| value + amount)
    }

    /// Atomically add `amount` and return the previous value.
    pub fn atomic_get_and_add(&self, amount: f64) -> TxnResult<f64> {
        self.atomic_get_and_alter(|value| value + amount)
    }
}

impl<W> Clone for GammaWordRef<W> {
    fn clone(&self) -> Self {
        GammaWordRef {
            base: Arc::clone(&self.base),
            _marker: PhantomData,
        }
    }
}

impl<W: TxnWord> fmt::Debug for GammaWordRef<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GammaWordRef")
            .field("kind", &W::KIND)
            .field("value", &self.atomic_weak_get())
            .field("version", &self.base.version())
            .field("orec", &self.base.orec_state())
            .finish()
    }
}

#[inline]
fn pack<W: TxnWord>(value: W) -> Payload {
    Payload::Word(value.to_word())
}

#[inline]
fn unpack<W: TxnWord>(payload: &Payload) -> W {
    W::from_word(payload.word())
}

#[cfg(test)]
mod tests {
    use crate::GammaStm;
    use gammastm_core::LockMode;

    #[test]
    fn atomic_increment_from_two() {
        let stm = GammaStm::new();
        let counter = stm.new_long_ref(2);
        assert_eq!(counter.atomic_increment_and_get(10).unwrap(), 12);
        assert_eq!(counter.version(), 2);
        let state = counter.orec_state();
        assert!(!state.has_any_lock());
        assert_eq!(state.surplus(), 0);
    }

    #[test]
    fn unchanged_atomic_set_keeps_version() {
        let stm = GammaStm::new();
        let flag = stm.new_boolean_ref(true);
        assert!(flag.atomic_set(true).unwrap());
        assert_eq!(flag.version(), 1);
        assert!(flag.atomic_get_and_set(false).unwrap());
        assert!(!flag.atomic_get().unwrap());
        assert_eq!(flag.version(), 2);
    }

    #[test]
    fn compare_and_set_on_words() {
        let stm = GammaStm::new();
        let value = stm.new_int_ref(-4);
        assert!(!value.atomic_compare_and_set(3, 9).unwrap());
        assert!(value.atomic_compare_and_set(-4, 9).unwrap());
        assert_eq!(value.atomic_get().unwrap(), 9);
    }

    #[test]
    fn doubles_keep_their_bits() {
        let stm = GammaStm::new();
        let value = stm.new_double_ref(-0.0);
        assert!(value.atomic_get().unwrap().is_sign_negative());
        assert_eq!(value.atomic_add_and_get(1.5).unwrap(), 1.5);
        assert_eq!(value.atomic_get_and_add(0.5).unwrap(), 1.5);
        assert_eq!(value.atomic_weak_get(), 2.0);
    }

    #[test]
    fn transactional_alterations() {
        let stm = GammaStm::new();
        let value = stm.new_long_ref(10);
        let executor = stm.default_txn_executor();

        let result = executor
            .execute(|txn| {
                let before = value.get_and_increment(txn, 5)?;
                let after = value.increment_and_get(txn, 1)?;
                Ok((before, after))
            })
            .unwrap();
        assert_eq!(result, (10, 16));
        assert_eq!(value.atomic_get().unwrap(), 16);
        assert_eq!(value.version(), 2);
    }

    #[test]
    fn writing_back_the_read_value_is_clean() {
        let stm = GammaStm::new();
        let value = stm.new_long_ref(3);
        stm.default_txn_executor()
            .execute(|txn| {
                let current = value.get(txn)?;
                value.set(txn, current + 1)?;
                value.set(txn, current)
            })
            .unwrap();
        assert_eq!(value.version(), 1);
    }

    #[test]
    fn commuting_increments_apply_at_commit() {
        let stm = GammaStm::new();
        let counter = stm.new_long_ref(0);
        stm.default_txn_executor()
            .execute(|txn| {
                counter.increment(txn)?;
                counter.increment_by(txn, 4)?;
                counter.decrement(txn)
            })
            .unwrap();
        assert_eq!(counter.atomic_get().unwrap(), 4);
        assert_eq!(counter.version(), 2);
    }

    #[test]
    fn read_after_commute_sees_the_pending_update() {
        let stm = GammaStm::new();
        let counter = stm.new_long_ref(1);
        let seen = stm
            .default_txn_executor()
            .execute(|txn| {
                counter.increment_by(txn, 2)?;
                counter.get(txn)
            })
            .unwrap();
        assert_eq!(seen, 3);
        assert_eq!(counter.atomic_get().unwrap(), 3);
    }

    #[test]
    fn explicit_lock_is_visible() {
        let stm = GammaStm::new();
        let value = stm.new_long_ref(1);
        let mut txn = stm.new_default_txn();
        value.acquire(&mut txn, LockMode::Write).unwrap();
        assert_eq!(value.lock_mode(&txn), LockMode::Write);
        assert_eq!(value.atomic_lock_mode(), LockMode::Write);
        txn.abort().unwrap();
        assert_eq!(value.atomic_lock_mode(), LockMode::None);
        assert!(value.orec_state().is_idle());
    }

    #[test]
    fn debug_string() {
        let stm = GammaStm::new();
        let value = stm.new_int_ref(42);
        let text = value.atomic_to_string().unwrap();
        assert!(text.contains("int"));
        assert!(text.contains("42"));
    }
}
