//! Ambient convenience API
//!
//! Free functions over the process-wide STM instance, for code that doesn't
//! want to carry a `GammaStm` handle around. The transaction itself is still
//! passed explicitly to the closure; only the instance is implicit.
//!
//! `atomically` calls don't nest: a body that calls `atomically` again gets
//! `NestedTransaction` instead of silently running a second, independent
//! transaction.

use gammastm_core::{TxnError, TxnResult};
use gammastm_engine::{
    GammaBooleanRef, GammaDoubleRef, GammaIntRef, GammaLongRef, GammaRef, GammaStm, GammaTxn,
    TxnExecutor,
};
use once_cell::sync::Lazy;
use std::cell::Cell;
use tracing::debug;

static DEFAULT_EXECUTOR: Lazy<TxnExecutor> =
    Lazy::new(|| GammaStm::global().default_txn_executor());

thread_local! {
    static IN_ATOMICALLY: Cell<bool> = Cell::new(false);
}

/// Marks the current thread as running an ambient transaction.
struct AmbientScope;

impl AmbientScope {
    fn enter() -> TxnResult<Self> {
        let nested = IN_ATOMICALLY.with(|flag| flag.replace(true));
        if nested {
            debug!("nested atomically rejected");
            return Err(TxnError::NestedTransaction);
        }
        Ok(AmbientScope)
    }
}

impl Drop for AmbientScope {
    fn drop(&mut self) {
        IN_ATOMICALLY.with(|flag| flag.set(false));
    }
}

/// The process-wide STM instance.
pub fn global_stm() -> &'static GammaStm {
    GammaStm::global()
}

/// Run `body` atomically on the global instance's default executor.
///
/// # Example
///
/// ```ignore
/// let balance = gammastm::new_long_ref(100);
/// gammastm::atomically(|txn| balance.increment_and_get(txn, -10))?;
/// ```
pub fn atomically<T, F>(body: F) -> TxnResult<T>
where
    F: FnMut(&mut GammaTxn) -> TxnResult<T>,
{
    atomically_with(&DEFAULT_EXECUTOR, body)
}

/// Run `body` atomically with `executor`, with the same nesting check as
/// [`atomically`].
pub fn atomically_with<T, F>(executor: &TxnExecutor, body: F) -> TxnResult<T>
where
    F: FnMut(&mut GammaTxn) -> TxnResult<T>,
{
    let _scope = AmbientScope::enter()?;
    executor.execute(body)
}

/// Generic ref on the global instance.
pub fn new_ref<T: Send + Sync + 'static>(value: T) -> GammaRef<T> {
    global_stm().new_ref(value)
}

/// Long ref on the global instance.
pub fn new_long_ref(value: i64) -> GammaLongRef {
    global_stm().new_long_ref(value)
}

/// Int ref on the global instance.
pub fn new_int_ref(value: i32) -> GammaIntRef {
    global_stm().new_int_ref(value)
}

/// Double ref on the global instance.
pub fn new_double_ref(value: f64) -> GammaDoubleRef {
    global_stm().new_double_ref(value)
}

/// Boolean ref on the global instance.
pub fn new_boolean_ref(value: bool) -> GammaBooleanRef {
    global_stm().new_boolean_ref(value)
}
