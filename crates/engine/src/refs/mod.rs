//! Typed transactional references
//!
//! - `GammaRef<T>`: any `Send + Sync` value, shared as `Arc<T>`
//! - `GammaWordRef<W>`: primitives stored in the 64-bit payload word, with
//!   the aliases `GammaLongRef`, `GammaIntRef`, `GammaDoubleRef` and
//!   `GammaBooleanRef`
//!
//! Every ref offers the same three groups of operations:
//! - transactional ones taking `&mut GammaTxn`
//! - `atomic_*` ones that run as a tiny transaction of their own against
//!   the orec
//! - diagnostics (`version`, `orec_state`, `read_biased`)

mod generic;
mod word;

pub use generic::GammaRef;
pub use word::{
    GammaBooleanRef, GammaDoubleRef, GammaIntRef, GammaLongRef, GammaWordRef, TxnInteger,
};

use crate::object::BaseRef;
use crate::payload::Payload;
use crate::txn::GammaTxn;
use gammastm_core::{LockMode, TxnResult};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Block the transaction until `predicate` holds for the value of `base`.
///
/// A panicking predicate aborts the transaction before the panic resumes.
fn await_payload<F>(txn: &mut GammaTxn, base: &Arc<BaseRef>, predicate: F) -> TxnResult<()>
where
    F: FnOnce(&Payload) -> bool,
{
    let value = txn.open_for_read(base, LockMode::None)?.value.clone();
    match panic::catch_unwind(AssertUnwindSafe(|| predicate(&value))) {
        Ok(true) => Ok(()),
        Ok(false) => txn.retry(),
        Err(cause) => {
            txn.abort_quietly();
            panic::resume_unwind(cause)
        }
    }
}

/// Transactional value of `base` as seen by `txn`.
fn read(txn: &mut GammaTxn, base: &Arc<BaseRef>, lock_mode: LockMode) -> TxnResult<Payload> {
    Ok(txn.open_for_read(base, lock_mode)?.value.clone())
}

/// Replace the value of `base`, returning the previous one.
fn write(
    txn: &mut GammaTxn,
    base: &Arc<BaseRef>,
    lock_mode: LockMode,
    value: Payload,
) -> TxnResult<Payload> {
    let tranlocal = txn.open_for_write(base, lock_mode)?;
    Ok(std::mem::replace(&mut tranlocal.value, value))
}

/// Diagnostic summary shared by every ref kind.
fn describe(base: &BaseRef, value: &dyn std::fmt::Debug) -> String {
    format!(
        "GammaRef<{}>{{version={}, value={:?}, orec={}}}",
        base.kind(),
        base.version(),
        value,
        base.orec_state()
    )
}
