//! Convenient imports for gammastm.
//!
//! ```ignore
//! use gammastm::prelude::*;
//!
//! let counter = new_long_ref(0);
//! atomically(|txn| counter.increment(txn))?;
//! ```

// Ambient API
pub use crate::ambient::{
    atomically, new_boolean_ref, new_double_ref, new_int_ref, new_long_ref, new_ref,
};

// Instances and transactions
pub use gammastm_engine::{GammaStm, GammaTxn, TxnExecutor, TxnFactory};

// Refs
pub use gammastm_engine::{
    GammaBooleanRef, GammaDoubleRef, GammaIntRef, GammaLongRef, GammaRef,
};

// Configuration and errors
pub use gammastm_core::{IsolationLevel, LockMode, TxnError, TxnResult};
