//! Transaction engine for gammastm
//!
//! This crate provides:
//! - `GammaStm`: an STM instance with its configuration and conflict counter
//! - Typed refs (`GammaRef<T>`, `GammaLongRef`, `GammaIntRef`,
//!   `GammaDoubleRef`, `GammaBooleanRef`) with transactional and atomic
//!   operations
//! - `GammaTxn`: transactions with speculative flavor selection
//! - `TxnFactory` / `TxnExecutor`: configuration families and the retry loop
//!
//! # Architecture
//!
//! Every ref is a `BaseRef`: an orec, a version and a value cell. A
//! transaction keeps one tranlocal per ref it touched and publishes its
//! writes at commit while holding the exclusive lock of every written ref.
//!
//! ```text
//! TxnExecutor ──▶ TxnFactory ──▶ GammaTxn ──▶ Tranlocal ──▶ BaseRef
//!                     │                                      │
//!               SpeculativeConfig                       Orec + version
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod executor;
pub mod factory;
mod object;
mod payload;
pub mod refs;
pub mod stm;
mod tranlocal;
pub mod txn;

pub use executor::TxnExecutor;
pub use factory::{TxnFactory, TxnFactoryBuilder};
pub use refs::{
    GammaBooleanRef, GammaDoubleRef, GammaIntRef, GammaLongRef, GammaRef, GammaWordRef,
    TxnInteger,
};
pub use stm::{
    GammaStm, GammaStmBuilder, GammaStmConfig, DEFAULT_MIN_PARK_DELAY_NS,
    DEFAULT_READ_BIASED_THRESHOLD,
};
pub use txn::{GammaTxn, TxnEvent, TxnFlavor, TxnListener};

#[cfg(test)]
mod send_sync {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(GammaStm: Send, Sync, Clone);
    assert_impl_all!(GammaRef<String>: Send, Sync, Clone);
    assert_impl_all!(GammaLongRef: Send, Sync, Clone);
    assert_impl_all!(GammaTxn: Send);
    assert_impl_all!(TxnFactory: Send, Sync, Clone);
    assert_impl_all!(TxnExecutor: Send, Sync, Clone);
}
