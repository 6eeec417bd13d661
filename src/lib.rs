//! # gammastm
//!
//! Software transactional memory built on ownership records.
//!
//! Every transactional ref carries a 64-bit orec (lock bits, reader surplus,
//! read-bias state) and a version. Transactions read optimistically, lock
//! what they write at commit, and are re-run by an executor when they
//! conflict.
//!
//! ## Quick Start
//!
//! ```ignore
//! use gammastm::prelude::*;
//!
//! let from = new_long_ref(100);
//! let to = new_long_ref(0);
//!
//! atomically(|txn| {
//!     from.increment_and_get(txn, -30)?;
//!     to.increment_and_get(txn, 30)?;
//!     Ok(())
//! })?;
//!
//! assert_eq!(to.atomic_get()?, 30);
//! ```
//!
//! ## Crates
//!
//! - [`gammastm_core`]: errors, configuration, bit conversions
//! - [`gammastm_concurrency`]: orec, backoff, retry latch, listeners
//! - [`gammastm_engine`]: refs, transactions, factories, executor
//!
//! ## Explicit Instances
//!
//! The free functions use one process-wide instance. Separate instances
//! with their own configuration come from [`GammaStm::builder`]:
//!
//! ```ignore
//! let stm = GammaStm::builder().read_biased_threshold(128).build()?;
//! let executor = stm
//!     .new_txn_factory_builder()
//!     .isolation_level(IsolationLevel::Serializable)
//!     .new_txn_executor()?;
//! ```

#![warn(missing_docs)]

mod ambient;

pub mod prelude;

// Ambient API
pub use ambient::{
    atomically, atomically_with, global_stm, new_boolean_ref, new_double_ref, new_int_ref,
    new_long_ref, new_ref,
};

// Engine
pub use gammastm_engine::{
    GammaBooleanRef, GammaDoubleRef, GammaIntRef, GammaLongRef, GammaRef, GammaStm,
    GammaStmBuilder, GammaStmConfig, GammaTxn, GammaWordRef, TxnEvent, TxnExecutor, TxnFactory,
    TxnFactoryBuilder, TxnFlavor, TxnInteger, TxnListener,
};

// Core types
pub use gammastm_core::{
    ConfigError, ConflictKind, IsolationLevel, LockMode, SpeculativeFailure, TxnConfig, TxnError,
    TxnResult, TxnStatus, TxnWord,
};

// Concurrency primitives users interact with
pub use gammastm_concurrency::{BackoffPolicy, DefaultBackoffPolicy, InterruptToken, OrecState};

pub use gammastm_concurrency;
pub use gammastm_core;
pub use gammastm_engine;
