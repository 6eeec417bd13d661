//! Core types for gammastm
//!
//! This crate defines the vocabulary shared by every other crate:
//! - `TxnError` / `TxnResult`: the outcome of every transactional operation,
//!   control-flow signals included
//! - `TxnConfig` and the configuration tags (`IsolationLevel`, `LockMode`)
//! - Bit reinterpretation helpers used by the word-sized refs
//! - `TxnStatus`: lifecycle of a transaction

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bits;
pub mod config;
pub mod error;
pub mod status;

pub use bits::{boolean_as_long, double_as_long, long_as_boolean, long_as_double, TxnWord};
pub use config::{
    IsolationLevel, LockMode, TxnConfig, DEFAULT_MAX_FIXED_LENGTH_TXN_SIZE,
    DEFAULT_MAX_POOR_MANS_CONFLICT_SCAN_LENGTH, DEFAULT_MAX_RETRIES, DEFAULT_SPIN_COUNT,
};
pub use error::{ConfigError, ConflictKind, SpeculativeFailure, TxnError, TxnResult};
pub use status::TxnStatus;
