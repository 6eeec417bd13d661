//! Transactions
//!
//! - `GammaTxn`: the transaction itself, one type for every flavor
//! - `TxnFlavor`: the shapes a transaction can take
//! - `SpeculativeConfig`: per-factory knowledge of which flavor is needed
//! - `TxnListener`: lifecycle callbacks
//! - `pool`: thread-local reuse of entry buffers

mod flavor;
mod gamma_txn;
mod listener;
pub mod pool;
mod speculative;

pub use flavor::TxnFlavor;
pub use gamma_txn::GammaTxn;
pub use listener::{TxnEvent, TxnListener};
pub(crate) use speculative::SpeculativeConfig;
