//! Concurrency primitives for GammaStm
//!
//! This crate holds the shared-memory building blocks the engine is made of:
//! - `Orec`: the 64-bit ownership record every transactional object carries
//! - `BackoffPolicy`: randomized waiting between contended attempts
//! - `GlobalConflictCounter`: cheap "did anything conflict" signal
//! - `RetryLatch` / `ListenerRegistry`: blocking retry plumbing
//! - `InterruptToken`: cooperative interruption of blocked waits
//!
//! Nothing here knows about transactions; the engine crate composes these.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod conflict;
pub mod interrupt;
pub mod latch;
pub mod listeners;
pub mod orec;

pub use backoff::{BackoffPolicy, DefaultBackoffPolicy};
pub use conflict::{CacheAligned, GlobalConflictCounter};
pub use interrupt::{InterruptToken, Interrupted};
pub use latch::{ParkOutcome, RetryLatch};
pub use listeners::{ListenerRegistry, Listeners, Registration};
pub use orec::{ArriveStatus, Orec, OrecState, MAX_READ_BIASED_THRESHOLD};
