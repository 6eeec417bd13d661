//! Error taxonomy for transactional operations
//!
//! Three families share one enum so they can flow through `?`:
//!
//! - **Control flow**: `Retry`, `ReadWriteConflict`, `SpeculativeConfiguration`.
//!   Expected and frequent; the executor consumes them and re-runs the
//!   transaction. They carry no backtrace and allocate nothing.
//! - **Execution errors**: lock acquisition failure on an atomic operation,
//!   operating on a dead transaction, readonly violations, retry limits.
//!   These reach the caller.
//! - **User errors**: anything the transaction body wants to bail out with.
//!
//! Invariant violations inside the engine (orec protocol misuse) are not
//! represented here: they panic, and a transaction dropped during unwinding
//! aborts itself.

use crate::status::TxnStatus;
use std::time::Duration;
use thiserror::Error;

/// Result type for transactional operations.
pub type TxnResult<T> = std::result::Result<T, TxnError>;

/// Why a transaction could not proceed without restarting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// A previously read ref changed while reading another one.
    InconsistentRead,
    /// A lock could not be acquired within the spin budget.
    LockNotFree,
    /// A ref was updated between the read and the commit-time check.
    VersionChanged,
    /// Loading a commuting ref at commit time failed.
    CommuteLoad,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConflictKind::InconsistentRead => "inconsistent read",
            ConflictKind::LockNotFree => "lock not free",
            ConflictKind::VersionChanged => "version changed",
            ConflictKind::CommuteLoad => "commuting load failed",
        };
        f.write_str(s)
    }
}

/// The speculatively chosen transaction shape turned out too small.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeculativeFailure {
    /// A feature only the fat flavors support was used.
    FatRequired,
    /// More refs were opened than the flavor can hold.
    SizeExceeded {
        /// Number of refs the transaction tried to hold.
        required: usize,
    },
    /// The read set grew past the poor man's scan limit.
    RichmansScanRequired,
}

impl std::fmt::Display for SpeculativeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpeculativeFailure::FatRequired => f.write_str("fat transaction required"),
            SpeculativeFailure::SizeExceeded { required } => {
                write!(f, "transaction too small, {} refs required", required)
            }
            SpeculativeFailure::RichmansScanRequired => {
                f.write_str("rich man's conflict scan required")
            }
        }
    }
}

/// Invalid transaction or STM configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Write lock mode must be at least the read lock mode.
    #[error("write lock mode {write} is lower than read lock mode {read}")]
    WriteLockBelowReadLock {
        /// Configured read lock mode.
        read: String,
        /// Configured write lock mode.
        write: String,
    },

    /// A readonly transaction can't request write locks.
    #[error("readonly transaction can't use write lock mode {0}")]
    ReadonlyWithWriteLock(String),

    /// Serializable isolation depends on tracked reads.
    #[error("serializable isolation requires read tracking")]
    SerializableWithoutReadTracking,

    /// Read-biased threshold out of range.
    #[error("read biased threshold {0} exceeds maximum of 1023")]
    ReadBiasedThresholdTooLarge(u32),

    /// A numeric limit that must be positive was zero.
    #[error("{0} must be larger than 0")]
    ZeroLimit(&'static str),

    /// A configuration document could not be parsed.
    #[error("invalid configuration: {0}")]
    Parse(String),
}

/// All outcomes of a transactional operation other than success.
#[derive(Debug, Error)]
pub enum TxnError {
    /// Blocking retry requested; the executor waits for a read ref to change.
    #[error("retry requested")]
    Retry,

    /// Conflict with a concurrent transaction; the attempt must restart.
    #[error("read/write conflict: {0}")]
    ReadWriteConflict(ConflictKind),

    /// The speculative transaction flavor was inadequate.
    #[error("speculative configuration failure: {0}")]
    SpeculativeConfiguration(SpeculativeFailure),

    /// Write attempted in a readonly transaction.
    #[error("can't write in a readonly transaction")]
    ReadonlyViolation,

    /// An atomic operation could not acquire the lock within its budget.
    #[error("ref is locked, gave up after {attempts} attempts")]
    Locked {
        /// Number of lock attempts made.
        attempts: u32,
    },

    /// Operation on a transaction that is already committed or aborted.
    #[error("transaction is {status}, no further operations are allowed")]
    DeadTxn {
        /// Status at the time of the call.
        status: TxnStatus,
    },

    /// Ref opened on a prepared transaction.
    #[error("transaction is prepared, no further refs can be opened")]
    PreparedTxn,

    /// The ref belongs to a different STM instance.
    #[error("ref belongs to a different stm")]
    StmMismatch,

    /// Blocking retry is disabled in the configuration.
    #[error("blocking retry is not allowed")]
    RetryNotAllowed,

    /// Blocking retry without any tracked read has nothing to wait for.
    #[error("retry is not possible, transaction has no tracked reads")]
    RetryNotPossible,

    /// The remaining timeout ran out while blocked.
    #[error("transaction timed out after {0:?}")]
    RetryTimeout(Duration),

    /// The blocked transaction was interrupted.
    #[error("transaction was interrupted")]
    RetryInterrupted,

    /// The executor exhausted the configured number of attempts.
    #[error("too many retries: {attempts} attempts")]
    TooManyRetries {
        /// Attempts made, including the first.
        attempts: u32,
    },

    /// Commit of a transaction marked abort-only.
    #[error("transaction is abort only")]
    AbortOnly,

    /// `atomically` was called while another ambient transaction runs.
    #[error("nested ambient transaction")]
    NestedTransaction,

    /// Invalid configuration.
    #[error("illegal configuration: {0}")]
    IllegalConfig(#[from] ConfigError),

    /// Error raised by the transaction body.
    #[error("aborted by user: {0}")]
    User(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl TxnError {
    /// Wrap an arbitrary error raised inside a transaction body.
    pub fn user<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        TxnError::User(error.into())
    }

    /// Control-flow signals are consumed by the executor, never by users.
    pub fn is_control_flow(&self) -> bool {
        matches!(
            self,
            TxnError::Retry | TxnError::ReadWriteConflict(_) | TxnError::SpeculativeConfiguration(_)
        )
    }

    /// Retryable errors may succeed when the attempt is re-run.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TxnError::ReadWriteConflict(_) | TxnError::Locked { .. })
    }

    /// Check if this is a conflict error.
    pub fn is_conflict(&self) -> bool {
        matches!(self, TxnError::ReadWriteConflict(_))
    }

    /// Check if the error means the transaction hit a time or retry limit.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, TxnError::RetryTimeout(_) | TxnError::TooManyRetries { .. })
    }
}
