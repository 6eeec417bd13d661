//! Transaction configuration
//!
//! `TxnConfig` is immutable once a factory is built. The STM supplies the
//! defaults, a `TxnFactoryBuilder` overrides them, and `validate()` rejects
//! combinations the engine can't honor.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default number of CAS spins before an orec operation reports failure.
pub const DEFAULT_SPIN_COUNT: u32 = 64;
/// Default number of attempts an executor makes before giving up.
pub const DEFAULT_MAX_RETRIES: u32 = 1000;
/// Default capacity of the fixed-length transaction flavors.
pub const DEFAULT_MAX_FIXED_LENGTH_TXN_SIZE: usize = 20;
/// Default read set size up to which the per-object conflict scan is used.
pub const DEFAULT_MAX_POOR_MANS_CONFLICT_SCAN_LENGTH: usize = 20;

/// Isolation level of a transaction.
///
/// | Level | Unrepeatable read | Inconsistent read | Write skew |
/// |-------|-------------------|-------------------|------------|
/// | `RepeatableRead` | no | yes | yes |
/// | `Snapshot` | no | no | yes |
/// | `Serializable` | no | no | no |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IsolationLevel {
    /// Re-reading a ref returns the same value, different refs may be
    /// observed at different points in time.
    RepeatableRead,
    /// All reads observe one consistent snapshot.
    #[default]
    Snapshot,
    /// Snapshot plus write-skew prevention: reads are verified at commit.
    Serializable,
}

impl IsolationLevel {
    /// Whether two transactions may commit writes based on reads of each
    /// other's targets.
    pub fn allows_write_skew(&self) -> bool {
        !matches!(self, IsolationLevel::Serializable)
    }

    /// Whether reading the same ref twice may give different values.
    pub fn allows_unrepeatable_read(&self) -> bool {
        false
    }

    /// Whether reads of different refs may come from different snapshots.
    pub fn allows_inconsistent_read(&self) -> bool {
        matches!(self, IsolationLevel::RepeatableRead)
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IsolationLevel::RepeatableRead => "RepeatableRead",
            IsolationLevel::Snapshot => "Snapshot",
            IsolationLevel::Serializable => "Serializable",
        };
        f.write_str(s)
    }
}

/// Pessimistic lock a transaction holds on a ref.
///
/// Ordered from weakest to strongest so `max` picks the stricter mode.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum LockMode {
    /// No lock, optimistic access only.
    #[default]
    None,
    /// Shared lock: others may read and read-lock, nobody may write-lock.
    Read,
    /// Others may read but not lock.
    Write,
    /// Nobody else may read or lock. Required to publish a value.
    Exclusive,
}

impl LockMode {
    /// Numeric form, 0 for `None` up to 3 for `Exclusive`.
    pub fn as_u8(&self) -> u8 {
        match self {
            LockMode::None => 0,
            LockMode::Read => 1,
            LockMode::Write => 2,
            LockMode::Exclusive => 3,
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LockMode::None => "None",
            LockMode::Read => "Read",
            LockMode::Write => "Write",
            LockMode::Exclusive => "Exclusive",
        };
        f.write_str(s)
    }
}

/// Configuration of the transactions produced by one factory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxnConfig {
    /// Name used in logs to tell transaction families apart.
    pub family_name: String,
    /// Reject every write.
    pub readonly: bool,
    /// Isolation level.
    pub isolation_level: IsolationLevel,
    /// Lock acquired on every read.
    pub read_lock_mode: LockMode,
    /// Lock acquired on every write.
    pub write_lock_mode: LockMode,
    /// Compare written values with the value read to skip unchanged writes.
    /// When disabled every write is treated as dirty.
    pub dirty_check_enabled: bool,
    /// CAS spins before an orec operation gives up.
    pub spin_count: u32,
    /// Maximum attempts an executor makes.
    pub max_retries: u32,
    /// Whether `retry()` may block.
    pub blocking_allowed: bool,
    /// Whether blocking waits observe an interrupt token.
    pub interruptible: bool,
    /// Time the transaction may spend blocked, `None` for unbounded.
    pub timeout: Option<Duration>,
    /// Start with the cheapest flavor and escalate on demand.
    pub speculative_config_enabled: bool,
    /// Record plain reads in the transaction.
    pub read_tracking_enabled: bool,
    /// Capacity of the fixed-length flavors.
    pub max_fixed_length_txn_size: usize,
    /// Read set size up to which each new read re-validates every earlier read.
    pub maximum_poor_mans_conflict_scan_length: usize,
    /// Always use a fat flavor.
    pub force_fat: bool,
}

impl Default for TxnConfig {
    fn default() -> Self {
        TxnConfig {
            family_name: "anonymous".to_string(),
            readonly: false,
            isolation_level: IsolationLevel::Snapshot,
            read_lock_mode: LockMode::None,
            write_lock_mode: LockMode::None,
            dirty_check_enabled: true,
            spin_count: DEFAULT_SPIN_COUNT,
            max_retries: DEFAULT_MAX_RETRIES,
            blocking_allowed: true,
            interruptible: false,
            timeout: None,
            speculative_config_enabled: true,
            read_tracking_enabled: true,
            max_fixed_length_txn_size: DEFAULT_MAX_FIXED_LENGTH_TXN_SIZE,
            maximum_poor_mans_conflict_scan_length: DEFAULT_MAX_POOR_MANS_CONFLICT_SCAN_LENGTH,
            force_fat: false,
        }
    }
}

impl TxnConfig {
    /// Check the combination of settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.write_lock_mode < self.read_lock_mode {
            return Err(ConfigError::WriteLockBelowReadLock {
                read: self.read_lock_mode.to_string(),
                write: self.write_lock_mode.to_string(),
            });
        }
        // a readonly transaction may lock its reads, nothing beyond that
        if self.readonly && self.write_lock_mode > self.read_lock_mode {
            return Err(ConfigError::ReadonlyWithWriteLock(
                self.write_lock_mode.to_string(),
            ));
        }
        if !self.read_tracking_enabled && self.isolation_level == IsolationLevel::Serializable {
            return Err(ConfigError::SerializableWithoutReadTracking);
        }
        if self.max_retries == 0 {
            return Err(ConfigError::ZeroLimit("max_retries"));
        }
        if self.max_fixed_length_txn_size == 0 {
            return Err(ConfigError::ZeroLimit("max_fixed_length_txn_size"));
        }
        Ok(())
    }

    /// Whether the settings alone rule out the lean flavors.
    pub fn is_fat_required(&self) -> bool {
        self.force_fat
            || self.read_lock_mode != LockMode::None
            || self.write_lock_mode != LockMode::None
            || self.isolation_level == IsolationLevel::Serializable
            || self.timeout.is_some()
            || self.interruptible
            || !self.read_tracking_enabled
    }

    /// Whether write-skew checks are placed on every read.
    pub fn is_write_skew_checked(&self) -> bool {
        !self.isolation_level.allows_write_skew()
    }
}
