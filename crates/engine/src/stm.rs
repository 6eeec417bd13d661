//! The STM instance
//!
//! `GammaStm` owns everything refs and transactions of one instance share:
//! the global conflict counter, the backoff policy and the default
//! transaction configuration. Handles are cheap to clone; refs created by
//! one instance can only be used by transactions of the same instance.
//!
//! # Example
//!
//! ```ignore
//! use gammastm_engine::GammaStm;
//!
//! let stm = GammaStm::builder()
//!     .spin_count(32)
//!     .read_biased_threshold(128)
//!     .build()?;
//!
//! let counter = stm.new_long_ref(0);
//! stm.default_txn_executor().execute(|txn| counter.increment_and_get(txn, 1))?;
//! ```

use crate::executor::TxnExecutor;
use crate::factory::{TxnFactory, TxnFactoryBuilder};
use crate::refs::{GammaBooleanRef, GammaDoubleRef, GammaIntRef, GammaLongRef, GammaRef};
use crate::txn::{GammaTxn, SpeculativeConfig};
use gammastm_concurrency::{BackoffPolicy, DefaultBackoffPolicy, GlobalConflictCounter};
use gammastm_core::{
    ConfigError, IsolationLevel, LockMode, TxnConfig, DEFAULT_MAX_FIXED_LENGTH_TXN_SIZE,
    DEFAULT_MAX_POOR_MANS_CONFLICT_SCAN_LENGTH, DEFAULT_MAX_RETRIES, DEFAULT_SPIN_COUNT,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default number of readonly departures before an orec becomes read biased.
pub const DEFAULT_READ_BIASED_THRESHOLD: u32 = 64;

/// Default minimum backoff delay that is actually slept, in nanoseconds.
pub const DEFAULT_MIN_PARK_DELAY_NS: u64 = 500;

static NEXT_STM_ID: AtomicU64 = AtomicU64::new(1);

static GLOBAL: Lazy<GammaStm> = Lazy::new(GammaStm::new);

// =============================================================================
// Configuration
// =============================================================================

/// Instance-wide configuration.
///
/// Every field has a default, so a TOML document only needs the settings it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GammaStmConfig {
    /// CAS spins before an orec operation gives up.
    pub spin_count: u32,
    /// Attempts for executors and atomic operations.
    pub default_max_retries: u32,
    /// Readonly departures before an orec turns read biased (max 1023).
    pub read_biased_threshold: u32,
    /// Capacity of the fixed-length transaction flavors.
    pub max_fixed_length_txn_size: usize,
    /// Read set size up to which every new read re-validates earlier reads.
    pub maximum_poor_mans_conflict_scan_length: usize,
    /// Start transactions with the cheapest flavor.
    pub speculative_config_enabled: bool,
    /// Skip writes that don't change the value.
    pub dirty_check_enabled: bool,
    /// Default isolation level.
    pub isolation_level: IsolationLevel,
    /// Default lock acquired on reads.
    pub read_lock_mode: LockMode,
    /// Default lock acquired on writes.
    pub write_lock_mode: LockMode,
    /// Whether `retry()` may block.
    pub blocking_allowed: bool,
    /// Whether blocking waits can be interrupted.
    pub interruptible: bool,
    /// Default transaction timeout.
    pub timeout: Option<Duration>,
    /// Record plain reads.
    pub read_tracking_enabled: bool,
    /// Backoff delays shorter than this yield instead of sleeping.
    pub min_park_delay_ns: u64,
}

impl Default for GammaStmConfig {
    fn default() -> Self {
        GammaStmConfig {
            spin_count: DEFAULT_SPIN_COUNT,
            default_max_retries: DEFAULT_MAX_RETRIES,
            read_biased_threshold: DEFAULT_READ_BIASED_THRESHOLD,
            max_fixed_length_txn_size: DEFAULT_MAX_FIXED_LENGTH_TXN_SIZE,
            maximum_poor_mans_conflict_scan_length: DEFAULT_MAX_POOR_MANS_CONFLICT_SCAN_LENGTH,
            speculative_config_enabled: true,
            dirty_check_enabled: true,
            isolation_level: IsolationLevel::Snapshot,
            read_lock_mode: LockMode::None,
            write_lock_mode: LockMode::None,
            blocking_allowed: true,
            interruptible: false,
            timeout: None,
            read_tracking_enabled: true,
            min_park_delay_ns: DEFAULT_MIN_PARK_DELAY_NS,
        }
    }
}

impl GammaStmConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigError> {
        let config: GammaStmConfig =
            toml::from_str(document).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings, including the default transaction configuration
    /// they imply.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_biased_threshold > gammastm_concurrency::MAX_READ_BIASED_THRESHOLD {
            return Err(ConfigError::ReadBiasedThresholdTooLarge(
                self.read_biased_threshold,
            ));
        }
        if self.read_biased_threshold == 0 {
            return Err(ConfigError::ZeroLimit("read_biased_threshold"));
        }
        if self.default_max_retries == 0 {
            return Err(ConfigError::ZeroLimit("default_max_retries"));
        }
        self.txn_config().validate()
    }

    /// Transaction configuration used by factories that override nothing.
    pub fn txn_config(&self) -> TxnConfig {
        TxnConfig {
            family_name: "default".to_string(),
            readonly: false,
            isolation_level: self.isolation_level,
            read_lock_mode: self.read_lock_mode,
            write_lock_mode: self.write_lock_mode,
            dirty_check_enabled: self.dirty_check_enabled,
            spin_count: self.spin_count,
            max_retries: self.default_max_retries,
            blocking_allowed: self.blocking_allowed,
            interruptible: self.interruptible,
            timeout: self.timeout,
            speculative_config_enabled: self.speculative_config_enabled,
            read_tracking_enabled: self.read_tracking_enabled,
            max_fixed_length_txn_size: self.max_fixed_length_txn_size,
            maximum_poor_mans_conflict_scan_length: self.maximum_poor_mans_conflict_scan_length,
            force_fat: false,
        }
    }
}

// =============================================================================
// Shared state
// =============================================================================

/// State shared by every handle, ref and transaction of one instance.
pub(crate) struct StmShared {
    pub(crate) id: u64,
    pub(crate) config: GammaStmConfig,
    pub(crate) backoff: Arc<dyn BackoffPolicy>,
    pub(crate) conflict_counter: GlobalConflictCounter,
    pub(crate) default_txn_config: Arc<TxnConfig>,
    pub(crate) default_speculative: Arc<SpeculativeConfig>,
}

impl StmShared {
    pub(crate) fn spin_count(&self) -> u32 {
        self.config.spin_count
    }

    pub(crate) fn read_biased_threshold(&self) -> u32 {
        self.config.read_biased_threshold
    }
}

impl fmt::Debug for StmShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StmShared")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("conflicts", &self.conflict_counter.count())
            .finish()
    }
}

// =============================================================================
// GammaStm
// =============================================================================

/// Handle to one STM instance.
#[derive(Clone, Debug)]
pub struct GammaStm {
    shared: Arc<StmShared>,
}

impl GammaStm {
    /// Instance with default configuration.
    pub fn new() -> Self {
        Self::from_parts(GammaStmConfig::default(), None)
    }

    /// Start configuring an instance.
    pub fn builder() -> GammaStmBuilder {
        GammaStmBuilder::new()
    }

    /// Instance with the given configuration.
    pub fn with_config(config: GammaStmConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_parts(config, None))
    }

    /// Process-wide instance, created on first use.
    pub fn global() -> &'static GammaStm {
        &GLOBAL
    }

    fn from_parts(config: GammaStmConfig, backoff: Option<Arc<dyn BackoffPolicy>>) -> Self {
        let backoff = backoff.unwrap_or_else(|| {
            Arc::new(DefaultBackoffPolicy::with_min_delay(config.min_park_delay_ns))
        });
        let default_txn_config = Arc::new(config.txn_config());
        let default_speculative = Arc::new(SpeculativeConfig::new(&default_txn_config));
        let id = NEXT_STM_ID.fetch_add(1, Ordering::Relaxed);
        debug!(stm = id, spin_count = config.spin_count, "stm created");
        GammaStm {
            shared: Arc::new(StmShared {
                id,
                config,
                backoff,
                conflict_counter: GlobalConflictCounter::new(),
                default_txn_config,
                default_speculative,
            }),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<StmShared> {
        &self.shared
    }

    /// The instance configuration.
    pub fn config(&self) -> &GammaStmConfig {
        &self.shared.config
    }

    /// Backoff policy shared by executors and atomic operations.
    pub fn backoff_policy(&self) -> &Arc<dyn BackoffPolicy> {
        &self.shared.backoff
    }

    /// Conflicts signalled so far.
    pub fn conflict_count(&self) -> u64 {
        self.shared.conflict_counter.count()
    }

    /// Default transaction configuration.
    pub fn default_txn_config(&self) -> &TxnConfig {
        &self.shared.default_txn_config
    }

    // =========================================================================
    // Refs
    // =========================================================================

    /// Generic ref holding `value`.
    pub fn new_ref<T: Send + Sync + 'static>(&self, value: T) -> GammaRef<T> {
        GammaRef::new(self, value)
    }

    /// Ref holding a long.
    pub fn new_long_ref(&self, value: i64) -> GammaLongRef {
        GammaLongRef::new(self, value)
    }

    /// Ref holding an int.
    pub fn new_int_ref(&self, value: i32) -> GammaIntRef {
        GammaIntRef::new(self, value)
    }

    /// Ref holding a double.
    pub fn new_double_ref(&self, value: f64) -> GammaDoubleRef {
        GammaDoubleRef::new(self, value)
    }

    /// Ref holding a boolean.
    pub fn new_boolean_ref(&self, value: bool) -> GammaBooleanRef {
        GammaBooleanRef::new(self, value)
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Builder for a transaction factory starting from the instance defaults.
    pub fn new_txn_factory_builder(&self) -> TxnFactoryBuilder {
        TxnFactoryBuilder::new(Arc::clone(&self.shared))
    }

    /// Factory with the default configuration. All default factories of one
    /// instance share their speculative state.
    pub fn default_txn_factory(&self) -> TxnFactory {
        TxnFactory::from_parts(
            Arc::clone(&self.shared),
            Arc::clone(&self.shared.default_txn_config),
            Arc::clone(&self.shared.default_speculative),
        )
    }

    /// Executor with the default configuration.
    pub fn default_txn_executor(&self) -> TxnExecutor {
        self.default_txn_factory().new_executor()
    }

    /// A fresh transaction with the default configuration.
    ///
    /// Unlike transactions of the default factory it skips speculation and
    /// starts as the fat variable-length flavor, since a hand-driven
    /// transaction has no executor to restart it.
    pub fn new_default_txn(&self) -> GammaTxn {
        self.default_txn_factory().new_unspeculative_txn()
    }
}

impl Default for GammaStm {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for `GammaStm`.
pub struct GammaStmBuilder {
    config: GammaStmConfig,
    backoff: Option<Arc<dyn BackoffPolicy>>,
}

impl GammaStmBuilder {
    /// Builder with default settings.
    pub fn new() -> Self {
        GammaStmBuilder {
            config: GammaStmConfig::default(),
            backoff: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: GammaStmConfig) -> Self {
        self.config = config;
        self
    }

    /// CAS spins before an orec operation gives up.
    pub fn spin_count(mut self, spin_count: u32) -> Self {
        self.config.spin_count = spin_count;
        self
    }

    /// Attempts for executors and atomic operations.
    pub fn default_max_retries(mut self, retries: u32) -> Self {
        self.config.default_max_retries = retries;
        self
    }

    /// Readonly departures before an orec turns read biased.
    pub fn read_biased_threshold(mut self, threshold: u32) -> Self {
        self.config.read_biased_threshold = threshold;
        self
    }

    /// Capacity of the fixed-length flavors.
    pub fn max_fixed_length_txn_size(mut self, size: usize) -> Self {
        self.config.max_fixed_length_txn_size = size;
        self
    }

    /// Read set size up to which the per-ref conflict scan is used.
    pub fn maximum_poor_mans_conflict_scan_length(mut self, length: usize) -> Self {
        self.config.maximum_poor_mans_conflict_scan_length = length;
        self
    }

    /// Enable or disable speculative flavor selection.
    pub fn speculative_config_enabled(mut self, enabled: bool) -> Self {
        self.config.speculative_config_enabled = enabled;
        self
    }

    /// Default isolation level.
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.config.isolation_level = level;
        self
    }

    /// Default transaction timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Backoff delays shorter than this yield instead of sleeping.
    pub fn min_park_delay_ns(mut self, nanos: u64) -> Self {
        self.config.min_park_delay_ns = nanos;
        self
    }

    /// Use a custom backoff policy.
    pub fn backoff_policy(mut self, policy: Arc<dyn BackoffPolicy>) -> Self {
        self.backoff = Some(policy);
        self
    }

    /// Validate and create the instance.
    pub fn build(self) -> Result<GammaStm, ConfigError> {
        self.config.validate()?;
        Ok(GammaStm::from_parts(self.config, self.backoff))
    }
}

impl Default for GammaStmBuilder {
    fn default() -> Self {
        Self::new()
    }
}
