//! Transaction factories
//!
//! A `TxnFactory` stamps out transactions sharing one immutable `TxnConfig`
//! and one speculative state, so what one transaction learns about the
//! flavor it needs benefits the rest of its family.

use crate::executor::TxnExecutor;
use crate::stm::StmShared;
use crate::txn::{GammaTxn, SpeculativeConfig, TxnFlavor};
use gammastm_core::{ConfigError, IsolationLevel, LockMode, TxnConfig};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Builder for a [`TxnFactory`].
///
/// Starts from the owning instance's default configuration.
///
/// # Example
///
/// ```ignore
/// let factory = stm
///     .new_txn_factory_builder()
///     .family_name("transfer")
///     .isolation_level(IsolationLevel::Serializable)
///     .build()?;
/// ```
pub struct TxnFactoryBuilder {
    stm: Arc<StmShared>,
    config: TxnConfig,
}

impl TxnFactoryBuilder {
    pub(crate) fn new(stm: Arc<StmShared>) -> Self {
        let config = (*stm.default_txn_config).clone();
        TxnFactoryBuilder { stm, config }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: TxnConfig) -> Self {
        self.config = config;
        self
    }

    /// Name used in logs.
    pub fn family_name(mut self, name: impl Into<String>) -> Self {
        self.config.family_name = name.into();
        self
    }

    /// Reject every write.
    pub fn readonly(mut self, readonly: bool) -> Self {
        self.config.readonly = readonly;
        self
    }

    /// Isolation level.
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.config.isolation_level = level;
        self
    }

    /// Lock taken on every read. Raises the write lock mode to at least
    /// `mode`, since a write is also a read.
    pub fn read_lock_mode(mut self, mode: LockMode) -> Self {
        self.config.read_lock_mode = mode;
        self.config.write_lock_mode = self.config.write_lock_mode.max(mode);
        self
    }

    /// Lock taken on every write.
    pub fn write_lock_mode(mut self, mode: LockMode) -> Self {
        self.config.write_lock_mode = mode;
        self
    }

    /// Skip publishing writes that didn't change the value.
    pub fn dirty_check_enabled(mut self, enabled: bool) -> Self {
        self.config.dirty_check_enabled = enabled;
        self
    }

    /// CAS spins before an orec operation gives up.
    pub fn spin_count(mut self, spin_count: u32) -> Self {
        self.config.spin_count = spin_count;
        self
    }

    /// Attempts an executor makes before giving up.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Whether `retry()` may block.
    pub fn blocking_allowed(mut self, allowed: bool) -> Self {
        self.config.blocking_allowed = allowed;
        self
    }

    /// Whether blocking observes the executor's interrupt token.
    pub fn interruptible(mut self, interruptible: bool) -> Self {
        self.config.interruptible = interruptible;
        self
    }

    /// Bound on the total time spent blocked.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Start lean and escalate on demand.
    pub fn speculative_config_enabled(mut self, enabled: bool) -> Self {
        self.config.speculative_config_enabled = enabled;
        self
    }

    /// Record plain reads.
    pub fn read_tracking_enabled(mut self, enabled: bool) -> Self {
        self.config.read_tracking_enabled = enabled;
        self
    }

    /// Always use a fat flavor.
    pub fn force_fat(mut self, fat: bool) -> Self {
        self.config.force_fat = fat;
        self
    }

    /// Validate and build the factory.
    pub fn build(self) -> Result<TxnFactory, ConfigError> {
        self.config.validate()?;
        let config = Arc::new(self.config);
        let speculative = Arc::new(SpeculativeConfig::new(&config));
        debug!(
            family = %config.family_name,
            isolation = %config.isolation_level,
            readonly = config.readonly,
            "txn factory built"
        );
        Ok(TxnFactory::from_parts(self.stm, config, speculative))
    }

    /// Build the factory and wrap it in an executor.
    pub fn new_txn_executor(self) -> Result<TxnExecutor, ConfigError> {
        Ok(self.build()?.new_executor())
    }
}

impl fmt::Debug for TxnFactoryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxnFactoryBuilder")
            .field("config", &self.config)
            .finish()
    }
}

struct FactoryInner {
    stm: Arc<StmShared>,
    config: Arc<TxnConfig>,
    speculative: Arc<SpeculativeConfig>,
}

/// Produces transactions of one family. Cheap to clone.
#[derive(Clone)]
pub struct TxnFactory {
    inner: Arc<FactoryInner>,
}

impl TxnFactory {
    pub(crate) fn from_parts(
        stm: Arc<StmShared>,
        config: Arc<TxnConfig>,
        speculative: Arc<SpeculativeConfig>,
    ) -> Self {
        TxnFactory {
            inner: Arc::new(FactoryInner {
                stm,
                config,
                speculative,
            }),
        }
    }

    /// New transaction in the flavor speculation currently prescribes.
    pub fn new_txn(&self) -> GammaTxn {
        GammaTxn::new(
            Arc::clone(&self.inner.stm),
            Arc::clone(&self.inner.config),
            Arc::clone(&self.inner.speculative),
            None,
        )
    }

    /// New transaction fixed to the fat variable-length flavor with the
    /// rich man's conflict scan.
    pub(crate) fn new_unspeculative_txn(&self) -> GammaTxn {
        GammaTxn::new(
            Arc::clone(&self.inner.stm),
            Arc::clone(&self.inner.config),
            Arc::clone(&self.inner.speculative),
            Some(TxnFlavor::FatVariableLength),
        )
    }

    /// The configuration shared by the family.
    pub fn config(&self) -> &TxnConfig {
        &self.inner.config
    }

    /// Flavor the next transaction will start with.
    pub fn speculative_flavor(&self) -> TxnFlavor {
        self.inner.speculative.flavor()
    }

    pub(crate) fn stm(&self) -> &Arc<StmShared> {
        &self.inner.stm
    }

    /// Executor running closures in transactions of this factory.
    pub fn new_executor(&self) -> TxnExecutor {
        TxnExecutor::new(self.clone())
    }
}

impl fmt::Debug for TxnFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxnFactory")
            .field("family", &self.inner.config.family_name)
            .field("flavor", &self.speculative_flavor())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::GammaStm;
    use crate::TxnFlavor;
    use gammastm_core::{ConfigError, IsolationLevel, LockMode};

    #[test]
    fn builder_starts_from_instance_defaults() {
        let stm = GammaStm::builder().spin_count(7).build().unwrap();
        let factory = stm.new_txn_factory_builder().build().unwrap();
        assert_eq!(factory.config().spin_count, 7);
        assert_eq!(factory.speculative_flavor(), TxnFlavor::LeanMono);
    }

    #[test]
    fn invalid_combination_is_rejected() {
        let stm = GammaStm::new();
        let result = stm
            .new_txn_factory_builder()
            .read_lock_mode(LockMode::Exclusive)
            .write_lock_mode(LockMode::Read)
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::WriteLockBelowReadLock { .. })
        ));

        let result = stm
            .new_txn_factory_builder()
            .read_tracking_enabled(false)
            .isolation_level(IsolationLevel::Serializable)
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::SerializableWithoutReadTracking)
        ));
    }

    #[test]
    fn fat_settings_skip_lean_flavors() {
        let stm = GammaStm::new();
        let factory = stm
            .new_txn_factory_builder()
            .read_lock_mode(LockMode::Read)
            .build()
            .unwrap();
        assert_eq!(factory.speculative_flavor(), TxnFlavor::FatMono);
        assert_eq!(factory.config().write_lock_mode, LockMode::Read);
    }

    #[test]
    fn readonly_factory_keeps_its_read_lock_mode() {
        let stm = GammaStm::new();
        let value = stm.new_long_ref(3);
        let factory = stm
            .new_txn_factory_builder()
            .readonly(true)
            .read_lock_mode(LockMode::Read)
            .build()
            .unwrap();

        let mut txn = factory.new_txn();
        assert_eq!(value.get(&mut txn).unwrap(), 3);
        assert_eq!(value.lock_mode(&txn), LockMode::Read);
        txn.commit().unwrap();
        assert!(value.orec_state().is_idle());

        let result = stm
            .new_txn_factory_builder()
            .readonly(true)
            .write_lock_mode(LockMode::Write)
            .build();
        assert!(matches!(result, Err(ConfigError::ReadonlyWithWriteLock(_))));
    }

    #[test]
    fn default_txn_is_fat_variable_length() {
        let stm = GammaStm::new();
        let txn = stm.new_default_txn();
        assert_eq!(txn.flavor(), TxnFlavor::FatVariableLength);
        assert!(txn.is_richmans_scan());
    }
}
