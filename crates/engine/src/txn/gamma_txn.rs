//! The transaction
//!
//! One struct serves every flavor; the flavor decides capacity, lookup and
//! which features are available. Features a lean attempt can't provide
//! fail the attempt with a speculative configuration error, after which the
//! executor restarts it with a fatter flavor.
//!
//! # Read consistency
//!
//! Every new read is checked against the earlier ones:
//! - poor man's scan: re-check every tracked read (lean flavors, and fat
//!   flavors while the read set is small)
//! - rich man's scan: reads arrive on their orec, so writers notice them
//!   and bump the global conflict counter; the full re-check only runs when
//!   the counter moved since the last check
//!
//! Switching from poor to rich man's needs a restart, because earlier reads
//! of the attempt didn't arrive.

use super::flavor::TxnFlavor;
use super::listener::{TxnEvent, TxnListener};
use super::pool;
use super::speculative::SpeculativeConfig;
use crate::object::BaseRef;
use crate::payload::Payload;
use crate::stm::StmShared;
use crate::tranlocal::{CommuteFn, Tranlocal, TranlocalMode};
use gammastm_concurrency::{InterruptToken, Listeners, Registration, RetryLatch};
use gammastm_core::{
    ConflictKind, LockMode, SpeculativeFailure, TxnConfig, TxnError, TxnResult, TxnStatus,
};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A ref opened by a transaction together with the transaction's view of it.
pub(crate) struct Entry {
    pub(crate) owner: Arc<BaseRef>,
    pub(crate) tranlocal: Tranlocal,
}

/// A transaction attempt and the state carried across its restarts.
///
/// Obtained from a `TxnFactory` (or `GammaStm::new_default_txn`) and
/// normally driven by a `TxnExecutor`. Dropping a transaction that is still
/// active or prepared aborts it.
///
/// # Thread Safety
///
/// A transaction belongs to the thread running it; it is `Send` so it can
/// be handed over, but it is never shared.
pub struct GammaTxn {
    stm: Arc<StmShared>,
    config: Arc<TxnConfig>,
    speculative: Arc<SpeculativeConfig>,
    forced_flavor: Option<TxnFlavor>,
    flavor: TxnFlavor,
    status: TxnStatus,
    attempt: u32,
    remaining_timeout: Option<Duration>,
    entries: Vec<Entry>,
    index: FxHashMap<usize, usize>,
    untracked: Option<Tranlocal>,
    richmans_scan: bool,
    local_conflict_count: u64,
    commit_conflict: bool,
    abort_only: bool,
    listeners: Vec<Box<dyn TxnListener>>,
    retry_latch: Arc<RetryLatch>,
    interrupt: Option<InterruptToken>,
}

impl GammaTxn {
    pub(crate) fn new(
        stm: Arc<StmShared>,
        config: Arc<TxnConfig>,
        speculative: Arc<SpeculativeConfig>,
        forced_flavor: Option<TxnFlavor>,
    ) -> Self {
        let remaining_timeout = config.timeout;
        let mut txn = GammaTxn {
            stm,
            config,
            speculative,
            forced_flavor,
            flavor: TxnFlavor::FatVariableLength,
            status: TxnStatus::Active,
            attempt: 1,
            remaining_timeout,
            entries: pool::acquire(),
            index: FxHashMap::default(),
            untracked: None,
            richmans_scan: false,
            local_conflict_count: 0,
            commit_conflict: false,
            abort_only: false,
            listeners: Vec::new(),
            retry_latch: Arc::new(RetryLatch::new()),
            interrupt: None,
        };
        txn.begin_attempt();
        txn
    }

    fn begin_attempt(&mut self) {
        self.flavor = self.forced_flavor.unwrap_or_else(|| self.speculative.flavor());
        self.richmans_scan = !self.flavor.is_lean()
            && (self.forced_flavor.is_some() || self.speculative.is_richmans_scan_required());
        self.status = TxnStatus::Active;
        self.entries.clear();
        self.index.clear();
        self.untracked = None;
        self.commit_conflict = false;
        self.abort_only = false;
        self.listeners.clear();
        self.local_conflict_count = self.stm.conflict_counter.count();
    }

    /// Start the next attempt. Speculative restarts don't count as attempts.
    pub(crate) fn restart(&mut self, count_attempt: bool) {
        self.abort_quietly();
        if count_attempt {
            self.attempt += 1;
        }
        self.begin_attempt();
    }

    pub(crate) fn set_interrupt(&mut self, token: Option<InterruptToken>) {
        self.interrupt = token;
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Lifecycle status.
    pub fn status(&self) -> TxnStatus {
        self.status
    }

    /// Attempt number, starting at 1.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Blocking time left, `None` when unbounded.
    pub fn remaining_timeout(&self) -> Option<Duration> {
        self.remaining_timeout
    }

    pub(crate) fn set_remaining_timeout(&mut self, remaining: Duration) {
        if self.remaining_timeout.is_some() {
            self.remaining_timeout = Some(remaining);
        }
    }

    /// Flavor of the current attempt.
    pub fn flavor(&self) -> TxnFlavor {
        self.flavor
    }

    /// Configuration the transaction runs with.
    pub fn config(&self) -> &TxnConfig {
        &self.config
    }

    /// Number of refs opened in this attempt.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Whether the transaction will refuse to commit.
    pub fn is_abort_only(&self) -> bool {
        self.abort_only
    }

    pub(crate) fn stm(&self) -> &Arc<StmShared> {
        &self.stm
    }

    pub(crate) fn is_richmans_scan(&self) -> bool {
        self.richmans_scan
    }

    // =========================================================================
    // Failure helpers
    // =========================================================================

    /// Abort if still alive; errors are impossible on that path.
    pub(crate) fn abort_quietly(&mut self) {
        if self.status.is_alive() {
            self.release_all_after_failure();
        }
    }

    fn fail<T>(&mut self, error: TxnError) -> TxnResult<T> {
        self.abort_quietly();
        Err(error)
    }

    fn speculative_failure<T>(&mut self, failure: SpeculativeFailure) -> TxnResult<T> {
        self.speculative.record(failure);
        debug!(
            family = %self.config.family_name,
            flavor = %self.flavor,
            reason = %failure,
            "speculative upgrade"
        );
        self.fail(TxnError::SpeculativeConfiguration(failure))
    }

    fn conflict<T>(&mut self, kind: ConflictKind) -> TxnResult<T> {
        debug!(
            family = %self.config.family_name,
            attempt = self.attempt,
            flavor = %self.flavor,
            reason = %kind,
            "read/write conflict"
        );
        self.fail(TxnError::ReadWriteConflict(kind))
    }

    fn check_open(&mut self) -> TxnResult<()> {
        match self.status {
            TxnStatus::Active => Ok(()),
            TxnStatus::Prepared => self.fail(TxnError::PreparedTxn),
            status => Err(TxnError::DeadTxn { status }),
        }
    }

    fn check_owner(&mut self, owner: &BaseRef) -> TxnResult<()> {
        if owner.stm.id != self.stm.id {
            return self.fail(TxnError::StmMismatch);
        }
        Ok(())
    }

    fn require_fat(&mut self) -> TxnResult<()> {
        if self.flavor.is_lean() {
            return self.speculative_failure(SpeculativeFailure::FatRequired);
        }
        Ok(())
    }

    // =========================================================================
    // Opening refs
    // =========================================================================

    fn find(&self, owner: &Arc<BaseRef>) -> Option<usize> {
        if self.flavor.is_indexed() {
            return self.index.get(&BaseRef::key(owner)).copied();
        }
        self.entries
            .iter()
            .position(|entry| Arc::ptr_eq(&entry.owner, owner))
    }

    fn ensure_capacity(&mut self) -> TxnResult<()> {
        if let Some(capacity) = self.flavor.capacity(self.config.max_fixed_length_txn_size) {
            if self.entries.len() >= capacity {
                let required = self.entries.len() + 1;
                return self.speculative_failure(SpeculativeFailure::SizeExceeded { required });
            }
        }
        Ok(())
    }

    fn push(&mut self, owner: &Arc<BaseRef>, tranlocal: Tranlocal) -> usize {
        let position = self.entries.len();
        self.entries.push(Entry {
            owner: Arc::clone(owner),
            tranlocal,
        });
        if self.flavor.is_indexed() {
            self.index.insert(BaseRef::key(owner), position);
        }
        position
    }

    /// Load a ref the transaction hasn't seen yet.
    fn load_new(
        &mut self,
        owner: &Arc<BaseRef>,
        lock_mode: LockMode,
        mode: TranlocalMode,
    ) -> TxnResult<usize> {
        self.ensure_capacity()?;
        let mut tranlocal = Tranlocal::unloaded(mode);
        match owner.load(
            &mut tranlocal,
            self.config.spin_count,
            lock_mode,
            self.richmans_scan,
        ) {
            Ok(conflict) => self.commit_conflict |= conflict,
            Err(kind) => return self.conflict(kind),
        }
        tranlocal.write_skew_check = self.config.is_write_skew_checked();
        let position = self.push(owner, tranlocal);
        self.verify_reads(position)?;
        Ok(position)
    }

    /// Re-validate earlier reads after the read at `latest`.
    fn verify_reads(&mut self, latest: usize) -> TxnResult<()> {
        if self.config.isolation_level.allows_inconsistent_read() {
            return Ok(());
        }

        if self.richmans_scan {
            let current = self.stm.conflict_counter.count();
            if current == self.local_conflict_count {
                return Ok(());
            }
            self.local_conflict_count = current;
        } else if !self.flavor.is_lean()
            && self.entries.len() > self.config.maximum_poor_mans_conflict_scan_length
        {
            return self.speculative_failure(SpeculativeFailure::RichmansScanRequired);
        }

        let conflict = self
            .entries
            .iter()
            .enumerate()
            .any(|(i, entry)| i != latest && entry.owner.has_read_conflict(&entry.tranlocal));
        if conflict {
            return self.conflict(ConflictKind::InconsistentRead);
        }
        Ok(())
    }

    /// Load a ref that so far only collected commuting functions.
    fn materialize(&mut self, position: usize) -> TxnResult<()> {
        if self.entries[position].tranlocal.is_loaded() {
            return Ok(());
        }
        let owner = Arc::clone(&self.entries[position].owner);
        let lock_mode = self.config.read_lock_mode;
        let result = owner.load(
            &mut self.entries[position].tranlocal,
            self.config.spin_count,
            lock_mode,
            self.richmans_scan,
        );
        match result {
            Ok(conflict) => self.commit_conflict |= conflict,
            Err(_) => return self.conflict(ConflictKind::CommuteLoad),
        }
        let tranlocal = &mut self.entries[position].tranlocal;
        tranlocal.apply_commutes();
        tranlocal.mode = TranlocalMode::Write;
        tranlocal.write_skew_check = self.config.is_write_skew_checked();
        self.verify_reads(position)
    }

    fn acquire_lock(&mut self, position: usize, lock_mode: LockMode) -> TxnResult<()> {
        let owner = Arc::clone(&self.entries[position].owner);
        let mut commit_conflict = false;
        let result = owner.try_lock_and_check_conflict(
            &mut self.entries[position].tranlocal,
            self.config.spin_count,
            lock_mode,
            &mut commit_conflict,
        );
        self.commit_conflict |= commit_conflict;
        match result {
            Ok(()) => Ok(()),
            Err(kind) => self.conflict(kind),
        }
    }

    fn open_existing(&mut self, position: usize, lock_mode: LockMode) -> TxnResult<()> {
        self.materialize(position)?;
        if lock_mode > self.entries[position].tranlocal.lock_mode {
            self.acquire_lock(position, lock_mode)?;
        }
        Ok(())
    }

    /// Open `owner` for reading, locking at least `lock_mode`.
    pub(crate) fn open_for_read(
        &mut self,
        owner: &Arc<BaseRef>,
        lock_mode: LockMode,
    ) -> TxnResult<&mut Tranlocal> {
        self.check_open()?;
        self.check_owner(owner)?;
        let lock_mode = lock_mode.max(self.config.read_lock_mode);

        if !self.config.read_tracking_enabled
            && lock_mode == LockMode::None
            && self.find(owner).is_none()
        {
            let mut tranlocal = Tranlocal::unloaded(TranlocalMode::Read);
            if let Err(kind) = owner.load(&mut tranlocal, self.config.spin_count, LockMode::None, false)
            {
                return self.conflict(kind);
            }
            return Ok(self.untracked.insert(tranlocal));
        }

        let position = self.open_tracked(owner, lock_mode)?;
        Ok(&mut self.entries[position].tranlocal)
    }

    /// Open for reading and keep the read in the read set.
    fn open_tracked(&mut self, owner: &Arc<BaseRef>, lock_mode: LockMode) -> TxnResult<usize> {
        self.check_open()?;
        self.check_owner(owner)?;
        let lock_mode = lock_mode.max(self.config.read_lock_mode);
        if lock_mode != LockMode::None {
            self.require_fat()?;
        }

        if let Some(position) = self.find(owner) {
            self.open_existing(position, lock_mode)?;
            return Ok(position);
        }
        self.load_new(owner, lock_mode, TranlocalMode::Read)
    }

    /// Open `owner` for writing, locking at least `lock_mode`.
    pub(crate) fn open_for_write(
        &mut self,
        owner: &Arc<BaseRef>,
        lock_mode: LockMode,
    ) -> TxnResult<&mut Tranlocal> {
        self.check_open()?;
        self.check_owner(owner)?;
        if self.config.readonly {
            return self.fail(TxnError::ReadonlyViolation);
        }
        let lock_mode = lock_mode.max(self.config.write_lock_mode);
        if lock_mode != LockMode::None {
            self.require_fat()?;
        }

        let position = match self.find(owner) {
            Some(position) => {
                self.open_existing(position, lock_mode)?;
                position
            }
            None => self.load_new(owner, lock_mode, TranlocalMode::Write)?,
        };
        let tranlocal = &mut self.entries[position].tranlocal;
        tranlocal.upgrade_to_write();
        Ok(tranlocal)
    }

    /// Attach a ref created inside this transaction.
    pub(crate) fn open_for_construction(
        &mut self,
        owner: &Arc<BaseRef>,
        value: Payload,
    ) -> TxnResult<()> {
        self.check_open()?;
        self.check_owner(owner)?;
        if self.config.readonly {
            return self.fail(TxnError::ReadonlyViolation);
        }
        self.require_fat()?;
        self.ensure_capacity()?;
        self.push(owner, Tranlocal::constructed(value));
        Ok(())
    }

    /// Record a commuting function. A ref that is already loaded gets it
    /// applied right away; otherwise it runs at prepare under the lock.
    pub(crate) fn open_for_commute(
        &mut self,
        owner: &Arc<BaseRef>,
        function: CommuteFn,
    ) -> TxnResult<()> {
        self.check_open()?;
        self.check_owner(owner)?;
        if self.config.readonly {
            return self.fail(TxnError::ReadonlyViolation);
        }
        self.require_fat()?;

        if let Some(position) = self.find(owner) {
            let tranlocal = &mut self.entries[position].tranlocal;
            if tranlocal.is_loaded() {
                let current = tranlocal.value.clone();
                tranlocal.value = function(current);
                tranlocal.upgrade_to_write();
            } else {
                tranlocal.commutes.push(function);
            }
            return Ok(());
        }

        self.ensure_capacity()?;
        let mut tranlocal = Tranlocal::unloaded(TranlocalMode::Commute);
        tranlocal.commutes.push(function);
        self.push(owner, tranlocal);
        Ok(())
    }

    /// Read `owner` and verify at commit that it didn't change.
    pub(crate) fn ensure(&mut self, owner: &Arc<BaseRef>) -> TxnResult<()> {
        self.check_open()?;
        self.require_fat()?;
        let position = self.open_tracked(owner, LockMode::None)?;
        self.entries[position].tranlocal.write_skew_check = true;
        Ok(())
    }

    /// Lock held on `owner` by this transaction.
    pub(crate) fn lock_mode_of(&self, owner: &Arc<BaseRef>) -> LockMode {
        self.find(owner)
            .map(|position| self.entries[position].tranlocal.lock_mode)
            .unwrap_or(LockMode::None)
    }

    /// The value this transaction sees for `owner`, if it opened it.
    pub(crate) fn peek(&self, owner: &Arc<BaseRef>) -> Option<&Tranlocal> {
        self.find(owner)
            .map(|position| &self.entries[position].tranlocal)
            .filter(|tranlocal| tranlocal.is_loaded())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Attach a listener to this attempt.
    pub fn register<L: TxnListener + 'static>(&mut self, listener: L) -> TxnResult<()> {
        self.check_open()?;
        self.require_fat()?;
        self.listeners.push(Box::new(listener));
        Ok(())
    }

    fn notify(&mut self, event: TxnEvent) {
        for listener in self.listeners.iter_mut() {
            listener.notify(event);
        }
    }

    /// Make every later commit attempt fail with `AbortOnly`.
    pub fn set_abort_only(&mut self) -> TxnResult<()> {
        if !self.status.is_alive() {
            return Err(TxnError::DeadTxn {
                status: self.status,
            });
        }
        self.require_fat()?;
        self.abort_only = true;
        Ok(())
    }

    /// Lock everything that will be written and verify guarded reads.
    ///
    /// On failure the transaction is aborted.
    pub fn prepare(&mut self) -> TxnResult<()> {
        match self.status {
            TxnStatus::Active => {}
            TxnStatus::Prepared => return Ok(()),
            status => return Err(TxnError::DeadTxn { status }),
        }

        self.notify(TxnEvent::PrePrepare);
        if self.abort_only {
            return self.fail(TxnError::AbortOnly);
        }

        let mut commit_conflict = false;
        let mut failure = None;
        for entry in self.entries.iter_mut() {
            if let Err(kind) = entry
                .owner
                .prepare(&mut entry.tranlocal, &self.config, &mut commit_conflict)
            {
                failure = Some(kind);
                break;
            }
        }
        self.commit_conflict |= commit_conflict;
        if let Some(kind) = failure {
            return self.conflict(kind);
        }

        self.status = TxnStatus::Prepared;
        Ok(())
    }

    /// Prepare if needed and publish every write. Committing twice is a
    /// no-op.
    pub fn commit(&mut self) -> TxnResult<()> {
        match self.status {
            TxnStatus::Committed => return Ok(()),
            TxnStatus::Aborted => {
                return Err(TxnError::DeadTxn {
                    status: TxnStatus::Aborted,
                })
            }
            TxnStatus::Active => self.prepare()?,
            TxnStatus::Prepared => {
                if self.abort_only {
                    return self.fail(TxnError::AbortOnly);
                }
            }
        }

        if self.commit_conflict {
            self.stm.conflict_counter.signal_conflict();
        }

        let mut woken: Option<Listeners> = None;
        for entry in self.entries.iter_mut() {
            entry.owner.commit(&mut entry.tranlocal, &mut woken);
        }
        self.entries.clear();
        self.index.clear();
        self.untracked = None;
        self.status = TxnStatus::Committed;

        if let Some(listeners) = woken {
            listeners.open_all();
        }
        self.notify(TxnEvent::PostCommit);
        Ok(())
    }

    /// Release everything and end the attempt. Aborting twice is a no-op;
    /// aborting a committed transaction is an error.
    pub fn abort(&mut self) -> TxnResult<()> {
        match self.status {
            TxnStatus::Aborted => Ok(()),
            TxnStatus::Committed => Err(TxnError::DeadTxn {
                status: TxnStatus::Committed,
            }),
            TxnStatus::Active | TxnStatus::Prepared => {
                self.release_all_after_failure();
                Ok(())
            }
        }
    }

    fn release_all_after_failure(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.owner.release_after_failure(&mut entry.tranlocal);
        }
        self.entries.clear();
        self.index.clear();
        self.untracked = None;
        self.status = TxnStatus::Aborted;
        debug!(family = %self.config.family_name, attempt = self.attempt, "transaction aborted");
        self.notify(TxnEvent::PostAbort);
    }

    /// Ask the executor to block until one of the refs read so far changes.
    ///
    /// Always returns an error: `Retry` when blocking is possible, otherwise
    /// the reason it isn't (after aborting).
    pub fn retry<T>(&mut self) -> TxnResult<T> {
        self.check_open()?;
        if !self.config.blocking_allowed {
            return self.fail(TxnError::RetryNotAllowed);
        }
        let watchable = self.entries.iter().any(|entry| {
            entry.tranlocal.is_loaded() && entry.tranlocal.mode != TranlocalMode::Construction
        });
        if !watchable {
            return self.fail(TxnError::RetryNotPossible);
        }
        Err(TxnError::Retry)
    }

    /// Register the retry latch on every tracked read, then abort.
    ///
    /// Returns the latch and the era to park on, or `RetryNotPossible`
    /// when no read could be watched.
    pub(crate) fn register_retry_and_abort(&mut self) -> TxnResult<(Arc<RetryLatch>, u64)> {
        let latch = Arc::clone(&self.retry_latch);
        latch.reset();
        let era = latch.era();
        let mut registered = 0usize;
        for entry in self.entries.iter() {
            match entry
                .owner
                .register_change_listener(&latch, &entry.tranlocal, era)
            {
                Registration::Done => registered += 1,
                Registration::NotNeeded => {
                    registered += 1;
                    break;
                }
                Registration::None => {}
            }
        }
        self.abort_quietly();
        if registered == 0 {
            return Err(TxnError::RetryNotPossible);
        }
        debug!(
            family = %self.config.family_name,
            attempt = self.attempt,
            refs = registered,
            "blocking retry registered"
        );
        Ok((latch, era))
    }

    pub(crate) fn interrupt_token(&self) -> Option<&InterruptToken> {
        self.interrupt.as_ref()
    }

    /// Human readable summary of what this attempt holds.
    pub fn to_debug_string(&self) -> String {
        format!(
            "GammaTxn(family={}, flavor={}, status={}, attempt={}, refs={})",
            self.config.family_name,
            self.flavor,
            self.status,
            self.attempt,
            self.entries.len()
        )
    }
}

impl Drop for GammaTxn {
    fn drop(&mut self) {
        self.abort_quietly();
        pool::release(std::mem::take(&mut self.entries));
    }
}

impl fmt::Debug for GammaTxn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GammaTxn")
            .field("family", &self.config.family_name)
            .field("flavor", &self.flavor)
            .field("status", &self.status)
            .field("attempt", &self.attempt)
            .field("refs", &self.entries.len())
            .field("richmans_scan", &self.richmans_scan)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{GammaStm, TxnEvent, TxnFlavor};
    use gammastm_core::{ConflictKind, SpeculativeFailure, TxnError, TxnStatus};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn commit_and_abort_are_idempotent() {
        let stm = GammaStm::new();
        let value = stm.new_long_ref(1);

        let mut txn = stm.new_default_txn();
        value.set(&mut txn, 2).unwrap();
        txn.commit().unwrap();
        txn.commit().unwrap();
        assert!(matches!(
            txn.abort(),
            Err(TxnError::DeadTxn { status: TxnStatus::Committed })
        ));
        assert!(matches!(value.get(&mut txn), Err(TxnError::DeadTxn { .. })));

        let mut txn = stm.new_default_txn();
        txn.abort().unwrap();
        txn.abort().unwrap();
        assert!(matches!(
            txn.commit(),
            Err(TxnError::DeadTxn { status: TxnStatus::Aborted })
        ));
    }

    #[test]
    fn opening_after_prepare_aborts() {
        let stm = GammaStm::new();
        let value = stm.new_long_ref(1);
        let mut txn = stm.new_default_txn();
        value.set(&mut txn, 5).unwrap();
        txn.prepare().unwrap();
        assert_eq!(txn.status(), TxnStatus::Prepared);

        assert!(matches!(value.get(&mut txn), Err(TxnError::PreparedTxn)));
        assert_eq!(txn.status(), TxnStatus::Aborted);
        assert_eq!(value.atomic_get().unwrap(), 1);
        assert!(value.orec_state().is_idle());
    }

    #[test]
    fn ref_of_other_stm_is_rejected() {
        let a = GammaStm::new();
        let b = GammaStm::new();
        let foreign = b.new_long_ref(0);
        let mut txn = a.new_default_txn();
        assert!(matches!(foreign.get(&mut txn), Err(TxnError::StmMismatch)));
        assert_eq!(txn.status(), TxnStatus::Aborted);
    }

    #[test]
    fn abort_only_refuses_to_commit() {
        let stm = GammaStm::new();
        let value = stm.new_long_ref(1);
        let mut txn = stm.new_default_txn();
        value.set(&mut txn, 3).unwrap();
        txn.set_abort_only().unwrap();
        assert!(txn.is_abort_only());
        assert!(matches!(txn.commit(), Err(TxnError::AbortOnly)));
        assert_eq!(value.atomic_get().unwrap(), 1);
    }

    #[test]
    fn lean_flavor_rejects_fat_features() {
        let stm = GammaStm::new();
        let factory = stm.new_txn_factory_builder().build().unwrap();
        let mut txn = factory.new_txn();
        assert_eq!(txn.flavor(), TxnFlavor::LeanMono);
        assert!(matches!(
            txn.set_abort_only(),
            Err(TxnError::SpeculativeConfiguration(SpeculativeFailure::FatRequired))
        ));
        assert_eq!(factory.speculative_flavor(), TxnFlavor::FatMono);
    }

    #[test]
    fn mono_flavor_overflows_into_fixed_length() {
        let stm = GammaStm::new();
        let factory = stm.new_txn_factory_builder().build().unwrap();
        let a = stm.new_long_ref(1);
        let b = stm.new_long_ref(2);

        let mut txn = factory.new_txn();
        a.get(&mut txn).unwrap();
        assert!(matches!(
            b.get(&mut txn),
            Err(TxnError::SpeculativeConfiguration(SpeculativeFailure::SizeExceeded {
                required: 2
            }))
        ));
        assert_eq!(factory.speculative_flavor(), TxnFlavor::LeanFixedLength);
    }

    #[test]
    fn fat_read_set_past_scan_limit_switches_to_richmans_scan() {
        let stm = GammaStm::builder()
            .maximum_poor_mans_conflict_scan_length(2)
            .build()
            .unwrap();
        let factory = stm
            .new_txn_factory_builder()
            .force_fat(true)
            .build()
            .unwrap();
        let refs: Vec<_> = (0..3).map(|i| stm.new_long_ref(i)).collect();

        let mut txn = factory.new_txn();
        assert_eq!(txn.flavor(), TxnFlavor::FatMono);
        refs[0].get(&mut txn).unwrap();
        assert!(matches!(
            refs[1].get(&mut txn),
            Err(TxnError::SpeculativeConfiguration(SpeculativeFailure::SizeExceeded { .. }))
        ));

        txn.restart(false);
        assert_eq!(txn.flavor(), TxnFlavor::FatFixedLength);
        assert!(!txn.is_richmans_scan());
        refs[0].get(&mut txn).unwrap();
        refs[1].get(&mut txn).unwrap();
        assert!(matches!(
            refs[2].get(&mut txn),
            Err(TxnError::SpeculativeConfiguration(
                SpeculativeFailure::RichmansScanRequired
            ))
        ));

        txn.restart(false);
        assert!(txn.is_richmans_scan());
        let total: i64 = refs.iter().map(|r| r.get(&mut txn).unwrap()).sum();
        assert_eq!(total, 3);
        txn.commit().unwrap();
        assert_eq!(txn.attempt(), 1);
        assert!(refs.iter().all(|r| r.orec_state().is_idle()));
    }

    #[test]
    fn richmans_scan_detects_inconsistent_read() {
        let stm = GammaStm::new();
        let a = stm.new_long_ref(1);
        let b = stm.new_long_ref(1);

        let mut txn = stm.new_default_txn();
        assert_eq!(a.get(&mut txn).unwrap(), 1);
        a.atomic_set(2).unwrap();
        assert!(matches!(
            b.get(&mut txn),
            Err(TxnError::ReadWriteConflict(ConflictKind::InconsistentRead))
        ));
        assert_eq!(txn.status(), TxnStatus::Aborted);
        assert!(a.orec_state().is_idle());
        assert!(b.orec_state().is_idle());
    }

    #[test]
    fn listeners_see_lifecycle_events() {
        let stm = GammaStm::new();
        let value = stm.new_long_ref(0);
        let events = Arc::new(Mutex::new(Vec::new()));

        let mut txn = stm.new_default_txn();
        let sink = Arc::clone(&events);
        txn.register(move |event: TxnEvent| sink.lock().push(event))
            .unwrap();
        value.set(&mut txn, 1).unwrap();
        txn.commit().unwrap();
        assert_eq!(*events.lock(), vec![TxnEvent::PrePrepare, TxnEvent::PostCommit]);

        events.lock().clear();
        let mut txn = stm.new_default_txn();
        let sink = Arc::clone(&events);
        txn.register(move |event: TxnEvent| sink.lock().push(event))
            .unwrap();
        drop(txn);
        assert_eq!(*events.lock(), vec![TxnEvent::PostAbort]);
    }

    #[test]
    fn dropping_an_active_txn_releases_locks() {
        let stm = GammaStm::new();
        let value = stm.new_long_ref(0);
        {
            let mut txn = stm.new_default_txn();
            value.set_and_lock(&mut txn, 1, gammastm_core::LockMode::Exclusive).unwrap();
            assert!(value.orec_state().has_exclusive_lock());
        }
        assert!(value.orec_state().is_idle());
        assert_eq!(value.atomic_get().unwrap(), 0);
    }
}
