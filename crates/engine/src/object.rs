//! The transactional object behind every ref
//!
//! `BaseRef` is type-erased: it stores either a 64-bit word or a shared
//! object pointer, next to its orec and version. The typed handles in
//! `refs` translate between their element type and `Payload`.
//!
//! # Publication
//!
//! A value is only ever published by a thread holding the exclusive lock:
//! it stores the payload, bumps the version and then releases the orec.
//! Optimistic readers read version, payload, orec and version again, and
//! accept the payload only if both versions match and no exclusive lock was
//! in the way.
//!
//! Object payloads live behind a `crossbeam_epoch::Atomic`; a replaced
//! value is destroyed once every reader pinned at the time has moved on.

use crate::payload::{ObjectValue, Payload};
use crate::stm::StmShared;
use crate::tranlocal::{Tranlocal, TranlocalMode};
use crossbeam_epoch::{self as epoch, Atomic, Owned};
use gammastm_concurrency::{
    ArriveStatus, ListenerRegistry, Listeners, Orec, OrecState, Registration, RetryLatch,
};
use gammastm_core::{ConflictKind, LockMode, TxnConfig, TxnError, TxnResult};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Version of a ref created outside a transaction.
pub(crate) const INITIAL_VERSION: u64 = 1;

/// Version of a ref whose constructing transaction hasn't committed.
pub(crate) const UNCOMMITTED_VERSION: u64 = 0;

enum Cell {
    Word(AtomicU64),
    Object(Atomic<ObjectValue>),
}

/// Result of an atomic read-modify-write.
pub(crate) struct AtomicOutcome {
    pub(crate) old: Payload,
    pub(crate) new: Payload,
    pub(crate) applied: bool,
}

pub(crate) struct BaseRef {
    pub(crate) orec: Orec,
    version: AtomicU64,
    cell: Cell,
    kind: &'static str,
    listeners: ListenerRegistry,
    pub(crate) stm: Arc<StmShared>,
}

impl BaseRef {
    /// Committed ref holding `value`.
    pub(crate) fn new(stm: &Arc<StmShared>, value: Payload, kind: &'static str) -> Self {
        BaseRef {
            orec: Orec::new(stm.read_biased_threshold()),
            version: AtomicU64::new(INITIAL_VERSION),
            cell: Cell::from_payload(value),
            kind,
            listeners: ListenerRegistry::new(),
            stm: Arc::clone(stm),
        }
    }

    /// Ref under construction: exclusively locked and unpublished until the
    /// constructing transaction commits.
    pub(crate) fn new_constructing(stm: &Arc<StmShared>, value: Payload, kind: &'static str) -> Self {
        BaseRef {
            orec: Orec::new_constructing(stm.read_biased_threshold()),
            version: AtomicU64::new(UNCOMMITTED_VERSION),
            cell: Cell::from_payload(value),
            kind,
            listeners: ListenerRegistry::new(),
            stm: Arc::clone(stm),
        }
    }

    /// Identity used to index the ref inside a transaction.
    #[inline]
    pub(crate) fn key(this: &Arc<BaseRef>) -> usize {
        Arc::as_ptr(this) as usize
    }

    pub(crate) fn kind(&self) -> &'static str {
        self.kind
    }

    #[inline]
    pub(crate) fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub(crate) fn orec_state(&self) -> OrecState {
        self.orec.state()
    }

    // =========================================================================
    // Payload access
    // =========================================================================

    /// Current payload, without any consistency check.
    pub(crate) fn load_payload(&self) -> Payload {
        match &self.cell {
            Cell::Word(word) => Payload::Word(word.load(Ordering::Acquire)),
            Cell::Object(atomic) => {
                let guard = epoch::pin();
                let shared = atomic.load(Ordering::Acquire, &guard);
                // SAFETY: the pointer was created from an `Owned` and is only
                // retired through `defer_destroy`, so it stays valid while
                // `guard` is pinned.
                match unsafe { shared.as_ref() } {
                    Some(value) => Payload::Object(Arc::clone(value)),
                    None => missing_object(self.kind),
                }
            }
        }
    }

    /// Store `payload`. Caller holds the exclusive lock.
    fn publish(&self, payload: &Payload) {
        match &self.cell {
            Cell::Word(word) => word.store(payload.word(), Ordering::Release),
            Cell::Object(atomic) => {
                let guard = epoch::pin();
                let replaced = atomic.swap(
                    Owned::new(Arc::clone(payload.object())),
                    Ordering::AcqRel,
                    &guard,
                );
                if !replaced.is_null() {
                    // SAFETY: `replaced` is unreachable from the cell now;
                    // readers still holding it are pinned and will be done
                    // before the epoch advances past them.
                    unsafe { guard.defer_destroy(replaced) };
                }
            }
        }
    }

    /// Publish the next version. Caller holds the exclusive lock.
    fn bump_version(&self) {
        let next = self.version.load(Ordering::Relaxed) + 1;
        self.version.store(next, Ordering::SeqCst);
    }

    // =========================================================================
    // Transactional loads
    // =========================================================================

    /// Load into `tranlocal`, optionally locking and optionally arriving.
    ///
    /// Returns whether an exclusive lock was taken over concurrent
    /// arrivals, which the transaction must turn into a global conflict
    /// signal at commit.
    pub(crate) fn load(
        &self,
        tranlocal: &mut Tranlocal,
        spin_count: u32,
        lock_mode: LockMode,
        arrive_needed: bool,
    ) -> Result<bool, ConflictKind> {
        if lock_mode != LockMode::None {
            let status = self.orec.arrive_and_lock(spin_count, lock_mode);
            if status.is_failure() {
                return Err(ConflictKind::LockNotFree);
            }
            let value = self.load_payload();
            tranlocal.version = self.version();
            tranlocal.old_value = value.clone();
            tranlocal.value = value;
            tranlocal.lock_mode = lock_mode;
            tranlocal.has_depart_obligation = !status.is_unregistered();
            return Ok(status.has_conflict());
        }

        loop {
            let version = self.version();
            let value = self.load_payload();

            let registered = if arrive_needed {
                let status = self.orec.arrive(spin_count);
                if status.is_failure() {
                    return Err(ConflictKind::LockNotFree);
                }
                !status.is_unregistered()
            } else {
                if !self.orec.wait_for_exclusive_lock_to_become_free(spin_count) {
                    return Err(ConflictKind::LockNotFree);
                }
                false
            };

            if self.version() == version {
                tranlocal.version = version;
                tranlocal.old_value = value.clone();
                tranlocal.value = value;
                tranlocal.lock_mode = LockMode::None;
                tranlocal.has_depart_obligation = registered;
                return Ok(false);
            }

            if registered {
                self.orec.depart_after_failure();
            }
        }
    }

    /// Whether a tracked, unlocked read may have been invalidated.
    pub(crate) fn has_read_conflict(&self, tranlocal: &Tranlocal) -> bool {
        if !tranlocal.is_loaded()
            || tranlocal.mode == TranlocalMode::Construction
            || tranlocal.lock_mode != LockMode::None
        {
            return false;
        }
        if self.orec.state().has_exclusive_lock() {
            return true;
        }
        tranlocal.version != self.version()
    }

    // =========================================================================
    // Commit protocol
    // =========================================================================

    /// Acquire `desired` for a loaded tranlocal and make sure the value it
    /// saw is still current.
    pub(crate) fn try_lock_and_check_conflict(
        &self,
        tranlocal: &mut Tranlocal,
        spin_count: u32,
        desired: LockMode,
        commit_conflict: &mut bool,
    ) -> Result<(), ConflictKind> {
        match tranlocal.lock_mode {
            current if current >= desired => Ok(()),
            LockMode::Read => {
                let status = self
                    .orec
                    .upgrade_read_lock(spin_count, desired == LockMode::Exclusive);
                if status.is_failure() {
                    return Err(ConflictKind::LockNotFree);
                }
                if status.has_conflict() {
                    *commit_conflict = true;
                }
                tranlocal.lock_mode = desired;
                Ok(())
            }
            LockMode::Write => {
                if self.orec.upgrade_write_lock() {
                    *commit_conflict = true;
                }
                tranlocal.lock_mode = LockMode::Exclusive;
                Ok(())
            }
            LockMode::Exclusive => Ok(()),
            LockMode::None => {
                let status = if tranlocal.has_depart_obligation {
                    self.orec.lock_after_arrive(spin_count, desired)
                } else {
                    self.orec.arrive_and_lock(spin_count, desired)
                };
                if status.is_failure() {
                    return Err(ConflictKind::LockNotFree);
                }
                if !tranlocal.has_depart_obligation {
                    tranlocal.has_depart_obligation = !status.is_unregistered();
                }
                tranlocal.lock_mode = desired;
                if status.has_conflict() {
                    *commit_conflict = true;
                }
                if tranlocal.version != self.version() {
                    return Err(ConflictKind::VersionChanged);
                }
                Ok(())
            }
        }
    }

    /// Make `tranlocal` ready to commit: evaluate pending commutes, decide
    /// dirtiness, lock what will be written and verify guarded reads.
    pub(crate) fn prepare(
        &self,
        tranlocal: &mut Tranlocal,
        config: &TxnConfig,
        commit_conflict: &mut bool,
    ) -> Result<(), ConflictKind> {
        let spin_count = config.spin_count;
        match tranlocal.mode {
            TranlocalMode::Construction => Ok(()),
            TranlocalMode::Read => {
                if tranlocal.write_skew_check {
                    self.try_lock_and_check_conflict(
                        tranlocal,
                        spin_count,
                        LockMode::Read,
                        commit_conflict,
                    )
                } else {
                    Ok(())
                }
            }
            TranlocalMode::Commute => {
                let conflict = self
                    .load(tranlocal, spin_count, LockMode::Exclusive, true)
                    .map_err(|_| ConflictKind::CommuteLoad)?;
                if conflict {
                    *commit_conflict = true;
                }
                tranlocal.apply_commutes();
                tranlocal.mode = TranlocalMode::Write;
                tranlocal.is_dirty =
                    !config.dirty_check_enabled || !tranlocal.value.same(&tranlocal.old_value);
                Ok(())
            }
            TranlocalMode::Write => {
                tranlocal.is_dirty =
                    !config.dirty_check_enabled || !tranlocal.value.same(&tranlocal.old_value);
                if tranlocal.is_dirty {
                    self.try_lock_and_check_conflict(
                        tranlocal,
                        spin_count,
                        LockMode::Exclusive,
                        commit_conflict,
                    )
                } else if tranlocal.write_skew_check {
                    self.try_lock_and_check_conflict(
                        tranlocal,
                        spin_count,
                        LockMode::Read,
                        commit_conflict,
                    )
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Publish a prepared tranlocal, or just release it when it is clean.
    ///
    /// Listeners detached by the update are appended to `woken`; they are
    /// opened by the transaction once every orec is released.
    pub(crate) fn commit(&self, tranlocal: &mut Tranlocal, woken: &mut Option<Listeners>) {
        if !(tranlocal.is_write() && tranlocal.is_dirty) {
            self.release_after_reading(tranlocal);
            return;
        }
        debug_assert_eq!(tranlocal.lock_mode, LockMode::Exclusive);

        self.publish(&tranlocal.value);
        self.bump_version();
        if let Some(listeners) = self.listeners.take() {
            match woken {
                Some(all) => all.append(listeners),
                None => *woken = Some(listeners),
            }
        }
        self.orec.depart_after_update_and_unlock();
        reset(tranlocal);
    }

    /// Undo the arrival and lock of a tranlocal that only read.
    pub(crate) fn release_after_reading(&self, tranlocal: &mut Tranlocal) {
        match (tranlocal.lock_mode, tranlocal.has_depart_obligation) {
            (LockMode::None, true) => self.orec.depart_after_reading(),
            (LockMode::None, false) => {}
            (_, true) => self.orec.depart_after_reading_and_unlock(),
            (_, false) => self.orec.unlock_by_unregistered(),
        }
        reset(tranlocal);
    }

    /// Undo the arrival and lock of a tranlocal of an aborted transaction.
    ///
    /// A ref constructed by the aborted transaction keeps its exclusive lock
    /// and never becomes visible.
    pub(crate) fn release_after_failure(&self, tranlocal: &mut Tranlocal) {
        if tranlocal.mode == TranlocalMode::Construction {
            reset(tranlocal);
            return;
        }
        match (tranlocal.lock_mode, tranlocal.has_depart_obligation) {
            (LockMode::None, true) => self.orec.depart_after_failure(),
            (LockMode::None, false) => {}
            (_, true) => self.orec.depart_after_failure_and_unlock(),
            (_, false) => self.orec.unlock_by_unregistered(),
        }
        reset(tranlocal);
    }

    /// Register `latch` to be opened by the next update of this ref.
    pub(crate) fn register_change_listener(
        &self,
        latch: &Arc<RetryLatch>,
        tranlocal: &Tranlocal,
        era: u64,
    ) -> Registration {
        if !tranlocal.is_loaded() || tranlocal.mode == TranlocalMode::Construction {
            return Registration::None;
        }
        let observed = tranlocal.version;
        self.listeners
            .register(latch, era, || self.version.load(Ordering::SeqCst) == observed)
    }

    // =========================================================================
    // Atomic operations
    // =========================================================================

    fn arrive_and_exclusive_lock_or_backoff(&self) -> TxnResult<ArriveStatus> {
        let max_attempts = self.stm.config.default_max_retries;
        let spin_count = self.stm.spin_count();
        for attempt in 1..=max_attempts {
            let status = self.orec.arrive_and_lock(spin_count, LockMode::Exclusive);
            if status.is_success() {
                return Ok(status);
            }
            self.stm.backoff.delay_uninterruptible(attempt);
        }
        Err(TxnError::Locked {
            attempts: max_attempts,
        })
    }

    /// Consistent read without a transaction.
    pub(crate) fn atomic_load(&self) -> TxnResult<Payload> {
        let max_attempts = self.stm.config.default_max_retries;
        let spin_count = self.stm.spin_count();
        for attempt in 1..=max_attempts {
            let version = self.version();
            let value = self.load_payload();
            if self.orec.wait_for_exclusive_lock_to_become_free(spin_count)
                && self.version() == version
            {
                return Ok(value);
            }
            self.stm.backoff.delay_uninterruptible(attempt);
        }
        Err(TxnError::Locked {
            attempts: max_attempts,
        })
    }

    /// Read-modify-write under the exclusive lock.
    ///
    /// `update` returns `None` to leave the ref alone. An update that yields
    /// the same value is not published: no version bump, no conflict signal.
    pub(crate) fn atomic_modify<F>(&self, update: F) -> TxnResult<AtomicOutcome>
    where
        F: FnOnce(&Payload) -> Option<Payload>,
    {
        let status = self.arrive_and_exclusive_lock_or_backoff()?;
        let mut lock = ExclusiveLockGuard {
            orec: &self.orec,
            registered: !status.is_unregistered(),
            held: true,
        };

        let old = self.load_payload();
        let new = match update(&old) {
            Some(new) => new,
            None => {
                lock.release_unchanged();
                return Ok(AtomicOutcome {
                    new: old.clone(),
                    old,
                    applied: false,
                });
            }
        };

        if new.same(&old) {
            lock.release_unchanged();
            return Ok(AtomicOutcome {
                old,
                new,
                applied: true,
            });
        }

        if status.has_conflict() {
            self.stm.conflict_counter.signal_conflict();
        }
        self.publish(&new);
        self.bump_version();
        let listeners = self.listeners.take();
        lock.release_updated();
        if let Some(listeners) = listeners {
            listeners.open_all();
        }

        Ok(AtomicOutcome {
            old,
            new,
            applied: true,
        })
    }
}

impl Drop for BaseRef {
    fn drop(&mut self) {
        if let Cell::Object(atomic) = &self.cell {
            // SAFETY: `&mut self` guarantees no other thread can reach the
            // cell anymore, so the current pointer can be reclaimed at once.
            unsafe {
                let current = atomic.load(Ordering::Relaxed, epoch::unprotected());
                if !current.is_null() {
                    drop(current.into_owned());
                }
            }
        }
    }
}

impl fmt::Debug for BaseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseRef")
            .field("kind", &self.kind)
            .field("version", &self.version())
            .field("orec", &self.orec.state())
            .finish()
    }
}

impl Cell {
    fn from_payload(value: Payload) -> Self {
        match value {
            Payload::Word(word) => Cell::Word(AtomicU64::new(word)),
            Payload::Object(object) => Cell::Object(Atomic::new(object)),
        }
    }
}

/// Releases the exclusive lock of an atomic operation, also when the
/// update function panics.
struct ExclusiveLockGuard<'a> {
    orec: &'a Orec,
    registered: bool,
    held: bool,
}

impl ExclusiveLockGuard<'_> {
    fn release_unchanged(&mut self) {
        self.held = false;
        if self.registered {
            self.orec.depart_after_reading_and_unlock();
        } else {
            self.orec.unlock_by_unregistered();
        }
    }

    fn release_updated(&mut self) {
        self.held = false;
        self.orec.depart_after_update_and_unlock();
    }
}

impl Drop for ExclusiveLockGuard<'_> {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        if self.registered {
            self.orec.depart_after_failure_and_unlock();
        } else {
            self.orec.unlock_by_unregistered();
        }
    }
}

fn reset(tranlocal: &mut Tranlocal) {
    tranlocal.lock_mode = LockMode::None;
    tranlocal.has_depart_obligation = false;
    tranlocal.is_dirty = false;
    tranlocal.commutes.clear();
}

#[cold]
#[inline(never)]
fn missing_object(kind: &str) -> ! {
    panic!("object ref of {} has no value", kind)
}
