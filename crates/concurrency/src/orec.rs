//! Ownership record (orec)
//!
//! One 64-bit word per transactional object carries every piece of shared
//! concurrency-control state. All transitions are a single CAS of the whole
//! word; no field is ever written on its own.
//!
//! ## Layout (most significant bit first)
//!
//! ```text
//! 63        exclusive lock
//! 62        write lock
//! 61        read biased
//! 60..40    read lock count     (21 bits)
//! 39..10    surplus             (30 bits)
//!  9..0     readonly streak     (10 bits)
//! ```
//!
//! ## Surplus
//!
//! The surplus counts arrivals that still owe a departure. While an orec is
//! update biased every arrival is tracked. Once enough consecutive readonly
//! departures have happened the orec flips to read biased: from then on a
//! single arrival stands in for any number of untracked readers, so surplus
//! never exceeds 1 and arrivals report `UNREGISTERED` (no departure owed).
//! The first update departure flips the orec back.
//!
//! ## Entry and exit pairing
//!
//! | Entry | Exit on success | Exit on failure |
//! |-------|-----------------|-----------------|
//! | `arrive` (registered) | `depart_after_reading` | `depart_after_failure` |
//! | `arrive_and_lock` / `lock_after_arrive` (registered) | `depart_after_reading_and_unlock` / `depart_after_update_and_unlock` | `depart_after_failure_and_unlock` |
//! | any lock taken while `UNREGISTERED` | `unlock_by_unregistered` / `depart_after_update_and_unlock` | `unlock_by_unregistered` |
//!
//! Calling an exit that doesn't match the entry is an engine bug and panics.

use gammastm_core::LockMode;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

const MASK_EXCLUSIVE_LOCK: u64 = 0x8000_0000_0000_0000;
const MASK_WRITE_LOCK: u64 = 0x4000_0000_0000_0000;
const MASK_READ_BIASED: u64 = 0x2000_0000_0000_0000;
const MASK_READ_LOCKS: u64 = 0x1FFF_FF00_0000_0000;
const MASK_SURPLUS: u64 = 0x0000_00FF_FFFF_FC00;
const MASK_READONLY_COUNT: u64 = 0x0000_0000_0000_03FF;

const SHIFT_READ_LOCKS: u32 = 40;
const SHIFT_SURPLUS: u32 = 10;

/// Largest read lock count the word can hold.
pub const MAX_READ_LOCKS: u32 = (MASK_READ_LOCKS >> SHIFT_READ_LOCKS) as u32;
/// Largest surplus the word can hold.
pub const MAX_SURPLUS: u64 = MASK_SURPLUS >> SHIFT_SURPLUS;
/// Largest readonly streak, and therefore the largest read-biased threshold.
pub const MAX_READ_BIASED_THRESHOLD: u32 = MASK_READONLY_COUNT as u32;

/// Spins between scheduler yields while waiting on a lock.
const SPIN_YIELD: i64 = 32;

/// Decoded snapshot of an orec word.
///
/// Getters are public; setters only exist inside this module so the word
/// can't be changed other than through the orec operations.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OrecState(u64);

impl OrecState {
    /// Raw word, for diagnostics.
    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Exclusive lock bit.
    #[inline]
    pub fn has_exclusive_lock(&self) -> bool {
        self.0 & MASK_EXCLUSIVE_LOCK != 0
    }

    /// Write lock bit.
    #[inline]
    pub fn has_write_lock(&self) -> bool {
        self.0 & MASK_WRITE_LOCK != 0
    }

    /// Number of read locks held.
    #[inline]
    pub fn read_lock_count(&self) -> u32 {
        ((self.0 & MASK_READ_LOCKS) >> SHIFT_READ_LOCKS) as u32
    }

    /// Any lock held, read locks included.
    #[inline]
    pub fn has_any_lock(&self) -> bool {
        self.0 & (MASK_EXCLUSIVE_LOCK | MASK_WRITE_LOCK | MASK_READ_LOCKS) != 0
    }

    /// Write or exclusive lock held.
    #[inline]
    pub fn has_write_or_exclusive_lock(&self) -> bool {
        self.0 & (MASK_EXCLUSIVE_LOCK | MASK_WRITE_LOCK) != 0
    }

    /// Read-biased flag.
    #[inline]
    pub fn is_read_biased(&self) -> bool {
        self.0 & MASK_READ_BIASED != 0
    }

    /// Number of arrivals that haven't departed.
    #[inline]
    pub fn surplus(&self) -> u64 {
        (self.0 & MASK_SURPLUS) >> SHIFT_SURPLUS
    }

    /// Consecutive readonly departures.
    #[inline]
    pub fn readonly_count(&self) -> u32 {
        (self.0 & MASK_READONLY_COUNT) as u32
    }

    /// The strongest lock currently held by anybody.
    pub fn lock_mode(&self) -> LockMode {
        if self.has_exclusive_lock() {
            LockMode::Exclusive
        } else if self.has_write_lock() {
            LockMode::Write
        } else if self.read_lock_count() > 0 {
            LockMode::Read
        } else {
            LockMode::None
        }
    }

    /// No locks, no surplus.
    pub fn is_idle(&self) -> bool {
        !self.has_any_lock() && self.surplus() == 0
    }

    #[inline]
    fn with_exclusive_lock(self, locked: bool) -> Self {
        if locked {
            OrecState(self.0 | MASK_EXCLUSIVE_LOCK)
        } else {
            OrecState(self.0 & !MASK_EXCLUSIVE_LOCK)
        }
    }

    #[inline]
    fn with_write_lock(self, locked: bool) -> Self {
        if locked {
            OrecState(self.0 | MASK_WRITE_LOCK)
        } else {
            OrecState(self.0 & !MASK_WRITE_LOCK)
        }
    }

    #[inline]
    fn with_read_biased(self, biased: bool) -> Self {
        if biased {
            OrecState(self.0 | MASK_READ_BIASED)
        } else {
            OrecState(self.0 & !MASK_READ_BIASED)
        }
    }

    #[inline]
    fn with_read_lock_count(self, count: u32) -> Self {
        debug_assert!(count <= MAX_READ_LOCKS);
        OrecState((self.0 & !MASK_READ_LOCKS) | ((count as u64) << SHIFT_READ_LOCKS))
    }

    #[inline]
    fn with_surplus(self, surplus: u64) -> Self {
        debug_assert!(surplus <= MAX_SURPLUS);
        OrecState((self.0 & !MASK_SURPLUS) | (surplus << SHIFT_SURPLUS))
    }

    #[inline]
    fn with_readonly_count(self, count: u32) -> Self {
        OrecState((self.0 & !MASK_READONLY_COUNT) | (count as u64 & MASK_READONLY_COUNT))
    }

    /// Acquire `mode` on top of the current bits.
    #[inline]
    fn with_lock(self, mode: LockMode) -> Self {
        match mode {
            LockMode::None => self,
            LockMode::Read => self.with_read_lock_count(self.read_lock_count() + 1),
            LockMode::Write => self.with_write_lock(true),
            LockMode::Exclusive => self.with_exclusive_lock(true),
        }
    }

    /// Release one lock held by the caller: a read lock if any is held,
    /// otherwise the write/exclusive bits.
    #[inline]
    fn without_own_lock(self) -> Self {
        let read_locks = self.read_lock_count();
        if read_locks > 0 {
            self.with_read_lock_count(read_locks - 1)
        } else {
            self.with_write_lock(false).with_exclusive_lock(false)
        }
    }

    /// Whether `mode` can't be acquired in this state.
    #[inline]
    fn blocks(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::None => self.has_exclusive_lock(),
            LockMode::Read => self.has_write_or_exclusive_lock(),
            LockMode::Write | LockMode::Exclusive => self.has_any_lock(),
        }
    }
}

impl fmt::Display for OrecState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Orec(exclusive={}, write={}, readBiased={}, readLocks={}, surplus={}, readonlyCount={})",
            self.has_exclusive_lock(),
            self.has_write_lock(),
            self.is_read_biased(),
            self.read_lock_count(),
            self.surplus(),
            self.readonly_count()
        )
    }
}

impl fmt::Debug for OrecState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Outcome of an arrive or lock operation.
///
/// `FAILURE` is the sentinel for an exhausted spin budget; callers translate
/// it into a conflict. A success may additionally be flagged
/// `UNREGISTERED` (no departure owed) and/or `CONFLICT` (other arrivals are
/// present, so publishing may invalidate their view).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArriveStatus(u8);

impl ArriveStatus {
    /// Spin budget exhausted.
    pub const FAILURE: ArriveStatus = ArriveStatus(0);
    /// Plain success with a departure owed.
    pub const SUCCESS: ArriveStatus = ArriveStatus(0b001);

    const UNREGISTERED_BIT: u8 = 0b010;
    const CONFLICT_BIT: u8 = 0b100;

    #[inline]
    fn success(unregistered: bool, conflict: bool) -> Self {
        let mut bits = Self::SUCCESS.0;
        if unregistered {
            bits |= Self::UNREGISTERED_BIT;
        }
        if conflict {
            bits |= Self::CONFLICT_BIT;
        }
        ArriveStatus(bits)
    }

    /// The operation succeeded.
    #[inline]
    pub fn is_success(&self) -> bool {
        self.0 & Self::SUCCESS.0 != 0
    }

    /// The operation failed after exhausting its spin budget.
    #[inline]
    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    /// Success without a departure obligation.
    #[inline]
    pub fn is_unregistered(&self) -> bool {
        self.0 & Self::UNREGISTERED_BIT != 0
    }

    /// Concurrent arrivals were present when the lock was taken.
    #[inline]
    pub fn has_conflict(&self) -> bool {
        self.0 & Self::CONFLICT_BIT != 0
    }
}

impl fmt::Debug for ArriveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_failure() {
            return f.write_str("FAILURE");
        }
        f.write_str("SUCCESS")?;
        if self.is_unregistered() {
            f.write_str("|UNREGISTERED")?;
        }
        if self.has_conflict() {
            f.write_str("|CONFLICT")?;
        }
        Ok(())
    }
}

#[cold]
#[inline(never)]
#[track_caller]
fn orec_panic(state: OrecState, message: &str) -> ! {
    panic!("orec invariant violated: {} [{}]", message, state)
}

#[inline]
fn spin_wait(remaining: i64) {
    if remaining % SPIN_YIELD == 0 {
        std::thread::yield_now();
    } else {
        std::hint::spin_loop();
    }
}

/// The ownership record of one transactional object.
pub struct Orec {
    word: AtomicU64,
    read_biased_threshold: u32,
}

impl Orec {
    /// Idle orec. `read_biased_threshold` is clamped to what the streak
    /// counter can represent.
    pub fn new(read_biased_threshold: u32) -> Self {
        Orec {
            word: AtomicU64::new(0),
            read_biased_threshold: read_biased_threshold.min(MAX_READ_BIASED_THRESHOLD),
        }
    }

    /// Orec of an object still under construction: one registered arrival
    /// holding the exclusive lock, released by the constructing transaction.
    pub fn new_constructing(read_biased_threshold: u32) -> Self {
        let state = OrecState::default()
            .with_surplus(1)
            .with_exclusive_lock(true);
        Orec {
            word: AtomicU64::new(state.0),
            read_biased_threshold: read_biased_threshold.min(MAX_READ_BIASED_THRESHOLD),
        }
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> OrecState {
        OrecState(self.word.load(Ordering::Acquire))
    }

    /// Readonly departures needed before the orec becomes read biased.
    pub fn read_biased_threshold(&self) -> u32 {
        self.read_biased_threshold
    }

    #[inline]
    fn cas(&self, current: OrecState, next: OrecState) -> bool {
        self.word
            .compare_exchange(current.0, next.0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Surplus after one more arrival, honoring the read-biased cap.
    #[inline]
    fn arrived_surplus(current: OrecState) -> u64 {
        let surplus = current.surplus();
        if current.is_read_biased() {
            match surplus {
                0 | 1 => 1,
                _ => orec_panic(current, "surplus of a read biased orec is larger than 1"),
            }
        } else {
            if surplus >= MAX_SURPLUS {
                orec_panic(current, "surplus overflow");
            }
            surplus + 1
        }
    }

    /// Bookkeeping shared by every readonly departure: bump the streak and
    /// flip to read biased once the threshold is reached and nobody else
    /// is around.
    #[inline]
    fn after_readonly_departure(&self, next: OrecState) -> OrecState {
        let mut count = next.readonly_count();
        if count < self.read_biased_threshold {
            count += 1;
        }
        if count >= self.read_biased_threshold && next.surplus() == 0 && !next.has_any_lock() {
            next.with_read_biased(true).with_readonly_count(0)
        } else {
            next.with_readonly_count(count)
        }
    }

    /// Register as an active reader/writer without locking.
    ///
    /// Fails after `spin_count` retries while the exclusive lock is held.
    /// On a read-biased orec the arrival is free: `UNREGISTERED` is
    /// reported and no departure is owed.
    pub fn arrive(&self, spin_count: u32) -> ArriveStatus {
        let mut remaining = i64::from(spin_count);
        loop {
            let current = self.state();
            if current.has_exclusive_lock() {
                remaining -= 1;
                if remaining < 0 {
                    return ArriveStatus::FAILURE;
                }
                spin_wait(remaining);
                continue;
            }

            let read_biased = current.is_read_biased();
            if read_biased && current.surplus() == 1 {
                return ArriveStatus::success(true, false);
            }

            let next = current.with_surplus(Self::arrived_surplus(current));
            if self.cas(current, next) {
                return ArriveStatus::success(read_biased, false);
            }
        }
    }

    /// Arrive and acquire `mode` in one step.
    ///
    /// A read lock is blocked by write/exclusive locks, write and exclusive
    /// locks by any lock. An exclusive lock reports `CONFLICT` when other
    /// arrivals (or untracked read-biased readers) are present.
    pub fn arrive_and_lock(&self, spin_count: u32, mode: LockMode) -> ArriveStatus {
        let mut remaining = i64::from(spin_count);
        loop {
            let current = self.state();
            if current.blocks(mode) {
                remaining -= 1;
                if remaining < 0 {
                    return ArriveStatus::FAILURE;
                }
                spin_wait(remaining);
                continue;
            }

            let read_biased = current.is_read_biased();
            let surplus = Self::arrived_surplus(current);
            let next = current.with_surplus(surplus).with_lock(mode);
            if self.cas(current, next) {
                let conflict = mode == LockMode::Exclusive && (read_biased || surplus > 1);
                return ArriveStatus::success(read_biased, conflict);
            }
        }
    }

    /// Acquire `mode` on behalf of an arrival that already happened.
    ///
    /// Panics if nothing arrived or the orec is read biased: a tracked
    /// arrival keeps the surplus above zero, which rules out the flip.
    pub fn lock_after_arrive(&self, spin_count: u32, mode: LockMode) -> ArriveStatus {
        let mut remaining = i64::from(spin_count);
        loop {
            let current = self.state();
            if current.is_read_biased() {
                orec_panic(current, "lock_after_arrive on a read biased orec");
            }
            if current.surplus() == 0 {
                orec_panic(current, "lock_after_arrive without surplus");
            }
            if current.blocks(mode) {
                remaining -= 1;
                if remaining < 0 {
                    return ArriveStatus::FAILURE;
                }
                spin_wait(remaining);
                continue;
            }

            let next = current.with_lock(mode);
            if self.cas(current, next) {
                let conflict = mode == LockMode::Exclusive && current.surplus() > 1;
                return ArriveStatus::success(false, conflict);
            }
        }
    }

    /// Convert the caller's read lock into a write or exclusive lock.
    ///
    /// Spins until the caller's read lock is the only one left.
    pub fn upgrade_read_lock(&self, spin_count: u32, to_exclusive: bool) -> ArriveStatus {
        let mut remaining = i64::from(spin_count);
        loop {
            let current = self.state();
            let read_locks = current.read_lock_count();
            if read_locks == 0 {
                orec_panic(current, "upgrade_read_lock without a read lock");
            }
            if current.surplus() == 0 {
                orec_panic(current, "upgrade_read_lock without surplus");
            }
            if read_locks > 1 {
                remaining -= 1;
                if remaining < 0 {
                    return ArriveStatus::FAILURE;
                }
                spin_wait(remaining);
                continue;
            }

            let next = if to_exclusive {
                current.with_read_lock_count(0).with_exclusive_lock(true)
            } else {
                current.with_read_lock_count(0).with_write_lock(true)
            };
            if self.cas(current, next) {
                let conflict =
                    to_exclusive && (current.is_read_biased() || current.surplus() > 1);
                return ArriveStatus::success(false, conflict);
            }
        }
    }

    /// Promote the caller's write lock to exclusive.
    ///
    /// Returns whether other arrivals were present.
    pub fn upgrade_write_lock(&self) -> bool {
        loop {
            let current = self.state();
            if current.has_exclusive_lock() {
                return false;
            }
            if !current.has_write_lock() {
                orec_panic(current, "upgrade_write_lock without a write lock");
            }
            let next = current.with_write_lock(false).with_exclusive_lock(true);
            if self.cas(current, next) {
                return current.is_read_biased() || current.surplus() > 1;
            }
        }
    }

    /// Wait until nobody holds the exclusive lock, without arriving.
    pub fn wait_for_exclusive_lock_to_become_free(&self, spin_count: u32) -> bool {
        let mut remaining = i64::from(spin_count);
        loop {
            if !self.state().has_exclusive_lock() {
                return true;
            }
            remaining -= 1;
            if remaining < 0 {
                return false;
            }
            spin_wait(remaining);
        }
    }

    /// Exit for a registered `arrive` after a successful read.
    pub fn depart_after_reading(&self) {
        loop {
            let current = self.state();
            let surplus = current.surplus();
            if surplus == 0 {
                orec_panic(current, "depart_after_reading without surplus");
            }
            if current.is_read_biased() {
                orec_panic(current, "depart_after_reading on a read biased orec");
            }

            let next = self.after_readonly_departure(current.with_surplus(surplus - 1));
            if self.cas(current, next) {
                return;
            }
        }
    }

    /// Exit for a registered lock held only for reading.
    pub fn depart_after_reading_and_unlock(&self) {
        loop {
            let current = self.state();
            let surplus = current.surplus();
            if surplus == 0 {
                orec_panic(current, "depart_after_reading_and_unlock without surplus");
            }
            if current.is_read_biased() {
                orec_panic(current, "depart_after_reading_and_unlock on a read biased orec");
            }
            if !current.has_any_lock() {
                orec_panic(current, "depart_after_reading_and_unlock without a lock");
            }

            let released = current.without_own_lock().with_surplus(surplus - 1);
            let next = self.after_readonly_departure(released);
            if self.cas(current, next) {
                return;
            }
        }
    }

    /// Exit after publishing an update; releases the write/exclusive lock.
    ///
    /// Any update breaks the read-bias fiction: a read-biased orec drops to
    /// zero surplus and returns to update biased. The readonly streak resets.
    /// Returns the surplus left behind.
    pub fn depart_after_update_and_unlock(&self) -> u64 {
        loop {
            let current = self.state();
            if !current.has_write_or_exclusive_lock() {
                orec_panic(current, "depart_after_update_and_unlock without a write lock");
            }
            let surplus = current.surplus();
            if surplus == 0 {
                orec_panic(current, "depart_after_update_and_unlock without surplus");
            }

            let remaining = if current.is_read_biased() {
                if surplus > 1 {
                    orec_panic(current, "surplus of a read biased orec is larger than 1");
                }
                0
            } else {
                surplus - 1
            };

            let next = current
                .with_write_lock(false)
                .with_exclusive_lock(false)
                .with_read_biased(false)
                .with_surplus(remaining)
                .with_readonly_count(0);
            if self.cas(current, next) {
                return remaining;
            }
        }
    }

    /// Exit for a registered `arrive` whose read attempt failed.
    ///
    /// Doesn't touch the readonly streak.
    pub fn depart_after_failure(&self) {
        loop {
            let current = self.state();
            let surplus = current.surplus();
            if surplus == 0 {
                orec_panic(current, "depart_after_failure without surplus");
            }
            if current.is_read_biased() {
                orec_panic(current, "depart_after_failure on a read biased orec");
            }

            let next = current.with_surplus(surplus - 1);
            if self.cas(current, next) {
                return;
            }
        }
    }

    /// Exit for a registered lock whose transaction aborted.
    pub fn depart_after_failure_and_unlock(&self) {
        loop {
            let current = self.state();
            let surplus = current.surplus();
            if surplus == 0 {
                orec_panic(current, "depart_after_failure_and_unlock without surplus");
            }
            if current.is_read_biased() {
                orec_panic(current, "depart_after_failure_and_unlock on a read biased orec");
            }
            if !current.has_any_lock() {
                orec_panic(current, "depart_after_failure_and_unlock without a lock");
            }

            let next = current.without_own_lock().with_surplus(surplus - 1);
            if self.cas(current, next) {
                return;
            }
        }
    }

    /// Release a lock taken while `UNREGISTERED`; the surplus is untouched.
    pub fn unlock_by_unregistered(&self) {
        loop {
            let current = self.state();
            if !current.has_any_lock() {
                orec_panic(current, "unlock_by_unregistered without a lock");
            }

            let next = current.without_own_lock();
            if self.cas(current, next) {
                return;
            }
        }
    }
}

impl fmt::Debug for Orec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.state(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIN: u32 = 16;

    #[test]
    fn fields_do_not_overlap() {
        let masks = [
            MASK_EXCLUSIVE_LOCK,
            MASK_WRITE_LOCK,
            MASK_READ_BIASED,
            MASK_READ_LOCKS,
            MASK_SURPLUS,
            MASK_READONLY_COUNT,
        ];
        let mut union = 0u64;
        for mask in masks {
            assert_eq!(union & mask, 0);
            union |= mask;
        }
        assert_eq!(union, u64::MAX);
        assert_eq!(MAX_READ_LOCKS, (1 << 21) - 1);
        assert_eq!(MAX_SURPLUS, (1 << 30) - 1);
    }

    #[test]
    fn setters_round_trip() {
        let state = OrecState::default()
            .with_surplus(12345)
            .with_read_lock_count(77)
            .with_readonly_count(1023)
            .with_read_biased(true)
            .with_write_lock(true);
        assert_eq!(state.surplus(), 12345);
        assert_eq!(state.read_lock_count(), 77);
        assert_eq!(state.readonly_count(), 1023);
        assert!(state.is_read_biased());
        assert!(state.has_write_lock());
        assert!(!state.has_exclusive_lock());
    }

    #[test]
    fn arrive_then_depart_returns_to_idle() {
        let orec = Orec::new(64);
        let status = orec.arrive(SPIN);
        assert!(status.is_success());
        assert!(!status.is_unregistered());
        assert_eq!(orec.state().surplus(), 1);

        orec.depart_after_reading();
        let state = orec.state();
        assert_eq!(state.surplus(), 0);
        assert_eq!(state.readonly_count(), 1);
        assert!(!state.has_any_lock());
    }

    #[test]
    fn arrive_fails_on_exclusive_lock() {
        let orec = Orec::new(64);
        assert!(orec.arrive_and_lock(SPIN, LockMode::Exclusive).is_success());
        assert_eq!(orec.arrive(SPIN), ArriveStatus::FAILURE);
        assert_eq!(orec.state().surplus(), 1);
    }

    #[test]
    fn arrive_succeeds_under_write_lock() {
        let orec = Orec::new(64);
        assert!(orec.arrive_and_lock(SPIN, LockMode::Write).is_success());
        assert!(orec.arrive(SPIN).is_success());
        assert_eq!(orec.state().surplus(), 2);
    }

    #[test]
    fn read_locks_are_shared() {
        let orec = Orec::new(64);
        assert!(orec.arrive_and_lock(SPIN, LockMode::Read).is_success());
        assert!(orec.arrive_and_lock(SPIN, LockMode::Read).is_success());
        assert_eq!(orec.state().read_lock_count(), 2);
        assert_eq!(orec.arrive_and_lock(SPIN, LockMode::Write), ArriveStatus::FAILURE);
        assert_eq!(orec.arrive_and_lock(SPIN, LockMode::Exclusive), ArriveStatus::FAILURE);

        orec.depart_after_reading_and_unlock();
        orec.depart_after_reading_and_unlock();
        assert!(orec.state().is_idle());
    }

    #[test]
    fn exclusive_lock_reports_conflict_with_other_arrivals() {
        let orec = Orec::new(64);
        assert!(orec.arrive(SPIN).is_success());
        let status = orec.arrive_and_lock(SPIN, LockMode::Exclusive);
        assert!(status.is_success());
        assert!(status.has_conflict());

        let lone = Orec::new(64);
        let status = lone.arrive_and_lock(SPIN, LockMode::Exclusive);
        assert!(status.is_success());
        assert!(!status.has_conflict());
    }

    #[test]
    fn lock_after_arrive_reports_conflict() {
        let orec = Orec::new(64);
        assert!(orec.arrive(SPIN).is_success());
        let status = orec.lock_after_arrive(SPIN, LockMode::Exclusive);
        assert!(status.is_success());
        assert!(!status.has_conflict());
        orec.depart_after_update_and_unlock();

        assert!(orec.arrive(SPIN).is_success());
        assert!(orec.arrive(SPIN).is_success());
        let status = orec.lock_after_arrive(SPIN, LockMode::Exclusive);
        assert!(status.has_conflict());
    }

    #[test]
    #[should_panic(expected = "lock_after_arrive without surplus")]
    fn lock_after_arrive_without_arrival_panics() {
        let orec = Orec::new(64);
        orec.lock_after_arrive(SPIN, LockMode::Read);
    }

    #[test]
    fn upgrade_read_lock_waits_for_other_readers() {
        let orec = Orec::new(64);
        assert!(orec.arrive_and_lock(SPIN, LockMode::Read).is_success());
        assert!(orec.arrive_and_lock(SPIN, LockMode::Read).is_success());
        assert_eq!(orec.upgrade_read_lock(SPIN, true), ArriveStatus::FAILURE);

        orec.depart_after_reading_and_unlock();
        let status = orec.upgrade_read_lock(SPIN, true);
        assert!(status.is_success());
        assert!(!status.has_conflict());
        assert!(orec.state().has_exclusive_lock());
        assert_eq!(orec.state().read_lock_count(), 0);
    }

    #[test]
    #[should_panic(expected = "upgrade_read_lock without a read lock")]
    fn upgrade_read_lock_without_read_lock_panics() {
        let orec = Orec::new(64);
        orec.arrive(SPIN);
        orec.upgrade_read_lock(SPIN, false);
    }

    #[test]
    fn upgrade_write_lock_to_exclusive() {
        let orec = Orec::new(64);
        assert!(orec.arrive_and_lock(SPIN, LockMode::Write).is_success());
        assert!(!orec.upgrade_write_lock());
        let state = orec.state();
        assert!(state.has_exclusive_lock());
        assert!(!state.has_write_lock());

        let contended = Orec::new(64);
        assert!(contended.arrive_and_lock(SPIN, LockMode::Write).is_success());
        assert!(contended.arrive(SPIN).is_success());
        assert!(contended.upgrade_write_lock());
    }

    #[test]
    fn readonly_streak_flips_to_read_biased() {
        let orec = Orec::new(3);
        for _ in 0..2 {
            orec.arrive(SPIN);
            orec.depart_after_reading();
            assert!(!orec.state().is_read_biased());
        }
        orec.arrive(SPIN);
        orec.depart_after_reading();
        let state = orec.state();
        assert!(state.is_read_biased());
        assert_eq!(state.readonly_count(), 0);
        assert_eq!(state.surplus(), 0);
    }

    #[test]
    fn read_biased_arrivals_are_unregistered_and_capped() {
        let orec = Orec::new(1);
        orec.arrive(SPIN);
        orec.depart_after_reading();
        assert!(orec.state().is_read_biased());

        for _ in 0..10 {
            let status = orec.arrive(SPIN);
            assert!(status.is_success());
            assert!(status.is_unregistered());
        }
        assert_eq!(orec.state().surplus(), 1);
    }

    #[test]
    fn update_departure_resets_read_bias() {
        let orec = Orec::new(1);
        orec.arrive(SPIN);
        orec.depart_after_reading();
        assert!(orec.state().is_read_biased());
        orec.arrive(SPIN);

        let status = orec.arrive_and_lock(SPIN, LockMode::Exclusive);
        assert!(status.is_success());
        assert!(status.is_unregistered());
        assert!(status.has_conflict());

        assert_eq!(orec.depart_after_update_and_unlock(), 0);
        let state = orec.state();
        assert!(state.is_idle());
        assert!(!state.is_read_biased());
        assert_eq!(state.readonly_count(), 0);
    }

    #[test]
    fn unregistered_lock_release_keeps_surplus() {
        let orec = Orec::new(1);
        orec.arrive(SPIN);
        orec.depart_after_reading();
        let status = orec.arrive_and_lock(SPIN, LockMode::Read);
        assert!(status.is_unregistered());
        orec.unlock_by_unregistered();
        let state = orec.state();
        assert!(!state.has_any_lock());
        assert_eq!(state.surplus(), 1);
        assert!(state.is_read_biased());
    }

    #[test]
    #[should_panic(expected = "larger than 1")]
    fn read_biased_surplus_above_one_panics() {
        let orec = Orec::new(64);
        orec.word.store(
            OrecState::default().with_read_biased(true).with_surplus(2).0,
            Ordering::SeqCst,
        );
        orec.arrive(SPIN);
    }

    #[test]
    #[should_panic(expected = "depart_after_reading without surplus")]
    fn surplus_underflow_panics() {
        Orec::new(64).depart_after_reading();
    }

    #[test]
    fn failure_departure_leaves_streak_alone() {
        let orec = Orec::new(64);
        orec.arrive(SPIN);
        orec.depart_after_failure();
        assert_eq!(orec.state().readonly_count(), 0);
        assert!(orec.state().is_idle());

        orec.arrive_and_lock(SPIN, LockMode::Write);
        orec.depart_after_failure_and_unlock();
        assert!(orec.state().is_idle());
    }

    #[test]
    fn constructing_orec_is_exclusively_locked() {
        let orec = Orec::new_constructing(64);
        let state = orec.state();
        assert!(state.has_exclusive_lock());
        assert_eq!(state.surplus(), 1);
        assert_eq!(orec.arrive(0), ArriveStatus::FAILURE);
        orec.depart_after_update_and_unlock();
        assert!(orec.state().is_idle());
    }

    #[test]
    fn lock_mode_reflects_strongest_lock() {
        let orec = Orec::new(64);
        assert_eq!(orec.state().lock_mode(), LockMode::None);
        orec.arrive_and_lock(SPIN, LockMode::Read);
        assert_eq!(orec.state().lock_mode(), LockMode::Read);
        orec.upgrade_read_lock(SPIN, false);
        assert_eq!(orec.state().lock_mode(), LockMode::Write);
        orec.upgrade_write_lock();
        assert_eq!(orec.state().lock_mode(), LockMode::Exclusive);
    }

    #[test]
    fn threshold_is_clamped() {
        assert_eq!(Orec::new(5000).read_biased_threshold(), MAX_READ_BIASED_THRESHOLD);
    }
}
