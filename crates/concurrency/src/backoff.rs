//! Randomized backoff between whole-operation retries
//!
//! The delay table is built once per policy and never mutated, so any number
//! of threads can share one policy without synchronization.

use crate::interrupt::{InterruptToken, Interrupted};
use rand::Rng;
use std::fmt;
use std::time::Duration;

/// Number of slots in the delay table.
pub const SLOT_COUNT: usize = 1000;

/// Delays below this are replaced by an occasional yield.
pub const DEFAULT_MIN_DELAY_NS: u64 = 500;

/// Yield once every this many attempts when the delay is too short to sleep.
const YIELD_EVERY: u32 = 20;

const QUADRATIC: f64 = 100.0;
const LINEAR: f64 = -4963.0;

/// How a thread waits between two attempts of a contended operation.
pub trait BackoffPolicy: Send + Sync + fmt::Debug {
    /// Wait before attempt `attempt`, returning early if `interrupt` fires.
    fn delay(&self, attempt: u32, interrupt: Option<&InterruptToken>) -> Result<(), Interrupted>;

    /// Wait before attempt `attempt`, ignoring interrupts.
    fn delay_uninterruptible(&self, attempt: u32) {
        // without a token there is nothing to interrupt the wait
        let _ = self.delay(attempt, None);
    }

    /// Delay the policy would use for `attempt`, for timeout bookkeeping.
    fn delay_for(&self, attempt: u32) -> Duration;
}

/// Quadratic randomized backoff.
///
/// Slot `k` holds `round(random * max(0, 100k² - 4963k))` nanoseconds: zero
/// for roughly the first fifty slots, then growing quadratically up to about
/// 95ms. Attempts beyond the table reuse the last slot.
pub struct DefaultBackoffPolicy {
    slots: Box<[u64]>,
    min_delay_ns: u64,
}

impl DefaultBackoffPolicy {
    /// Policy with a thread-local random table and the default minimum delay.
    pub fn new() -> Self {
        Self::with_min_delay(DEFAULT_MIN_DELAY_NS)
    }

    /// Policy with a custom minimum sleep.
    pub fn with_min_delay(min_delay_ns: u64) -> Self {
        Self::from_rng(&mut rand::thread_rng(), min_delay_ns)
    }

    /// Build the table from `rng`; a seeded rng gives a reproducible table.
    pub fn from_rng<R: Rng + ?Sized>(rng: &mut R, min_delay_ns: u64) -> Self {
        let slots = (0..SLOT_COUNT)
            .map(|k| {
                let k = k as f64;
                let ceiling = (QUADRATIC * k * k + LINEAR * k).max(0.0);
                (rng.gen::<f64>() * ceiling).round() as u64
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        DefaultBackoffPolicy {
            slots,
            min_delay_ns,
        }
    }

    /// Raw slot value in nanoseconds.
    pub fn slot_ns(&self, attempt: u32) -> u64 {
        let index = (attempt as usize).min(self.slots.len() - 1);
        self.slots[index]
    }

    /// Minimum delay that is actually slept.
    pub fn min_delay_ns(&self) -> u64 {
        self.min_delay_ns
    }
}

impl Default for DefaultBackoffPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DefaultBackoffPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultBackoffPolicy")
            .field("slots", &self.slots.len())
            .field("min_delay_ns", &self.min_delay_ns)
            .finish()
    }
}

impl BackoffPolicy for DefaultBackoffPolicy {
    fn delay(&self, attempt: u32, interrupt: Option<&InterruptToken>) -> Result<(), Interrupted> {
        if let Some(token) = interrupt {
            token.check()?;
        }

        let delay_ns = self.slot_ns(attempt);
        if delay_ns < self.min_delay_ns {
            if attempt % YIELD_EVERY == 0 {
                std::thread::yield_now();
            }
            return Ok(());
        }

        let delay = Duration::from_nanos(delay_ns);
        match interrupt {
            Some(token) => token.sleep(delay),
            None => {
                std::thread::sleep(delay);
                Ok(())
            }
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let delay_ns = self.slot_ns(attempt);
        if delay_ns < self.min_delay_ns {
            Duration::ZERO
        } else {
            Duration::from_nanos(delay_ns)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn seeded() -> DefaultBackoffPolicy {
        DefaultBackoffPolicy::from_rng(&mut StdRng::seed_from_u64(42), DEFAULT_MIN_DELAY_NS)
    }

    #[test]
    fn early_slots_are_zero() {
        let policy = seeded();
        for attempt in 0..=49 {
            assert_eq!(policy.slot_ns(attempt), 0, "slot {}", attempt);
        }
    }

    #[test]
    fn slots_are_bounded_by_the_curve() {
        let policy = seeded();
        for attempt in 0..SLOT_COUNT as u32 {
            let k = attempt as f64;
            let ceiling = (100.0 * k * k - 4963.0 * k).max(0.0).round() as u64;
            assert!(policy.slot_ns(attempt) <= ceiling);
        }
    }

    #[test]
    fn attempts_past_the_table_use_the_last_slot() {
        let policy = seeded();
        let last = policy.slot_ns(SLOT_COUNT as u32 - 1);
        assert_eq!(policy.slot_ns(SLOT_COUNT as u32), last);
        assert_eq!(policy.slot_ns(u32::MAX), last);
    }

    #[test]
    fn same_seed_same_table() {
        let a = seeded();
        let b = seeded();
        for attempt in [0, 60, 500, 999] {
            assert_eq!(a.slot_ns(attempt), b.slot_ns(attempt));
        }
    }

    #[test]
    fn short_delays_do_not_sleep() {
        let policy = seeded();
        assert_eq!(policy.delay_for(1), Duration::ZERO);
        let start = std::time::Instant::now();
        for attempt in 0..40 {
            policy.delay_uninterruptible(attempt);
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn interrupted_token_fails_fast() {
        let policy = seeded();
        let token = InterruptToken::new();
        token.interrupt();
        assert_eq!(policy.delay(900, Some(&token)), Err(Interrupted));
    }
}
