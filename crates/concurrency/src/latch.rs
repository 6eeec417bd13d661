//! Retry latch
//!
//! A blocked transaction parks on its latch after registering it with every
//! ref it read. The first commit that changes one of those refs opens the
//! latch. Eras keep a stale registration from opening a latch that was
//! already reset for a later wait.

use crate::interrupt::InterruptToken;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Default)]
struct LatchState {
    era: u64,
    open: bool,
}

/// Result of parking on a latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkOutcome {
    /// The latch opened (or moved to a later era) before the deadline.
    Opened {
        /// Time left of the timeout, `None` when the park was unbounded.
        remaining: Option<Duration>,
    },
    /// The timeout elapsed.
    TimedOut,
    /// The interrupt token fired.
    Interrupted,
}

/// Single-shot gate, reusable across eras.
#[derive(Debug, Default)]
pub struct RetryLatch {
    state: Mutex<LatchState>,
    cond: Condvar,
}

impl RetryLatch {
    /// Closed latch in era 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current era.
    pub fn era(&self) -> u64 {
        self.state.lock().era
    }

    /// Whether the current era is open.
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Open the latch if it is still in `expected_era`.
    pub fn open(&self, expected_era: u64) {
        let mut state = self.state.lock();
        if state.era != expected_era {
            debug!(expected_era, era = state.era, "stale latch wake-up skipped");
            return;
        }
        if state.open {
            return;
        }
        state.open = true;
        self.cond.notify_all();
    }

    /// Close the latch and move to the next era. A closed latch stays in its era.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        if state.open {
            state.open = false;
            state.era += 1;
        }
    }

    /// Wake waiters without opening, so they re-check their interrupt token.
    pub(crate) fn wake_waiters(&self) {
        let _state = self.state.lock();
        self.cond.notify_all();
    }

    /// Block until the latch opens for `expected_era`.
    pub fn wait(&self, expected_era: u64) {
        let mut state = self.state.lock();
        while state.era == expected_era && !state.open {
            self.cond.wait(&mut state);
        }
    }

    /// Block until the latch opens or `timeout` elapses; returns the time
    /// left, zero when timed out.
    pub fn wait_timeout(&self, expected_era: u64, timeout: Duration) -> Duration {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.era == expected_era && !state.open {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        deadline.saturating_duration_since(Instant::now())
    }

    /// Park honoring an optional timeout and an optional interrupt token.
    ///
    /// The token is checked before every wait, so an interrupt that
    /// happened before the call is not lost.
    pub fn park(
        self: &Arc<Self>,
        expected_era: u64,
        timeout: Option<Duration>,
        interrupt: Option<&InterruptToken>,
    ) -> ParkOutcome {
        if let Some(token) = interrupt {
            token.park_on(self);
        }
        let outcome = self.park_inner(expected_era, timeout, interrupt);
        if let Some(token) = interrupt {
            token.unpark();
        }
        outcome
    }

    fn park_inner(
        &self,
        expected_era: u64,
        timeout: Option<Duration>,
        interrupt: Option<&InterruptToken>,
    ) -> ParkOutcome {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            if state.era != expected_era || state.open {
                return ParkOutcome::Opened {
                    remaining: deadline.map(|d| d.saturating_duration_since(Instant::now())),
                };
            }
            if interrupt.map_or(false, InterruptToken::is_interrupted) {
                return ParkOutcome::Interrupted;
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return ParkOutcome::TimedOut;
                    }
                    self.cond.wait_until(&mut state, deadline);
                }
                None => self.cond.wait(&mut state),
            }
        }
    }
}
