//! Transaction executor
//!
//! Runs a closure inside a transaction and commits it, re-running the
//! closure until it commits or fails for good:
//!
//! | Outcome of an attempt | Action |
//! |-----------------------|--------|
//! | speculative failure | restart with the wider flavor, not counted |
//! | `Retry` | park until a read ref changes, then restart |
//! | read/write conflict | back off, then restart |
//! | anything else | abort and return the error |
//!
//! The closure may run many times and must not have side effects outside
//! the transaction.

use crate::factory::TxnFactory;
use crate::txn::GammaTxn;
use gammastm_concurrency::{InterruptToken, ParkOutcome};
use gammastm_core::{TxnError, TxnResult};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Executes closures atomically with transactions of one factory.
#[derive(Clone)]
pub struct TxnExecutor {
    factory: TxnFactory,
}

impl TxnExecutor {
    pub(crate) fn new(factory: TxnFactory) -> Self {
        TxnExecutor { factory }
    }

    /// The factory supplying the transactions.
    pub fn factory(&self) -> &TxnFactory {
        &self.factory
    }

    /// Run `body` atomically and return its result.
    ///
    /// # Errors
    ///
    /// - `TooManyRetries` when `max_retries` attempts were used up
    /// - `RetryTimeout` when blocking exceeded the configured timeout
    /// - any non control-flow error returned by `body`
    pub fn execute<T, F>(&self, body: F) -> TxnResult<T>
    where
        F: FnMut(&mut GammaTxn) -> TxnResult<T>,
    {
        self.run(None, body)
    }

    /// Like [`execute`](Self::execute), but blocking waits and backoff end
    /// with `RetryInterrupted` once `token` is interrupted.
    pub fn execute_interruptible<T, F>(&self, token: &InterruptToken, body: F) -> TxnResult<T>
    where
        F: FnMut(&mut GammaTxn) -> TxnResult<T>,
    {
        self.run(Some(token.clone()), body)
    }

    fn run<T, F>(&self, interrupt: Option<InterruptToken>, mut body: F) -> TxnResult<T>
    where
        F: FnMut(&mut GammaTxn) -> TxnResult<T>,
    {
        let mut txn = self.factory.new_txn();
        txn.set_interrupt(interrupt);

        loop {
            trace!(
                family = %txn.config().family_name,
                attempt = txn.attempt(),
                flavor = %txn.flavor(),
                "starting attempt"
            );

            let error = match body(&mut txn) {
                Ok(value) => match txn.commit() {
                    Ok(()) => return Ok(value),
                    Err(error) => error,
                },
                Err(error) => error,
            };

            match error {
                TxnError::SpeculativeConfiguration(_) => txn.restart(false),
                TxnError::Retry => {
                    self.check_attempts(&mut txn)?;
                    self.block(&mut txn)?;
                    txn.restart(true);
                }
                TxnError::ReadWriteConflict(_) => {
                    txn.abort_quietly();
                    self.check_attempts(&mut txn)?;
                    self.back_off(&mut txn)?;
                    txn.restart(true);
                }
                error => {
                    txn.abort_quietly();
                    return Err(error);
                }
            }
        }
    }

    fn check_attempts(&self, txn: &mut GammaTxn) -> TxnResult<()> {
        let max_retries = txn.config().max_retries;
        if txn.attempt() >= max_retries {
            txn.abort_quietly();
            warn!(
                family = %txn.config().family_name,
                attempts = txn.attempt(),
                "giving up, too many retries"
            );
            return Err(TxnError::TooManyRetries {
                attempts: txn.attempt(),
            });
        }
        Ok(())
    }

    /// Park until one of the refs the attempt read is updated.
    fn block(&self, txn: &mut GammaTxn) -> TxnResult<()> {
        let (latch, era) = txn.register_retry_and_abort()?;
        match latch.park(era, txn.remaining_timeout(), txn.interrupt_token()) {
            ParkOutcome::Opened { remaining } => {
                debug!(
                    family = %txn.config().family_name,
                    attempt = txn.attempt(),
                    "blocked transaction woken"
                );
                if let Some(remaining) = remaining {
                    txn.set_remaining_timeout(remaining);
                }
                Ok(())
            }
            ParkOutcome::TimedOut => Err(self.timed_out(txn)),
            ParkOutcome::Interrupted => Err(TxnError::RetryInterrupted),
        }
    }

    /// Wait before re-running a conflicting attempt. Time spent here counts
    /// against the transaction's timeout.
    fn back_off(&self, txn: &mut GammaTxn) -> TxnResult<()> {
        let backoff = &self.factory.stm().backoff;
        let started = Instant::now();
        if backoff
            .delay(txn.attempt(), txn.interrupt_token())
            .is_err()
        {
            return Err(TxnError::RetryInterrupted);
        }
        if let Some(remaining) = txn.remaining_timeout() {
            let left = remaining.saturating_sub(started.elapsed());
            if left.is_zero() {
                return Err(self.timed_out(txn));
            }
            txn.set_remaining_timeout(left);
        }
        Ok(())
    }

    fn timed_out(&self, txn: &mut GammaTxn) -> TxnError {
        txn.set_remaining_timeout(Duration::ZERO);
        warn!(
            family = %txn.config().family_name,
            attempt = txn.attempt(),
            "transaction timed out"
        );
        TxnError::RetryTimeout(txn.config().timeout.unwrap_or_default())
    }
}

impl fmt::Debug for TxnExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxnExecutor")
            .field("factory", &self.factory)
            .finish()
    }
}
