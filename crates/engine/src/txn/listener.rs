//! Transaction lifecycle listeners

/// Lifecycle event delivered to a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnEvent {
    /// Before the transaction starts preparing.
    PrePrepare,
    /// After every write was published.
    PostCommit,
    /// After every lock was released on abort.
    PostAbort,
}

/// Callback attached to a single transaction attempt.
///
/// Listeners are dropped when the attempt ends, so a transaction that is
/// restarted has to register them again.
pub trait TxnListener: Send {
    /// Called once per event.
    fn notify(&mut self, event: TxnEvent);
}

impl<F> TxnListener for F
where
    F: FnMut(TxnEvent) + Send,
{
    fn notify(&mut self, event: TxnEvent) {
        self(event)
    }
}
