//! Per-transaction view of one ref

use crate::payload::Payload;
use gammastm_core::LockMode;
use std::fmt;

/// Pending commuting function, applied when the ref is finally loaded.
pub(crate) type CommuteFn = Box<dyn FnOnce(Payload) -> Payload + Send>;

/// How a transaction opened a ref.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TranlocalMode {
    /// Read only so far.
    Read,
    /// Opened for update; dirtiness is decided at prepare.
    Write,
    /// Created by this transaction, invisible to others until commit.
    Construction,
    /// Only commuting functions recorded, nothing loaded yet.
    Commute,
}

/// Transaction-local state of one ref.
///
/// `version` and `value` are what the transaction observed; `old_value` is
/// kept for the dirty check. `has_depart_obligation` records whether the
/// arrival on the orec was registered and has to be matched by a departure.
pub(crate) struct Tranlocal {
    pub(crate) version: u64,
    pub(crate) value: Payload,
    pub(crate) old_value: Payload,
    pub(crate) lock_mode: LockMode,
    pub(crate) mode: TranlocalMode,
    pub(crate) is_dirty: bool,
    pub(crate) has_depart_obligation: bool,
    pub(crate) write_skew_check: bool,
    pub(crate) commutes: Vec<CommuteFn>,
}

impl Tranlocal {
    /// Empty tranlocal waiting to be loaded.
    pub(crate) fn unloaded(mode: TranlocalMode) -> Self {
        Tranlocal {
            version: 0,
            value: Payload::Word(0),
            old_value: Payload::Word(0),
            lock_mode: LockMode::None,
            mode,
            is_dirty: false,
            has_depart_obligation: false,
            write_skew_check: false,
            commutes: Vec::new(),
        }
    }

    /// Tranlocal of a ref created by the owning transaction. The orec was
    /// created exclusively locked with one registered arrival.
    pub(crate) fn constructed(value: Payload) -> Self {
        Tranlocal {
            version: 0,
            old_value: value.clone(),
            value,
            lock_mode: LockMode::Exclusive,
            mode: TranlocalMode::Construction,
            is_dirty: true,
            has_depart_obligation: true,
            write_skew_check: false,
            commutes: Vec::new(),
        }
    }

    /// Whether the ref's value was read into this tranlocal.
    pub(crate) fn is_loaded(&self) -> bool {
        self.mode != TranlocalMode::Commute
    }

    pub(crate) fn is_write(&self) -> bool {
        matches!(self.mode, TranlocalMode::Write | TranlocalMode::Construction)
    }

    /// Switch a read to an update.
    pub(crate) fn upgrade_to_write(&mut self) {
        if self.mode == TranlocalMode::Read {
            self.mode = TranlocalMode::Write;
        }
    }

    /// Run every pending commuting function over `value`, in recording order.
    pub(crate) fn apply_commutes(&mut self) {
        let mut value = self.value.clone();
        for function in self.commutes.drain(..) {
            value = function(value);
        }
        self.value = value;
    }
}

impl fmt::Debug for Tranlocal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tranlocal")
            .field("version", &self.version)
            .field("value", &self.value)
            .field("lock_mode", &self.lock_mode)
            .field("mode", &self.mode)
            .field("is_dirty", &self.is_dirty)
            .field("has_depart_obligation", &self.has_depart_obligation)
            .field("write_skew_check", &self.write_skew_check)
            .field("pending_commutes", &self.commutes.len())
            .finish()
    }
}
