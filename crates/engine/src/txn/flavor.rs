//! Transaction flavors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Shape of a transaction, chosen per attempt.
///
/// Lean flavors skip everything that needs bookkeeping beyond plain reads
/// and writes: explicit locks, commuting updates, write-skew checks,
/// construction, listeners, abort-only and timeouts. They never arrive on
/// an orec for a plain read and always re-validate the whole read set after
/// each new read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxnFlavor {
    /// One ref, lean features.
    LeanMono,
    /// Up to the fixed-length capacity, lean features.
    LeanFixedLength,
    /// One ref, all features.
    FatMono,
    /// Up to the fixed-length capacity, all features.
    FatFixedLength,
    /// Any number of refs, all features, hash indexed.
    FatVariableLength,
}

impl TxnFlavor {
    /// Whether the flavor lacks the fat features.
    pub fn is_lean(&self) -> bool {
        matches!(self, TxnFlavor::LeanMono | TxnFlavor::LeanFixedLength)
    }

    /// Whether refs are looked up through a hash index.
    pub fn is_indexed(&self) -> bool {
        matches!(self, TxnFlavor::FatVariableLength)
    }

    /// Number of refs the flavor can hold, `None` for unbounded.
    pub fn capacity(&self, max_fixed_length: usize) -> Option<usize> {
        match self {
            TxnFlavor::LeanMono | TxnFlavor::FatMono => Some(1),
            TxnFlavor::LeanFixedLength | TxnFlavor::FatFixedLength => Some(max_fixed_length),
            TxnFlavor::FatVariableLength => None,
        }
    }

    /// Cheapest flavor that satisfies the given needs.
    pub fn select(fat_required: bool, min_length: usize, max_fixed_length: usize) -> TxnFlavor {
        if min_length <= 1 {
            if fat_required {
                TxnFlavor::FatMono
            } else {
                TxnFlavor::LeanMono
            }
        } else if min_length <= max_fixed_length {
            if fat_required {
                TxnFlavor::FatFixedLength
            } else {
                TxnFlavor::LeanFixedLength
            }
        } else {
            TxnFlavor::FatVariableLength
        }
    }
}

impl fmt::Display for TxnFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxnFlavor::LeanMono => "LeanMono",
            TxnFlavor::LeanFixedLength => "LeanFixedLength",
            TxnFlavor::FatMono => "FatMono",
            TxnFlavor::FatFixedLength => "FatFixedLength",
            TxnFlavor::FatVariableLength => "FatVariableLength",
        };
        f.write_str(s)
    }
}
