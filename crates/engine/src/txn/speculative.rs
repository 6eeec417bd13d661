//! Speculative flavor selection
//!
//! A factory starts its transactions with the cheapest flavor and learns
//! from failures: a transaction that outgrows its flavor records what it
//! needed and restarts. The knowledge is shared by every transaction of the
//! factory and only ever grows.

use super::flavor::TxnFlavor;
use gammastm_core::{SpeculativeFailure, TxnConfig};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug)]
pub(crate) struct SpeculativeConfig {
    enabled: bool,
    max_fixed_length: usize,
    fat_required: AtomicBool,
    min_length: AtomicUsize,
    richmans_scan_required: AtomicBool,
}

impl SpeculativeConfig {
    pub(crate) fn new(config: &TxnConfig) -> Self {
        SpeculativeConfig {
            enabled: config.speculative_config_enabled,
            max_fixed_length: config.max_fixed_length_txn_size,
            fat_required: AtomicBool::new(config.is_fat_required()),
            min_length: AtomicUsize::new(1),
            richmans_scan_required: AtomicBool::new(false),
        }
    }

    /// Flavor for the next attempt.
    pub(crate) fn flavor(&self) -> TxnFlavor {
        if !self.enabled {
            return TxnFlavor::FatVariableLength;
        }
        TxnFlavor::select(
            self.fat_required.load(Ordering::Acquire),
            self.min_length.load(Ordering::Acquire),
            self.max_fixed_length,
        )
    }

    /// Whether fat transactions should arrive on reads and rely on the
    /// global conflict counter instead of re-validating every read.
    pub(crate) fn is_richmans_scan_required(&self) -> bool {
        !self.enabled || self.richmans_scan_required.load(Ordering::Acquire)
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Learn from a failed attempt.
    pub(crate) fn record(&self, failure: SpeculativeFailure) {
        match failure {
            SpeculativeFailure::FatRequired => self.fat_required.store(true, Ordering::Release),
            SpeculativeFailure::SizeExceeded { required } => {
                self.min_length.fetch_max(required, Ordering::AcqRel);
            }
            SpeculativeFailure::RichmansScanRequired => {
                self.fat_required.store(true, Ordering::Release);
                self.richmans_scan_required.store(true, Ordering::Release);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_lean_and_escalates() {
        let speculative = SpeculativeConfig::new(&TxnConfig::default());
        assert_eq!(speculative.flavor(), TxnFlavor::LeanMono);

        speculative.record(SpeculativeFailure::SizeExceeded { required: 2 });
        assert_eq!(speculative.flavor(), TxnFlavor::LeanFixedLength);

        speculative.record(SpeculativeFailure::FatRequired);
        assert_eq!(speculative.flavor(), TxnFlavor::FatFixedLength);

        speculative.record(SpeculativeFailure::SizeExceeded { required: 1 });
        assert_eq!(speculative.flavor(), TxnFlavor::FatFixedLength);

        speculative.record(SpeculativeFailure::SizeExceeded { required: 500 });
        assert_eq!(speculative.flavor(), TxnFlavor::FatVariableLength);
        assert!(!speculative.is_richmans_scan_required());

        speculative.record(SpeculativeFailure::RichmansScanRequired);
        assert!(speculative.is_richmans_scan_required());
    }

    #[test]
    fn disabled_speculation_is_always_fat() {
        let config = TxnConfig {
            speculative_config_enabled: false,
            ..TxnConfig::default()
        };
        let speculative = SpeculativeConfig::new(&config);
        assert_eq!(speculative.flavor(), TxnFlavor::FatVariableLength);
        assert!(speculative.is_richmans_scan_required());
    }

    #[test]
    fn fat_configuration_skips_lean() {
        let config = TxnConfig {
            force_fat: true,
            ..TxnConfig::default()
        };
        assert_eq!(SpeculativeConfig::new(&config).flavor(), TxnFlavor::FatMono);
    }
}
