//! Transaction lifecycle status

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a transaction in its lifecycle
///
/// State transitions:
/// - `Active` → `Prepared` (all locks acquired, conflicts checked)
/// - `Active` | `Prepared` → `Committed`
/// - `Active` | `Prepared` → `Aborted`
///
/// Terminal states (no transitions allowed):
/// - `Committed`
/// - `Aborted`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxnStatus {
    /// Transaction is executing, refs can be opened
    Active,
    /// Transaction has been prepared for commit
    Prepared,
    /// Transaction committed successfully
    Committed,
    /// Transaction was aborted
    Aborted,
}

impl TxnStatus {
    /// Whether the transaction can still be committed or aborted.
    pub fn is_alive(&self) -> bool {
        matches!(self, TxnStatus::Active | TxnStatus::Prepared)
    }
}

impl fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxnStatus::Active => "Active",
            TxnStatus::Prepared => "Prepared",
            TxnStatus::Committed => "Committed",
            TxnStatus::Aborted => "Aborted",
        };
        f.write_str(s)
    }
}
