//! Two-phase transfers.

use std::fmt;

use serde::{Deserialize, Serialize};

use tally_core::Amount;

use crate::account::AccountPath;

/// Identifier assigned by the ledger at prepare time. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransferId(pub u64);

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferState {
    Prepared,
    Posted,
    Voided,
}

/// A transfer token handed out by `prepare`.
///
/// The ledger keeps the authoritative state; this is a receipt. Posting or
/// voiding returns a new token in the final state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub debit_account: AccountPath,
    pub credit_account: AccountPath,
    pub amount: Amount,
    pub state: TransferState,
}

impl Transfer {
    pub fn touches(&self, path: &AccountPath) -> bool {
        &self.debit_account == path || &self.credit_account == path
    }
}
