//! Error types for the ledger.
//!
//! Two tiers: [`LedgerFailure`] is an expected rejection returned by
//! `prepare` that callers recover from; [`LedgerError`] is misuse of the
//! API (posting a transfer twice, creating an account twice).

use std::fmt;

use thiserror::Error;

use crate::account::AccountPath;
use crate::transfer::TransferId;

/// Which side of a transfer an account failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhichAccount {
    Debit,
    Credit,
}

impl fmt::Display for WhichAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WhichAccount::Debit => f.write_str("debit"),
            WhichAccount::Credit => f.write_str("credit"),
        }
    }
}

/// A rejected `prepare`. The ledger is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerFailure {
    #[error("invalid {which_account} account {account_path}")]
    InvalidAccount {
        which_account: WhichAccount,
        account_path: AccountPath,
    },

    /// The debit account would owe more than it holds.
    #[error("transfer exceeds credits of {account_path}")]
    ExceedsCredits { account_path: AccountPath },

    /// The credit account would hold more than it owes.
    #[error("transfer exceeds debits of {account_path}")]
    ExceedsDebits { account_path: AccountPath },

    /// A counter on the given account would no longer fit in an `Amount`.
    #[error("amount overflow on {account_path}")]
    Overflow { account_path: AccountPath },
}

/// Ledger API misuse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("account already exists: {0}")]
    AccountExists(AccountPath),

    /// The transfer was already posted or voided, or its accounts were removed.
    #[error("transfer {0} is not pending")]
    NotPending(TransferId),

    #[error("invalid account path: {0}")]
    InvalidPath(String),
}

/// Result type for ledger administration.
pub type Result<T> = std::result::Result<T, LedgerError>;
