//! Error types for the settlement engine.

use thiserror::Error;

use tally_core::SettlementSchemeId;
use tally_ledger::{LedgerError, LedgerFailure};
use tally_peering::PeeringError;

#[derive(Debug, Error)]
pub enum SettlementError {
    /// A peered node is missing one of its ledger accounts.
    #[error("peer accounts missing for {peer}")]
    MissingAccounts { peer: String },

    /// No backend is registered for the scheme.
    #[error("unknown settlement scheme: {0}")]
    UnknownScheme(SettlementSchemeId),

    /// The ledger refused the settlement transfer.
    #[error("ledger rejected settlement: {0}")]
    Rejected(#[from] LedgerFailure),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The settlement backend failed or refused.
    #[error("settlement backend error: {0}")]
    Backend(String),

    #[error("peering error: {0}")]
    Peering(#[from] PeeringError),
}

/// Result type for settlement operations.
pub type Result<T> = std::result::Result<T, SettlementError>;
