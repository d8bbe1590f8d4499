//! Error types for the node.

use thiserror::Error;

use tally_core::CoreError;
use tally_ledger::LedgerError;
use tally_peering::PeeringError;
use tally_settlement::SettlementError;
use tally_store::StoreError;

/// Errors that can occur during node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("peering error: {0}")]
    Peering(#[from] PeeringError),

    #[error("settlement error: {0}")]
    Settlement(#[from] SettlementError),

    /// The transport belongs to a different node.
    #[error("transport is bound to {transport}, node is {node}")]
    IdentityMismatch { node: String, transport: String },

    #[error("node is already running")]
    AlreadyRunning,
}

impl NodeError {
    /// Whether the error only affects a single inbound message.
    pub fn is_transient(&self) -> bool {
        match self {
            NodeError::Peering(e) => e.is_transient(),
            NodeError::Settlement(SettlementError::Peering(e)) => e.is_transient(),
            NodeError::Settlement(_) => true,
            _ => false,
        }
    }
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
