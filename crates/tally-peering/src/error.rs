//! Error types for the peer protocol.

use thiserror::Error;

use tally_core::{CodecError, CoreError};

/// Errors raised by the peer protocol.
#[derive(Debug, Error)]
pub enum PeeringError {
    /// A message could not be serialized or parsed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A signed link-state payload was malformed or failed verification.
    #[error("invalid link state: {0}")]
    InvalidLinkState(#[from] CoreError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Destination is not reachable on this transport.
    #[error("peer not connected: {0}")]
    PeerNotConnected(String),

    /// State that cannot occur under correct operation.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl PeeringError {
    /// Protocol-transient errors: the message is dropped and nothing else happens.
    pub fn is_transient(&self) -> bool {
        !matches!(self, PeeringError::Invariant(_))
    }
}

/// Result type for peer protocol operations.
pub type Result<T> = std::result::Result<T, PeeringError>;
