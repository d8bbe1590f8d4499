//! Error types for Tally Core.

use thiserror::Error;

/// Errors raised while handling identities and signed announcements.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("node id does not match public key: claimed {claimed}, derived {derived}")]
    NodeIdMismatch { claimed: String, derived: String },

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),

    #[error("amount overflow")]
    AmountOverflow,
}

/// Errors produced by a [`MessageCodec`](crate::MessageCodec).
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to serialize message: {0}")]
    Serialize(String),

    #[error("failed to parse message: {0}")]
    Parse(String),

    #[error("message exceeds limit: {0}")]
    TooLarge(&'static str),
}
