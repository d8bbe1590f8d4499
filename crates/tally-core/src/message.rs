//! Peer protocol messages and the codec that frames them.
//!
//! The outer wire envelope (HTTP body, WebSocket frame) belongs to the
//! transport. This module only turns a [`PeerMessage`] into bytes and back.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::error::CodecError;
use crate::types::SettlementSchemeId;

/// Message size limits.
pub mod limits {
    /// Max size of a signed link-state envelope.
    pub const MAX_LINK_STATE_BYTES: usize = 16 * 1024;
    /// Max size of a settlement proof.
    pub const MAX_PROOF_BYTES: usize = 64 * 1024;
    /// Max size of a settlement scheme id.
    pub const MAX_SCHEME_ID_LEN: usize = 64;
}

/// Messages exchanged between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerMessage {
    /// Ask the receiver to peer with us. Carries our latest signed link state.
    PeeringRequest {
        node_info: Bytes,
    },

    /// A flooded or heartbeat link-state announcement, forwarded verbatim.
    LinkStateUpdate {
        bytes: Bytes,
    },

    /// Tell the peer that an outgoing settlement was completed.
    Settlement {
        settlement_scheme_id: SettlementSchemeId,
        amount: Amount,
        proof: Bytes,
    },
}

impl PeerMessage {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::PeeringRequest { .. } => "peeringRequest",
            PeerMessage::LinkStateUpdate { .. } => "linkStateUpdate",
            PeerMessage::Settlement { .. } => "settlement",
        }
    }

    /// Check if this message respects size limits.
    pub fn validate_limits(&self) -> Result<(), &'static str> {
        match self {
            PeerMessage::PeeringRequest { node_info } => {
                if node_info.len() > limits::MAX_LINK_STATE_BYTES {
                    return Err("node info too large");
                }
            }
            PeerMessage::LinkStateUpdate { bytes } => {
                if bytes.len() > limits::MAX_LINK_STATE_BYTES {
                    return Err("link state update too large");
                }
            }
            PeerMessage::Settlement {
                settlement_scheme_id,
                proof,
                ..
            } => {
                if settlement_scheme_id.as_str().len() > limits::MAX_SCHEME_ID_LEN {
                    return Err("settlement scheme id too long");
                }
                if proof.len() > limits::MAX_PROOF_BYTES {
                    return Err("settlement proof too large");
                }
            }
        }
        Ok(())
    }
}

/// Serialize/parse capability for peer messages.
pub trait MessageCodec: Send + Sync {
    fn serialize(&self, message: &PeerMessage) -> Result<Bytes, CodecError>;

    fn parse(&self, bytes: &[u8]) -> Result<PeerMessage, CodecError>;
}

/// CBOR codec for peer messages. Enforces [`limits`] in both directions.
#[derive(Debug, Clone, Copy, Default)]
pub struct CborCodec;

impl MessageCodec for CborCodec {
    fn serialize(&self, message: &PeerMessage) -> Result<Bytes, CodecError> {
        message.validate_limits().map_err(CodecError::TooLarge)?;

        let mut buf = Vec::new();
        ciborium::into_writer(message, &mut buf).map_err(|e| CodecError::Serialize(e.to_string()))?;
        Ok(Bytes::from(buf))
    }

    fn parse(&self, bytes: &[u8]) -> Result<PeerMessage, CodecError> {
        let message: PeerMessage =
            ciborium::from_reader(bytes).map_err(|e| CodecError::Parse(e.to_string()))?;
        message.validate_limits().map_err(CodecError::TooLarge)?;
        Ok(message)
    }
}
