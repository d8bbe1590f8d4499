//! Signed link-state announcements.
//!
//! A node describes itself with a [`NodeInfo`], encodes it to CBOR, signs
//! the encoded bytes, and wraps both in a [`SignedNodeInfo`] envelope. The
//! envelope's own encoding is what peers store and re-broadcast verbatim.
//!
//! ```text
//! envelope = CBOR { signed: CBOR(NodeInfo), signature: Ed25519(signed) }
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::crypto::{Keypair, PublicKey, Signature};
use crate::error::CoreError;
use crate::types::{NodeId, NodeKey, SettlementSchemeId, SubnetId};

/// A node's self-description at a given sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub subnet_id: SubnetId,
    pub node_id: NodeId,
    /// Monotonic counter chosen by the announcing node.
    pub sequence: u64,
    /// Where the node accepts peer messages.
    pub url: String,
    pub node_public_key: PublicKey,
    /// Settlement scheme the node offers to its peers.
    pub settlement_scheme_id: SettlementSchemeId,
    /// Nodes this node is currently peered with.
    pub neighbors: Vec<NodeId>,
}

impl NodeInfo {
    pub fn key(&self) -> NodeKey {
        NodeKey::new(self.subnet_id.clone(), self.node_id)
    }
}

/// The signed envelope carried by `peeringRequest` and `linkStateUpdate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedNodeInfo {
    /// CBOR encoding of a [`NodeInfo`].
    pub signed: Bytes,
    /// Ed25519 signature over `signed`.
    pub signature: Bytes,
}

impl SignedNodeInfo {
    /// Encode and sign a node description.
    pub fn sign(info: &NodeInfo, keypair: &Keypair) -> Result<Self, CoreError> {
        let signed = to_cbor(info)?;
        let signature = keypair.sign(&signed);
        Ok(Self {
            signed: Bytes::from(signed),
            signature: Bytes::copy_from_slice(signature.as_bytes()),
        })
    }

    /// Encode the envelope into the opaque bytes that get flooded.
    pub fn encode(&self) -> Result<Bytes, CoreError> {
        to_cbor(self).map(Bytes::from)
    }

    /// Decode an envelope from opaque link-state bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))
    }

    /// Parse the signed payload without checking the signature.
    pub fn info(&self) -> Result<NodeInfo, CoreError> {
        ciborium::from_reader(&self.signed[..]).map_err(|e| CoreError::DecodingError(e.to_string()))
    }

    /// Parse the signed payload and check that it was signed by the key it
    /// names, and that the node id was derived from that key.
    pub fn verify(&self) -> Result<NodeInfo, CoreError> {
        let info = self.info()?;

        let derived = NodeId::derive(&info.node_public_key);
        if derived != info.node_id {
            return Err(CoreError::NodeIdMismatch {
                claimed: info.node_id.to_hex(),
                derived: derived.to_hex(),
            });
        }

        let signature = Signature::try_from(&self.signature[..])?;
        info.node_public_key.verify(&self.signed, &signature)?;
        Ok(info)
    }
}

fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CoreError::EncodingError(e.to_string()))?;
    Ok(buf)
}
