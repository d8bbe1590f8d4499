//! Deterministic identities and link state.

use bytes::Bytes;

use tally_core::{Keypair, NodeId, NodeInfo, PublicKey, SettlementSchemeId, SignedNodeInfo, SubnetId};

/// A node identity derived from a one-byte seed.
#[derive(Debug, Clone)]
pub struct TestIdentity {
    keypair: Keypair,
}

impl TestIdentity {
    pub fn with_seed(seed: u8) -> Self {
        Self {
            keypair: Keypair::from_seed(&[seed; 32]),
        }
    }

    pub fn keypair(&self) -> Keypair {
        self.keypair.clone()
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    pub fn node_id(&self) -> NodeId {
        NodeId::derive(&self.keypair.public_key())
    }

    /// An announcement of this node in `subnet` at `sequence`, with no neighbours.
    pub fn node_info(&self, subnet: &str, sequence: u64) -> NodeInfo {
        NodeInfo {
            subnet_id: SubnetId::new(subnet),
            node_id: self.node_id(),
            sequence,
            url: format!("https://{}.example/peer", self.node_id()),
            node_public_key: self.public_key(),
            settlement_scheme_id: SettlementSchemeId::new("stub"),
            neighbors: Vec::new(),
        }
    }

    /// The encoded signed envelope of [`node_info`](Self::node_info).
    pub fn signed_link_state(&self, subnet: &str, sequence: u64) -> Bytes {
        self.sign(&self.node_info(subnet, sequence))
    }

    /// Sign and encode an arbitrary announcement with this identity's key.
    pub fn sign(&self, info: &NodeInfo) -> Bytes {
        SignedNodeInfo::sign(info, &self.keypair)
            .and_then(|envelope| envelope.encode())
            .unwrap_or_default()
    }
}

/// `count` distinct identities, seeded 1..=count.
pub fn multi_party_identities(count: u8) -> Vec<TestIdentity> {
    (1..=count).map(TestIdentity::with_seed).collect()
}
