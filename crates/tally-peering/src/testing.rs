//! Test helpers shared by this crate's unit tests.

use std::collections::HashSet;
use parking_lot::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use tally_core::{Keypair, NodeId, NodeInfo, PublicKey, SettlementSchemeId, SignedNodeInfo, SubnetId};
use tally_store::{PeerTableEntry, PeeringState};

use crate::error::{PeeringError, Result};
use crate::transport::Transport;

pub fn subnet() -> SubnetId {
    SubnetId::new("test")
}

/// Signed, encoded link-state bytes for `keypair` at `sequence`.
pub fn announcement(keypair: &Keypair, sequence: u64) -> Bytes {
    let public_key = keypair.public_key();
    let info = NodeInfo {
        subnet_id: subnet(),
        node_id: NodeId::derive(&public_key),
        sequence,
        url: "https://node.example/peer".into(),
        node_public_key: public_key,
        settlement_scheme_id: SettlementSchemeId::new("stub"),
        neighbors: Vec::new(),
    };
    SignedNodeInfo::sign(&info, keypair).unwrap().encode().unwrap()
}

pub fn peered_entry(node_id: NodeId) -> PeerTableEntry {
    PeerTableEntry {
        subnet_id: subnet(),
        node_id,
        state: PeeringState::Peered,
        url: format!("https://{}.example/peer", node_id),
        node_public_key: PublicKey::from_bytes(*node_id.as_bytes()),
        last_seen: 0,
    }
}

/// Records every send. Sends to nodes marked with `fail_for` fail.
pub struct RecordingTransport {
    node_id: NodeId,
    sent: Mutex<Vec<(NodeId, Bytes)>>,
    failing: Mutex<HashSet<NodeId>>,
}

impl RecordingTransport {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            sent: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn sent(&self) -> Vec<(NodeId, Bytes)> {
        self.sent.lock().clone()
    }

    pub fn fail_for(&self, node_id: NodeId) {
        self.failing.lock().insert(node_id);
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, destination: &NodeId, message: Bytes) -> Result<()> {
        if self.failing.lock().contains(destination) {
            return Err(PeeringError::PeerNotConnected(destination.to_string()));
        }
        self.sent.lock().push((*destination, message));
        Ok(())
    }

    async fn recv(&self) -> Result<(NodeId, Bytes)> {
        std::future::pending().await
    }

    fn local_node_id(&self) -> NodeId {
        self.node_id
    }
}
