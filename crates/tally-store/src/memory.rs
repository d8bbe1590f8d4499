//! In-memory implementation of the TableStore trait.
//!
//! Same semantics as SQLite, nothing survives a drop. Used by tests and by
//! nodes that do not need to persist their tables.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use tally_core::NodeKey;

use crate::error::Result;
use crate::node_table::NodeTableEntry;
use crate::peer_table::PeerTableEntry;
use crate::traits::{as_persisted, TableStore};

/// In-memory table store.
#[derive(Default)]
pub struct MemoryTableStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    nodes: HashMap<NodeKey, NodeTableEntry>,
    peers: HashMap<NodeKey, PeerTableEntry>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn save_node(&self, entry: &NodeTableEntry) -> Result<()> {
        self.inner.write().nodes.insert(entry.key(), as_persisted(entry));
        Ok(())
    }

    async fn load_nodes(&self) -> Result<Vec<NodeTableEntry>> {
        let mut nodes: Vec<NodeTableEntry> = self.inner.read().nodes.values().cloned().collect();
        nodes.sort_by_key(|entry| entry.key());
        Ok(nodes)
    }

    async fn delete_node(&self, key: &NodeKey) -> Result<bool> {
        Ok(self.inner.write().nodes.remove(key).is_some())
    }

    async fn save_peer(&self, entry: &PeerTableEntry) -> Result<()> {
        self.inner.write().peers.insert(entry.key(), entry.clone());
        Ok(())
    }

    async fn load_peers(&self) -> Result<Vec<PeerTableEntry>> {
        let mut peers: Vec<PeerTableEntry> = self.inner.read().peers.values().cloned().collect();
        peers.sort_by_key(|entry| entry.key());
        Ok(peers)
    }

    async fn delete_peer(&self, key: &NodeKey) -> Result<bool> {
        Ok(self.inner.write().peers.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_table::{NodePeerState, RetransmitDeadline};
    use crate::peer_table::PeeringState;
    use bytes::Bytes;
    use tally_core::{NodeId, PublicKey, SettlementSchemeId, SubnetId};

    #[tokio::test]
    async fn test_node_roundtrip_drops_flood_state() {
        let store = MemoryTableStore::new();

        let mut entry = NodeTableEntry::new(SubnetId::new("test"), NodeId::from_bytes([1; 32]));
        entry.sequence = 9;
        entry.last_link_state_update = Some(Bytes::from_static(b"signed"));
        entry.update_received_counter = 2;
        entry.scheduled_retransmit_time = RetransmitDeadline::At(1234);
        entry.peer_state = NodePeerState::Peered {
            settlement_scheme_id: SettlementSchemeId::new("stub"),
        };

        store.save_node(&entry).await.unwrap();
        let loaded = store.load_nodes().await.unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].sequence, 9);
        assert_eq!(loaded[0].peer_state, entry.peer_state);
        assert_eq!(loaded[0].update_received_counter, 0);
        assert_eq!(loaded[0].scheduled_retransmit_time, RetransmitDeadline::Never);

        assert!(store.delete_node(&entry.key()).await.unwrap());
        assert!(!store.delete_node(&entry.key()).await.unwrap());
    }

    #[tokio::test]
    async fn test_peer_upsert() {
        let store = MemoryTableStore::new();
        let mut peer = PeerTableEntry {
            subnet_id: SubnetId::new("test"),
            node_id: NodeId::from_bytes([2; 32]),
            state: PeeringState::RequestPeering,
            url: "https://peer.example".into(),
            node_public_key: PublicKey::from_bytes([2; 32]),
            last_seen: 0,
        };
        store.save_peer(&peer).await.unwrap();

        peer.state = PeeringState::Peered;
        store.save_peer(&peer).await.unwrap();

        let peers = store.load_peers().await.unwrap();
        assert_eq!(peers, vec![peer]);
    }
}
