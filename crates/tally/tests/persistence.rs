//! Checkpointing node state to SQLite and restoring it into a fresh node.

use std::sync::Arc;

use tally::core::{NodeKey, SignedNodeInfo, SubnetId};
use tally::peering::MemoryNetwork;
use tally::store::{NodePeerState, PeeringState, SqliteTableStore, TableStore};
use tally::{Node, NodeConfig};
use tally_testkit::TestIdentity;

async fn node(network: &Arc<MemoryNetwork>, identity: &TestIdentity) -> Node {
    let transport = network.create_transport(identity.node_id()).await;
    let config = NodeConfig::new("test", "https://alice.example/peer", "stub");
    Node::new(identity.keypair(), config, Arc::new(transport)).unwrap()
}

#[tokio::test]
async fn test_restart_from_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tables.db");
    let alice = TestIdentity::with_seed(1);
    let bob = TestIdentity::with_seed(2);
    let bob_key = NodeKey::new(SubnetId::new("test"), bob.node_id());

    {
        let network = MemoryNetwork::new();
        let node = node(&network, &alice).await;
        node.publish_own_link_state().unwrap();
        node.publish_own_link_state().unwrap();
        assert!(node.request_peering(bob.public_key(), "https://bob.example/peer"));

        let store = SqliteTableStore::open(&path).unwrap();
        node.checkpoint(&store).await.unwrap();
    }

    let store = SqliteTableStore::open(&path).unwrap();
    assert_eq!(store.load_nodes().await.unwrap().len(), 2);

    let network = MemoryNetwork::new();
    let node = node(&network, &alice).await;
    let report = node.restore(&store).await.unwrap();
    assert_eq!((report.nodes, report.peers), (2, 1));

    // The pending request survives; nothing is peered yet.
    let peer = node.peer_table().get(&bob_key).unwrap();
    assert_eq!(peer.state, PeeringState::RequestPeering);
    assert_eq!(peer.url, "https://bob.example/peer");
    assert_eq!(node.node_table().get(&bob_key).unwrap().peer_state, NodePeerState::RequestPeering);
    assert!(node.settlement().running_peers().is_empty());

    // Our announcement comes back verbatim and is not re-flooded.
    let own = node.node_table().get(&node.key()).unwrap();
    assert_eq!(own.sequence, 2);
    assert_eq!(own.update_received_counter, 0);
    let info = SignedNodeInfo::decode(&node.own_link_state().unwrap())
        .unwrap()
        .verify()
        .unwrap();
    assert_eq!(info.sequence, 2);

    // Publishing continues from the restored sequence.
    assert_eq!(node.publish_own_link_state().unwrap(), 3);
}
