//! The Node: one Tally process.
//!
//! A node owns the node table, the peer table and the ledger, and runs the
//! processes that share them:
//!
//! - the link-state flooder
//! - the heartbeat driver
//! - an inbound loop reading the transport
//! - a peering reconciler that follows the peer table
//! - one settlement loop per peered node (inside the settlement engine)
//!
//! The reconciler is the only place peer relationships turn into ledger
//! accounts and settlement loops. Whenever the peer table changes it compares
//! the peered set against the running settlement loops, sets up the new
//! peers and tears down the ones that left.

use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use tally_core::{
    now_millis, CborCodec, Keypair, MessageCodec, NodeId, NodeInfo, NodeKey, PublicKey,
    SignedNodeInfo,
};
use tally_ledger::{cleanup_peer, initialize_peer, Ledger, PeerAccountSnapshot};
use tally_peering::{Flooder, HeartbeatDriver, InboundEvent, InboundHandler, Transport};
use tally_settlement::{SettlementBackend, SettlementEngine, SettlementSchemes};
use tally_store::{
    NodePeerState, NodeTable, NodeTableEntry, NodeUpdate, PeerTable, PeerTableEntry, PeeringState,
    RetransmitDeadline, TableStore, TableStoreExt,
};

use crate::config::NodeConfig;
use crate::error::{NodeError, Result};

/// Peers set up and torn down by one reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<NodeId>,
    pub stopped: Vec<NodeId>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty()
    }
}

/// Rows loaded by [`Node::restore`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RestoreReport {
    pub nodes: usize,
    pub peers: usize,
}

struct RunningTasks {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// A Tally node.
pub struct Node {
    keypair: Keypair,
    node_id: NodeId,
    config: NodeConfig,
    node_table: Arc<NodeTable>,
    peer_table: Arc<PeerTable>,
    ledger: Arc<Ledger>,
    schemes: Arc<SettlementSchemes>,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn MessageCodec>,
    handler: InboundHandler,
    settlement: SettlementEngine,
    publish_lock: Mutex<()>,
    tasks: Mutex<Option<RunningTasks>>,
}

impl Node {
    /// Create a node with an unbounded ledger.
    pub fn new(keypair: Keypair, config: NodeConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::with_ledger(keypair, config, transport, Ledger::new())
    }

    /// Create a node around an existing ledger, e.g. one with a limit policy.
    pub fn with_ledger(
        keypair: Keypair,
        config: NodeConfig,
        transport: Arc<dyn Transport>,
        ledger: Ledger,
    ) -> Result<Self> {
        let node_id = NodeId::derive(&keypair.public_key());
        if transport.local_node_id() != node_id {
            return Err(NodeError::IdentityMismatch {
                node: node_id.to_string(),
                transport: transport.local_node_id().to_string(),
            });
        }

        let node_table = Arc::new(NodeTable::new());
        let peer_table = Arc::new(PeerTable::new());
        let ledger = Arc::new(ledger);
        let schemes = Arc::new(SettlementSchemes::new());
        let codec: Arc<dyn MessageCodec> = Arc::new(CborCodec);

        let handler = InboundHandler::new(
            node_table.clone(),
            peer_table.clone(),
            codec.clone(),
            config.peering.clone(),
        );
        let settlement = SettlementEngine::new(
            ledger.clone(),
            schemes.clone(),
            transport.clone(),
            codec.clone(),
            config.settlement.clone(),
        );

        Ok(Self {
            keypair,
            node_id,
            config,
            node_table,
            peer_table,
            ledger,
            schemes,
            transport,
            codec,
            handler,
            settlement,
            publish_lock: Mutex::new(()),
            tasks: Mutex::new(None),
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// This node's key in its own subnet.
    pub fn key(&self) -> NodeKey {
        NodeKey::new(self.config.subnet_id.clone(), self.node_id)
    }

    pub fn node_table(&self) -> &Arc<NodeTable> {
        &self.node_table
    }

    pub fn peer_table(&self) -> &Arc<PeerTable> {
        &self.peer_table
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn settlement(&self) -> &SettlementEngine {
        &self.settlement
    }

    /// Make a settlement backend available under `scheme`.
    pub fn register_scheme(&self, scheme: impl Into<String>, backend: Arc<dyn SettlementBackend>) {
        self.schemes
            .register(tally_core::SettlementSchemeId::new(scheme), backend);
    }

    /// Read the ledger accounts of a peer.
    pub fn peer_accounts(&self, peer: &NodeId) -> Option<PeerAccountSnapshot> {
        tally_ledger::peer_accounts(&self.ledger, &self.config.settlement_scheme_id, peer)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Link state
    // ─────────────────────────────────────────────────────────────────────────

    /// Sign a fresh announcement of this node and store it in the node table.
    ///
    /// The sequence is one above the stored one. The new update is due for
    /// flooding immediately. Returns the new sequence.
    pub fn publish_own_link_state(&self) -> Result<u64> {
        let _guard = self.publish_lock.lock();
        let key = self.key();
        let now = now_millis();

        let existing = self.node_table.get(&key);
        let sequence = existing.as_ref().map_or(1, |entry| entry.sequence + 1);
        let neighbors = self
            .peer_table
            .peered()
            .into_iter()
            .filter(|peer| peer.subnet_id == self.config.subnet_id)
            .map(|peer| peer.node_id)
            .collect();

        let info = NodeInfo {
            subnet_id: self.config.subnet_id.clone(),
            node_id: self.node_id,
            sequence,
            url: self.config.url.clone(),
            node_public_key: self.keypair.public_key(),
            settlement_scheme_id: self.config.settlement_scheme_id.clone(),
            neighbors,
        };
        let bytes = SignedNodeInfo::sign(&info, &self.keypair)?.encode()?;

        let update = NodeUpdate {
            sequence: Some(sequence),
            last_link_state_update: Some(bytes.clone()),
            update_received_counter: Some(0),
            scheduled_retransmit_time: Some(RetransmitDeadline::At(now)),
            ..Default::default()
        };
        if !self.node_table.update_node(&key, update) {
            let mut entry = NodeTableEntry::new(self.config.subnet_id.clone(), self.node_id);
            entry.sequence = sequence;
            entry.last_link_state_update = Some(bytes);
            entry.scheduled_retransmit_time = RetransmitDeadline::At(now);
            self.node_table.add_node(entry);
        }

        tracing::debug!(node = %self.node_id, sequence, "published own link state");
        Ok(sequence)
    }

    /// This node's latest signed announcement, if published.
    pub fn own_link_state(&self) -> Option<Bytes> {
        self.node_table
            .get(&self.key())
            .and_then(|entry| entry.last_link_state_update)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Peering
    // ─────────────────────────────────────────────────────────────────────────

    /// Ask the node with `node_public_key` to peer with us.
    ///
    /// The heartbeat driver sends the request. Returns false if the node is
    /// already in the peer table, in either state.
    pub fn request_peering(&self, node_public_key: PublicKey, url: impl Into<String>) -> bool {
        let node_id = NodeId::derive(&node_public_key);
        let key = NodeKey::new(self.config.subnet_id.clone(), node_id);
        if node_id == self.node_id || self.peer_table.get(&key).is_some() {
            return false;
        }

        self.peer_table.upsert_peer(PeerTableEntry {
            subnet_id: self.config.subnet_id.clone(),
            node_id,
            state: PeeringState::RequestPeering,
            url: url.into(),
            node_public_key,
            last_seen: 0,
        });
        if !self.node_table.update_node(
            &key,
            NodeUpdate {
                peer_state: Some(NodePeerState::RequestPeering),
                ..Default::default()
            },
        ) {
            let mut entry = NodeTableEntry::new(self.config.subnet_id.clone(), node_id);
            entry.peer_state = NodePeerState::RequestPeering;
            self.node_table.add_node(entry);
        }

        tracing::info!(peer = %node_id, "requesting peering");
        true
    }

    /// End the relationship with `peer`: stop settling, drop its accounts
    /// and forget it in the peer table. Returns false if it was unknown.
    pub fn end_peering(&self, peer: &NodeId) -> bool {
        let key = NodeKey::new(self.config.subnet_id.clone(), *peer);
        let removed = self.peer_table.remove_peer(&key).is_some();
        let torn_down = self.teardown_peer(peer);
        if !(removed || torn_down) {
            return false;
        }

        tracing::info!(peer = %peer, "peering ended");
        if self.own_link_state().is_some() {
            if let Err(e) = self.publish_own_link_state() {
                tracing::error!(error = %e, "failed to publish own link state");
            }
        }
        true
    }

    /// Bring settlement in line with the peer table.
    ///
    /// Every peered node in this subnet gets accounts and a settlement loop;
    /// every running loop whose peer is gone is torn down. If anything
    /// changed and the node has published before, it republishes.
    pub fn reconcile(&self) -> ReconcileReport {
        let peered: BTreeSet<NodeId> = self
            .peer_table
            .peered()
            .into_iter()
            .filter(|peer| peer.subnet_id == self.config.subnet_id)
            .map(|peer| peer.node_id)
            .collect();
        let running: BTreeSet<NodeId> = self.settlement.running_peers().into_iter().collect();

        let mut report = ReconcileReport::default();
        for peer in peered.difference(&running) {
            self.setup_peer(peer);
            report.started.push(*peer);
        }
        for peer in running.difference(&peered) {
            self.teardown_peer(peer);
            report.stopped.push(*peer);
        }

        // Our announcement lists our neighbours.
        if !report.is_empty() && self.own_link_state().is_some() {
            if let Err(e) = self.publish_own_link_state() {
                tracing::error!(error = %e, "failed to publish own link state");
            }
        }
        report
    }

    fn setup_peer(&self, peer: &NodeId) {
        let scheme = self.config.settlement_scheme_id.clone();
        let key = NodeKey::new(self.config.subnet_id.clone(), *peer);
        let peer_state = NodePeerState::Peered {
            settlement_scheme_id: scheme.clone(),
        };

        if !self.node_table.update_node(
            &key,
            NodeUpdate {
                peer_state: Some(peer_state.clone()),
                ..Default::default()
            },
        ) {
            let mut entry = NodeTableEntry::new(self.config.subnet_id.clone(), *peer);
            entry.peer_state = peer_state;
            self.node_table.add_node(entry);
        }

        initialize_peer(&self.ledger, &scheme, peer);
        self.settlement.start_peer(*peer, scheme);
    }

    fn teardown_peer(&self, peer: &NodeId) -> bool {
        let scheme = &self.config.settlement_scheme_id;
        let key = NodeKey::new(self.config.subnet_id.clone(), *peer);

        let stopped = self.settlement.stop_peer(peer);
        cleanup_peer(&self.ledger, scheme, peer);
        let reset = self.node_table.update_node(
            &key,
            NodeUpdate {
                peer_state: Some(NodePeerState::None),
                ..Default::default()
            },
        );
        stopped || reset
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound
    // ─────────────────────────────────────────────────────────────────────────

    /// Handle one serialized message from `sender`, including recording
    /// an incoming settlement.
    ///
    /// Errors only concern this message; it is dropped and nothing changed.
    pub async fn handle_message(&self, sender: &NodeId, bytes: &[u8]) -> Result<InboundEvent> {
        let event = self.accept_message(sender, bytes)?;
        self.record_settlement(&event).await?;
        Ok(event)
    }

    /// The synchronous part of handling a message: table updates and
    /// peering. Settlements are only parsed here.
    fn accept_message(&self, sender: &NodeId, bytes: &[u8]) -> Result<InboundEvent> {
        let event = self.handler.handle(sender, bytes, now_millis())?;
        if let InboundEvent::PeeringAccepted { .. } = event {
            self.reconcile();
        }
        Ok(event)
    }

    /// Hand an incoming settlement to its scheme backend and record it.
    /// Other events need nothing more.
    async fn record_settlement(&self, event: &InboundEvent) -> Result<()> {
        if let InboundEvent::SettlementReceived {
            from,
            settlement_scheme_id,
            amount,
            proof,
        } = event
        {
            self.settlement
                .handle_incoming_settlement(from, settlement_scheme_id, *amount, proof)
                .await?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    pub fn is_running(&self) -> bool {
        self.tasks.lock().is_some()
    }

    /// Start the node's processes. Publishes the node's link state first if
    /// it has none yet.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut tasks = self.tasks.lock();
        if tasks.is_some() {
            return Err(NodeError::AlreadyRunning);
        }

        if self.own_link_state().is_none() {
            self.publish_own_link_state()?;
        }
        self.reconcile();

        let shutdown = CancellationToken::new();
        let peering = &self.config.peering;

        let flooder = Flooder::new(
            self.node_table.clone(),
            self.peer_table.clone(),
            self.transport.clone(),
            self.codec.clone(),
            peering.clone(),
        );
        let heartbeat = HeartbeatDriver::new(
            self.node_id,
            self.node_table.clone(),
            self.peer_table.clone(),
            self.transport.clone(),
            self.codec.clone(),
            peering.clone(),
        );

        let flood_shutdown = shutdown.clone();
        let handles = vec![
            tokio::spawn(async move {
                if flooder.run(flood_shutdown.clone()).await.is_err() {
                    tracing::error!("stopping node after flooder failure");
                    flood_shutdown.cancel();
                }
            }),
            tokio::spawn(heartbeat.run(shutdown.clone())),
            tokio::spawn(self.clone().run_inbound(shutdown.clone())),
            tokio::spawn(self.clone().run_reconciler(shutdown.clone())),
        ];

        *tasks = Some(RunningTasks { shutdown, handles });
        tracing::info!(node = %self.node_id, subnet = %self.config.subnet_id, "node started");
        Ok(())
    }

    /// Stop every process and wait for them to exit.
    pub async fn shutdown(&self) {
        let running = self.tasks.lock().take();
        if let Some(running) = running {
            running.shutdown.cancel();
            for handle in running.handles {
                let _ = handle.await;
            }
        }
        self.settlement.shutdown().await;
        tracing::info!(node = %self.node_id, "node stopped");
    }

    async fn run_inbound(self: Arc<Self>, shutdown: CancellationToken) {
        // Incoming settlements wait on their backend outside the loop.
        let mut settlements: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.transport.recv() => match received {
                    Ok((sender, bytes)) => match self.accept_message(&sender, &bytes) {
                        Ok(event @ InboundEvent::SettlementReceived { .. }) => {
                            let node = self.clone();
                            settlements.spawn(async move {
                                if let Err(e) = node.record_settlement(&event).await {
                                    tracing::warn!(from = %sender, error = %e, "dropped incoming settlement");
                                }
                            });
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(from = %sender, error = %e, "dropped peer message");
                        }
                    },
                    Err(e) => {
                        tracing::error!(error = %e, "transport closed");
                        break;
                    }
                },
                Some(_) = settlements.join_next(), if !settlements.is_empty() => {}
            }
        }

        while settlements.join_next().await.is_some() {}
    }

    async fn run_reconciler(self: Arc<Self>, shutdown: CancellationToken) {
        let mut changes = self.peer_table.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                changed = changes.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let report = self.reconcile();
                    if !report.is_empty() {
                        tracing::debug!(started = report.started.len(), stopped = report.stopped.len(), "peers reconciled");
                    }
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────────────────────────────────────

    /// Write the node and peer tables to `store`, replacing what it held.
    pub async fn checkpoint<S: TableStore + ?Sized>(&self, store: &S) -> Result<()> {
        let nodes = self.node_table.snapshot();
        let peers = self.peer_table.snapshot();

        let live_nodes: BTreeSet<NodeKey> = nodes.iter().map(NodeTableEntry::key).collect();
        for stale in store.load_nodes().await? {
            if !live_nodes.contains(&stale.key()) {
                store.delete_node(&stale.key()).await?;
            }
        }
        let live_peers: BTreeSet<NodeKey> = peers.iter().map(PeerTableEntry::key).collect();
        for stale in store.load_peers().await? {
            if !live_peers.contains(&stale.key()) {
                store.delete_peer(&stale.key()).await?;
            }
        }

        store.save_nodes(&nodes).await?;
        store.save_peers(&peers).await?;
        tracing::debug!(nodes = nodes.len(), peers = peers.len(), "checkpointed tables");
        Ok(())
    }

    /// Load the node and peer tables from `store` and set up settlement for
    /// the peered nodes. Ledger balances are not persisted and start at zero.
    pub async fn restore<S: TableStore + ?Sized>(&self, store: &S) -> Result<RestoreReport> {
        let nodes = store.load_nodes().await?;
        let peers = store.load_peers().await?;
        let report = RestoreReport {
            nodes: nodes.len(),
            peers: peers.len(),
        };

        for node in nodes {
            self.node_table.add_node(node);
        }
        for peer in peers {
            self.peer_table.upsert_peer(peer);
        }
        self.reconcile();

        tracing::info!(nodes = report.nodes, peers = report.peers, "restored tables");
        Ok(report)
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if let Some(running) = self.tasks.get_mut().take() {
            running.shutdown.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{Amount, PeerMessage, SettlementSchemeId, SubnetId};
    use tally_peering::MemoryNetwork;
    use tally_store::MemoryTableStore;
    use tally_testkit::{MockBackend, TestIdentity};

    async fn node(seed: u8) -> (Node, Arc<MemoryNetwork>) {
        let network = MemoryNetwork::new();
        let node = node_on(&network, seed).await;
        (node, network)
    }

    async fn node_on(network: &Arc<MemoryNetwork>, seed: u8) -> Node {
        let identity = TestIdentity::with_seed(seed);
        let transport = network.create_transport(identity.node_id()).await;
        let config = NodeConfig::new("test", format!("https://node-{seed}.example/peer"), "stub");
        Node::new(identity.keypair(), config, Arc::new(transport)).unwrap()
    }

    fn peering_request(from: &TestIdentity) -> Bytes {
        let info = NodeInfo {
            subnet_id: SubnetId::new("test"),
            node_id: from.node_id(),
            sequence: 1,
            url: "https://peer.example".into(),
            node_public_key: from.public_key(),
            settlement_scheme_id: SettlementSchemeId::new("stub"),
            neighbors: vec![],
        };
        let node_info = SignedNodeInfo::sign(&info, &from.keypair()).unwrap().encode().unwrap();
        CborCodec.serialize(&PeerMessage::PeeringRequest { node_info }).unwrap()
    }

    #[tokio::test]
    async fn test_transport_must_match_identity() {
        let network = MemoryNetwork::new();
        let transport = network.create_transport(NodeId::from_bytes([9; 32])).await;
        let result = Node::new(
            TestIdentity::with_seed(1).keypair(),
            NodeConfig::new("test", "", "stub"),
            Arc::new(transport),
        );
        assert!(matches!(result, Err(NodeError::IdentityMismatch { .. })));
    }

    #[tokio::test]
    async fn test_publish_increments_sequence() {
        let (node, _network) = node(1).await;
        assert!(node.own_link_state().is_none());

        assert_eq!(node.publish_own_link_state().unwrap(), 1);
        assert_eq!(node.publish_own_link_state().unwrap(), 2);

        let bytes = node.own_link_state().unwrap();
        let info = SignedNodeInfo::decode(&bytes).unwrap().verify().unwrap();
        assert_eq!(info.sequence, 2);
        assert_eq!(info.node_id, node.node_id());

        let entry = node.node_table().get(&node.key()).unwrap();
        assert_eq!(entry.update_received_counter, 0);
        assert!(matches!(entry.scheduled_retransmit_time, RetransmitDeadline::At(_)));
    }

    #[tokio::test]
    async fn test_peering_request_sets_up_settlement() {
        let (node, _network) = node(1).await;
        let peer = TestIdentity::with_seed(2);

        let event = node.handle_message(&peer.node_id(), &peering_request(&peer)).await.unwrap();
        assert!(matches!(event, InboundEvent::PeeringAccepted { .. }));

        assert!(node.settlement().is_running(&peer.node_id()));
        assert!(node.peer_accounts(&peer.node_id()).is_some());
        let entry = node
            .node_table()
            .get(&NodeKey::new(SubnetId::new("test"), peer.node_id()))
            .unwrap();
        assert_eq!(
            entry.peer_state.settlement_scheme_id(),
            Some(&SettlementSchemeId::new("stub"))
        );

        // A second request changes nothing.
        node.handle_message(&peer.node_id(), &peering_request(&peer)).await.unwrap();
        assert_eq!(node.peer_table().len(), 1);
        assert_eq!(node.ledger().accounts().len(), 3);
    }

    #[tokio::test]
    async fn test_end_peering_removes_everything() {
        let (node, _network) = node(1).await;
        let peer = TestIdentity::with_seed(2);
        node.handle_message(&peer.node_id(), &peering_request(&peer)).await.unwrap();

        assert!(node.end_peering(&peer.node_id()));
        assert!(node.peer_table().is_empty());
        assert!(node.ledger().accounts().is_empty());
        assert!(!node.settlement().is_running(&peer.node_id()));
        let entry = node
            .node_table()
            .get(&NodeKey::new(SubnetId::new("test"), peer.node_id()))
            .unwrap();
        assert_eq!(entry.peer_state, NodePeerState::None);

        assert!(!node.end_peering(&peer.node_id()));
    }

    #[tokio::test]
    async fn test_request_peering_is_idempotent() {
        let (node, _network) = node(1).await;
        let peer = TestIdentity::with_seed(2);

        assert!(node.request_peering(peer.public_key(), "https://peer.example"));
        assert!(!node.request_peering(peer.public_key(), "https://peer.example"));
        assert!(!node.request_peering(node.public_key(), "https://self.example"));

        let entry = node
            .peer_table()
            .get(&NodeKey::new(SubnetId::new("test"), peer.node_id()))
            .unwrap();
        assert_eq!(entry.state, PeeringState::RequestPeering);
        // Not peered yet: no settlement.
        assert!(node.reconcile().is_empty());
        assert!(node.ledger().accounts().is_empty());
    }

    #[tokio::test]
    async fn test_incoming_settlement_message() {
        let (node, _network) = node(1).await;
        node.register_scheme("stub", Arc::new(MockBackend::succeeding()));
        let peer = TestIdentity::with_seed(2);
        node.handle_message(&peer.node_id(), &peering_request(&peer)).await.unwrap();

        let message = CborCodec
            .serialize(&PeerMessage::Settlement {
                settlement_scheme_id: SettlementSchemeId::new("stub"),
                amount: Amount::new(40),
                proof: Bytes::from_static(b"proof"),
            })
            .unwrap();
        node.handle_message(&peer.node_id(), &message).await.unwrap();

        let accounts = node.peer_accounts(&peer.node_id()).unwrap();
        assert_eq!(accounts.interledger.credits_posted, Amount::new(40));
        assert_eq!(accounts.settlement.debits_posted, Amount::new(40));
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn test_slow_incoming_settlement_does_not_block_inbound() {
        let network = MemoryNetwork::new();
        let node = Arc::new(node_on(&network, 1).await);
        let backend = Arc::new(MockBackend::succeeding());
        backend.hold_incoming();
        node.register_scheme("stub", backend.clone());
        node.start().unwrap();

        let bob = TestIdentity::with_seed(2);
        let carol = TestIdentity::with_seed(3);
        let bob_link = network.create_transport(bob.node_id()).await;
        let carol_link = network.create_transport(carol.node_id()).await;

        bob_link.send(&node.node_id(), peering_request(&bob)).await.unwrap();
        wait_until(|| node.peer_accounts(&bob.node_id()).is_some()).await;

        let settlement = CborCodec
            .serialize(&PeerMessage::Settlement {
                settlement_scheme_id: SettlementSchemeId::new("stub"),
                amount: Amount::new(40),
                proof: Bytes::from_static(b"proof"),
            })
            .unwrap();
        bob_link.send(&node.node_id(), settlement).await.unwrap();
        carol_link.send(&node.node_id(), peering_request(&carol)).await.unwrap();

        // Carol gets peered while Bob's settlement is still with the backend.
        wait_until(|| node.peer_accounts(&carol.node_id()).is_some()).await;
        let bob_accounts = node.peer_accounts(&bob.node_id()).unwrap();
        assert_eq!(bob_accounts.interledger.credits_posted, Amount::new(0));
        assert!(backend.received().is_empty());

        backend.release();
        wait_until(|| {
            node.peer_accounts(&bob.node_id())
                .is_some_and(|accounts| accounts.interledger.credits_posted == Amount::new(40))
        })
        .await;

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_incoming_settlement() {
        let network = MemoryNetwork::new();
        let node = Arc::new(node_on(&network, 1).await);
        let backend = Arc::new(MockBackend::succeeding());
        backend.hold_incoming();
        node.register_scheme("stub", backend.clone());
        node.start().unwrap();

        let bob = TestIdentity::with_seed(2);
        let bob_link = network.create_transport(bob.node_id()).await;
        bob_link.send(&node.node_id(), peering_request(&bob)).await.unwrap();
        wait_until(|| node.peer_accounts(&bob.node_id()).is_some()).await;

        let settlement = CborCodec
            .serialize(&PeerMessage::Settlement {
                settlement_scheme_id: SettlementSchemeId::new("stub"),
                amount: Amount::new(25),
                proof: Bytes::from_static(b"proof"),
            })
            .unwrap();
        bob_link.send(&node.node_id(), settlement).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let shutdown = {
            let node = node.clone();
            tokio::spawn(async move { node.shutdown().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!shutdown.is_finished());

        backend.release();
        shutdown.await.unwrap();
        assert_eq!(backend.received().len(), 1);
    }

    #[tokio::test]
    async fn test_settlement_from_unknown_peer_is_transient() {
        let (node, _network) = node(1).await;
        node.register_scheme("stub", Arc::new(MockBackend::succeeding()));

        let message = CborCodec
            .serialize(&PeerMessage::Settlement {
                settlement_scheme_id: SettlementSchemeId::new("stub"),
                amount: Amount::new(40),
                proof: Bytes::new(),
            })
            .unwrap();
        let error = node
            .handle_message(&NodeId::from_bytes([7; 32]), &message)
            .await
            .unwrap_err();
        assert!(error.is_transient());
        assert!(node.ledger().accounts().is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_and_restore() {
        let store = MemoryTableStore::new();
        let peer = TestIdentity::with_seed(2);
        {
            let (node, _network) = node(1).await;
            node.publish_own_link_state().unwrap();
            node.handle_message(&peer.node_id(), &peering_request(&peer)).await.unwrap();
            node.checkpoint(&store).await.unwrap();
        }

        let (restored, _network) = node(1).await;
        let report = restored.restore(&store).await.unwrap();
        assert_eq!(report, RestoreReport { nodes: 2, peers: 1 });
        assert!(restored.settlement().is_running(&peer.node_id()));
        assert!(restored.peer_accounts(&peer.node_id()).is_some());

        // Setting up the restored peer republished, continuing from the stored sequence.
        let stored = store
            .load_nodes()
            .await
            .unwrap()
            .into_iter()
            .find(|entry| entry.node_id == restored.node_id())
            .unwrap();
        let own = restored.node_table().get(&restored.key()).unwrap();
        assert_eq!(own.sequence, stored.sequence + 1);

        // Checkpoint drops rows that are gone from the tables.
        restored.end_peering(&peer.node_id());
        restored.checkpoint(&store).await.unwrap();
        assert!(store.load_peers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (node, _network) = node(1).await;
        let node = Arc::new(node);
        node.start().unwrap();
        assert!(node.own_link_state().is_some());
        assert!(matches!(node.start(), Err(NodeError::AlreadyRunning)));

        node.shutdown().await;
        assert!(!node.is_running());
    }
}
