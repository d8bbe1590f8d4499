//! The heartbeat driver.
//!
//! At a random moment in every `max_heartbeat_interval` window, each peer
//! gets this node's own latest link-state update: wrapped in a
//! `peeringRequest` while we are still asking to peer, and in a
//! `linkStateUpdate` once peered. A heartbeat is indistinguishable on the
//! wire from a flooded update. When a peering request is accepted by the
//! transport, the peer is promoted to peered.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use tally_core::{now_millis, MessageCodec, NodeId, NodeKey, PeerMessage, SubnetId};
use tally_store::{NodeTable, PeerTable, PeeringState};

use crate::config::PeeringConfig;
use crate::transport::Transport;

/// Result of one heartbeat pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Our own node-table entry for this subnet has no link state yet.
    /// Nothing was sent.
    Deferred { subnet_id: SubnetId },
    Sent(HeartbeatReport),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub peering_requests: usize,
    pub heartbeats: usize,
    pub failed: usize,
    /// Peers promoted from request-peering to peered during this pass.
    pub promoted: Vec<NodeKey>,
}

pub struct HeartbeatDriver {
    node_id: NodeId,
    node_table: Arc<NodeTable>,
    peer_table: Arc<PeerTable>,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn MessageCodec>,
    config: PeeringConfig,
}

impl HeartbeatDriver {
    pub fn new(
        node_id: NodeId,
        node_table: Arc<NodeTable>,
        peer_table: Arc<PeerTable>,
        transport: Arc<dyn Transport>,
        codec: Arc<dyn MessageCodec>,
        config: PeeringConfig,
    ) -> Self {
        Self {
            node_id,
            node_table,
            peer_table,
            transport,
            codec,
            config,
        }
    }

    /// Send one round of heartbeats and peering requests.
    pub async fn tick(&self, now: i64) -> HeartbeatOutcome {
        let peers = self.peer_table.snapshot();

        let subnets: BTreeSet<&SubnetId> = peers.iter().map(|peer| &peer.subnet_id).collect();
        let mut own_updates = Vec::with_capacity(subnets.len());
        for subnet_id in subnets {
            let own = self
                .node_table
                .get(&NodeKey::new(subnet_id.clone(), self.node_id))
                .and_then(|entry| entry.last_link_state_update);
            match own {
                Some(bytes) => own_updates.push((subnet_id.clone(), bytes)),
                None => {
                    tracing::debug!(subnet = %subnet_id, "own link state not yet available, deferring heartbeats");
                    return HeartbeatOutcome::Deferred {
                        subnet_id: subnet_id.clone(),
                    };
                }
            }
        }

        let mut report = HeartbeatReport::default();
        for peer in &peers {
            let Some((_, own)) = own_updates.iter().find(|(subnet, _)| subnet == &peer.subnet_id) else {
                continue;
            };

            let message = match peer.state {
                PeeringState::RequestPeering => {
                    tracing::debug!(subnet = %peer.subnet_id, to = %peer.node_id, "sending peering request");
                    PeerMessage::PeeringRequest {
                        node_info: own.clone(),
                    }
                }
                PeeringState::Peered => {
                    tracing::debug!(subnet = %peer.subnet_id, to = %peer.node_id, "sending heartbeat");
                    PeerMessage::LinkStateUpdate { bytes: own.clone() }
                }
            };

            let bytes = match self.codec.serialize(&message) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(kind = message.kind(), error = %e, "failed to serialize heartbeat message");
                    report.failed += 1;
                    continue;
                }
            };

            match self.transport.send(&peer.node_id, bytes).await {
                Ok(()) => match peer.state {
                    PeeringState::RequestPeering => {
                        report.peering_requests += 1;
                        if self.peer_table.mark_peered(&peer.key(), now) {
                            tracing::info!(peer = %peer.node_id, "peering request accepted");
                            report.promoted.push(peer.key());
                        }
                    }
                    PeeringState::Peered => report.heartbeats += 1,
                },
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(to = %peer.node_id, kind = message.kind(), error = %e, "failed to send heartbeat");
                }
            }
        }

        HeartbeatOutcome::Sent(report)
    }

    fn next_delay(&self) -> Duration {
        let max = (self.config.max_heartbeat_interval.as_millis() as u64).max(1);
        Duration::from_millis(rand::thread_rng().gen_range(0..max))
    }

    /// Drive heartbeats until cancelled.
    ///
    /// After a pass the driver sleeps for a random delay, waking early when
    /// the set of peers changes. A deferred pass waits for the node table
    /// to change instead.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut node_changes = self.node_table.subscribe();
        let mut peer_changes = self.peer_table.subscribe();
        let mut known_peers = self.peer_table.keys();

        loop {
            match self.tick(now_millis()).await {
                HeartbeatOutcome::Deferred { .. } => {
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        changed = node_changes.changed() => {
                            if changed.is_err() {
                                return;
                            }
                        }
                    }
                }
                HeartbeatOutcome::Sent(_) => {
                    let sleep = tokio::time::sleep(self.next_delay());
                    tokio::pin!(sleep);
                    loop {
                        tokio::select! {
                            _ = shutdown.cancelled() => return,
                            _ = &mut sleep => break,
                            changed = peer_changes.changed() => {
                                if changed.is_err() {
                                    return;
                                }
                                let peers = self.peer_table.keys();
                                if peers != known_peers {
                                    known_peers = peers;
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}
