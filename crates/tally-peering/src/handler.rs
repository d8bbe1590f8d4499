//! Inbound peer message handling.
//!
//! Parses a message from an authenticated sender and applies its effect on
//! the node and peer tables. Settlement messages touch neither table; they
//! are returned to the caller, which owns the ledger.
//!
//! Peering requests are accepted without checking the signature or sequence
//! of the enclosed node info. Authentication of the sender is the
//! transport's job; this layer only trusts it.

use std::sync::Arc;

use bytes::Bytes;

use tally_core::{Amount, MessageCodec, NodeId, NodeKey, PeerMessage, SettlementSchemeId, SignedNodeInfo};
use tally_store::{NodeTable, PeerTable, PeerTableEntry, PeeringState, UpsertResult};

use crate::config::PeeringConfig;
use crate::error::Result;
use crate::ingest::{ingest_link_state, IngestReport};

/// The effect of one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// A peering request was accepted; the peer is now peered.
    PeeringAccepted {
        peer: PeerTableEntry,
        result: UpsertResult,
    },
    /// A link-state update was offered to the node table.
    LinkState(IngestReport),
    /// The sender reports a completed settlement towards us.
    SettlementReceived {
        from: NodeId,
        settlement_scheme_id: SettlementSchemeId,
        amount: Amount,
        proof: Bytes,
    },
}

pub struct InboundHandler {
    node_table: Arc<NodeTable>,
    peer_table: Arc<PeerTable>,
    codec: Arc<dyn MessageCodec>,
    config: PeeringConfig,
}

impl InboundHandler {
    pub fn new(
        node_table: Arc<NodeTable>,
        peer_table: Arc<PeerTable>,
        codec: Arc<dyn MessageCodec>,
        config: PeeringConfig,
    ) -> Self {
        Self {
            node_table,
            peer_table,
            codec,
            config,
        }
    }

    /// Handle one serialized message from `sender`, received at `now` (Unix ms).
    ///
    /// Errors are protocol-transient: the message is dropped and no table
    /// was modified.
    pub fn handle(&self, sender: &NodeId, bytes: &[u8], now: i64) -> Result<InboundEvent> {
        let message = self.codec.parse(bytes)?;
        tracing::trace!(from = %sender, kind = message.kind(), "inbound peer message");

        match message {
            PeerMessage::PeeringRequest { node_info } => self.handle_peering_request(&node_info, now),
            PeerMessage::LinkStateUpdate { bytes } => {
                let report = ingest_link_state(&self.node_table, &self.config, bytes, now)?;
                self.peer_table
                    .touch(&NodeKey::new(report.info.subnet_id.clone(), *sender), now);
                Ok(InboundEvent::LinkState(report))
            }
            PeerMessage::Settlement {
                settlement_scheme_id,
                amount,
                proof,
            } => Ok(InboundEvent::SettlementReceived {
                from: *sender,
                settlement_scheme_id,
                amount,
                proof,
            }),
        }
    }

    fn handle_peering_request(&self, node_info: &[u8], now: i64) -> Result<InboundEvent> {
        let info = SignedNodeInfo::decode(node_info)?.info()?;

        let peer = PeerTableEntry {
            subnet_id: info.subnet_id,
            node_id: info.node_id,
            state: PeeringState::Peered,
            url: info.url,
            node_public_key: info.node_public_key,
            last_seen: now,
        };
        let result = self.peer_table.upsert_peer(peer.clone());

        match result {
            UpsertResult::Inserted => tracing::info!(peer = %peer.node_id, subnet = %peer.subnet_id, "accepted peering request"),
            UpsertResult::Updated { .. } => tracing::debug!(peer = %peer.node_id, "refreshed peering"),
        }

        Ok(InboundEvent::PeeringAccepted { peer, result })
    }
}
