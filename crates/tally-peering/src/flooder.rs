//! The link-state flooder.
//!
//! Every `flood_interval` the flooder takes the node-table entries that are
//! due for forwarding and sends each one, verbatim, to every peered node
//! except the one that originated it. Taking an entry pushes its deadline to
//! "never", so each update is forwarded at most once per node. Send failures
//! are logged and dropped: neighbours run the same process, and their
//! forwarding provides the redundancy.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use tally_core::{now_millis, MessageCodec, PeerMessage};
use tally_store::{NodeTable, PeerTable};

use crate::config::PeeringConfig;
use crate::error::{PeeringError, Result};
use crate::transport::Transport;

/// Counters from one flooder tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FloodReport {
    /// Updates taken for forwarding.
    pub updates: usize,
    /// Messages handed to the transport successfully.
    pub sent: usize,
    /// Messages the transport rejected.
    pub failed: usize,
}

pub struct Flooder {
    node_table: Arc<NodeTable>,
    peer_table: Arc<PeerTable>,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn MessageCodec>,
    config: PeeringConfig,
}

impl Flooder {
    pub fn new(
        node_table: Arc<NodeTable>,
        peer_table: Arc<PeerTable>,
        transport: Arc<dyn Transport>,
        codec: Arc<dyn MessageCodec>,
        config: PeeringConfig,
    ) -> Self {
        Self {
            node_table,
            peer_table,
            transport,
            codec,
            config,
        }
    }

    /// Run one flooding pass at wall-clock time `now` (Unix ms).
    ///
    /// Fails only if a stored update cannot be serialized, which means the
    /// node table holds something it never should have accepted.
    pub async fn tick(&self, now: i64) -> Result<FloodReport> {
        let due = self
            .node_table
            .take_due_for_retransmit(now, self.config.counter_threshold);
        if due.is_empty() {
            return Ok(FloodReport::default());
        }

        let peers = self.peer_table.peered();
        let mut report = FloodReport {
            updates: due.len(),
            ..Default::default()
        };

        for node in due {
            let bytes = node.last_link_state_update.clone().ok_or_else(|| {
                PeeringError::Invariant(format!("node {} due for forwarding without an update", node.key()))
            })?;
            let message = self
                .codec
                .serialize(&PeerMessage::LinkStateUpdate { bytes })
                .map_err(|e| {
                    PeeringError::Invariant(format!(
                        "stored link state of {} does not serialize: {}",
                        node.key(),
                        e
                    ))
                })?;

            for peer in peers.iter().filter(|peer| peer.node_id != node.node_id) {
                tracing::debug!(
                    from = %node.node_id,
                    to = %peer.node_id,
                    sequence = node.sequence,
                    "retransmit link state update"
                );

                match self.transport.send(&peer.node_id, message.clone()).await {
                    Ok(()) => report.sent += 1,
                    Err(e) => {
                        report.failed += 1;
                        tracing::error!(
                            from = %node.node_id,
                            to = %peer.node_id,
                            sequence = node.sequence,
                            error = %e,
                            "failed to retransmit link state update"
                        );
                    }
                }
            }
        }

        Ok(report)
    }

    /// Tick every `flood_interval` until cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let mut interval = tokio::time::interval(self.config.flood_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = interval.tick() => {
                    if let Err(e) = self.tick(now_millis()).await {
                        tracing::error!(error = %e, "link state flooder stopped");
                        return Err(e);
                    }
                }
            }
        }
    }
}
