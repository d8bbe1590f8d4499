//! Link-state ingestion: the receiving half of flooding.

use bytes::Bytes;
use rand::Rng;

use tally_core::{limits, NodeInfo, SignedNodeInfo};
use tally_store::{LinkStateIngest, NodeTable};

use crate::config::PeeringConfig;
use crate::error::{PeeringError, Result};

/// What happened to an inbound link-state update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    /// The announcement, as parsed from the signed payload.
    pub info: NodeInfo,
    pub outcome: LinkStateIngest,
}

/// Decode a signed link-state update and offer it to the node table.
///
/// The stored bytes are exactly `bytes`, so forwarding re-broadcasts the
/// originator's signature untouched. A fresh update becomes eligible for
/// forwarding after a random delay below `max_retransmit_delay`.
pub fn ingest_link_state(
    table: &NodeTable,
    config: &PeeringConfig,
    bytes: Bytes,
    now: i64,
) -> Result<IngestReport> {
    if bytes.len() > limits::MAX_LINK_STATE_BYTES {
        return Err(PeeringError::Codec(tally_core::CodecError::TooLarge(
            "link state update too large",
        )));
    }

    let envelope = SignedNodeInfo::decode(&bytes)?;
    let info = if config.verify_link_state {
        envelope.verify()?
    } else {
        envelope.info()?
    };

    let retransmit_at = now.saturating_add(retransmit_delay_ms(config));
    let outcome = table.ingest_link_state(&info.key(), info.sequence, bytes, retransmit_at);

    match &outcome {
        LinkStateIngest::New { previous_sequence } => {
            tracing::debug!(
                node = %info.key(),
                sequence = info.sequence,
                previous = ?previous_sequence,
                "accepted link state update"
            );
        }
        LinkStateIngest::Duplicate { counter } => {
            tracing::debug!(node = %info.key(), sequence = info.sequence, counter, "duplicate link state update");
        }
        LinkStateIngest::Stale { current_sequence } => {
            tracing::debug!(
                node = %info.key(),
                sequence = info.sequence,
                current = current_sequence,
                "stale link state update ignored"
            );
        }
    }

    Ok(IngestReport { info, outcome })
}

fn retransmit_delay_ms(config: &PeeringConfig) -> i64 {
    let max = config.max_retransmit_delay.as_millis() as i64;
    if max <= 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..max)
}
