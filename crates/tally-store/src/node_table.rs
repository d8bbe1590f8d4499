//! The node table: per-(subnet, node) link-state records.
//!
//! Every node we have heard about has one entry holding its latest signed
//! announcement and the bookkeeping the flooder needs to decide whether to
//! forward it. Entries are only reachable through the narrow operations
//! below; there is no raw map access.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use tally_core::{NodeId, NodeKey, SettlementSchemeId, SubnetId};

/// Our local relationship with a node, as tracked by the node table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NodePeerState {
    /// No relationship.
    #[default]
    None,
    /// We asked the node to peer with us.
    RequestPeering,
    /// Peered, settling through the given scheme.
    Peered {
        settlement_scheme_id: SettlementSchemeId,
    },
}

impl NodePeerState {
    pub fn is_peered(&self) -> bool {
        matches!(self, NodePeerState::Peered { .. })
    }

    pub fn settlement_scheme_id(&self) -> Option<&SettlementSchemeId> {
        match self {
            NodePeerState::Peered {
                settlement_scheme_id,
            } => Some(settlement_scheme_id),
            _ => None,
        }
    }
}

/// When an entry becomes eligible for forwarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetransmitDeadline {
    /// Eligible once the clock passes this Unix ms timestamp.
    At(i64),
    /// Never eligible again for the current update.
    Never,
}

impl RetransmitDeadline {
    /// Whether the deadline has elapsed at `now` (Unix ms).
    pub fn has_elapsed(&self, now: i64) -> bool {
        match self {
            RetransmitDeadline::At(at) => *at < now,
            RetransmitDeadline::Never => false,
        }
    }
}

/// A single node table record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTableEntry {
    pub subnet_id: SubnetId,
    pub node_id: NodeId,
    /// Sequence number of `last_link_state_update`.
    pub sequence: u64,
    /// Signed announcement bytes, re-broadcast verbatim.
    pub last_link_state_update: Option<Bytes>,
    /// Times the current update has been taken in: 1 when it arrives,
    /// plus one each time the flooder hands it out for forwarding. Copies
    /// with the same sequence are not counted. Reset when a newer update
    /// arrives; 0 for our own freshly published update.
    pub update_received_counter: u32,
    pub scheduled_retransmit_time: RetransmitDeadline,
    pub peer_state: NodePeerState,
}

impl NodeTableEntry {
    /// A fresh entry with no link state yet.
    pub fn new(subnet_id: SubnetId, node_id: NodeId) -> Self {
        Self {
            subnet_id,
            node_id,
            sequence: 0,
            last_link_state_update: None,
            update_received_counter: 0,
            scheduled_retransmit_time: RetransmitDeadline::Never,
            peer_state: NodePeerState::None,
        }
    }

    pub fn key(&self) -> NodeKey {
        NodeKey::new(self.subnet_id.clone(), self.node_id)
    }
}

/// Partial update applied by [`NodeTable::update_node`]. `None` fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct NodeUpdate {
    pub sequence: Option<u64>,
    pub last_link_state_update: Option<Bytes>,
    pub update_received_counter: Option<u32>,
    pub scheduled_retransmit_time: Option<RetransmitDeadline>,
    pub peer_state: Option<NodePeerState>,
}

impl NodeUpdate {
    fn apply(self, entry: &mut NodeTableEntry) {
        if let Some(sequence) = self.sequence {
            entry.sequence = sequence;
        }
        if let Some(bytes) = self.last_link_state_update {
            entry.last_link_state_update = Some(bytes);
        }
        if let Some(counter) = self.update_received_counter {
            entry.update_received_counter = counter;
        }
        if let Some(deadline) = self.scheduled_retransmit_time {
            entry.scheduled_retransmit_time = deadline;
        }
        if let Some(peer_state) = self.peer_state {
            entry.peer_state = peer_state;
        }
    }
}

/// Result of offering a link-state update to the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStateIngest {
    /// Higher sequence: stored, counter reset to 1, retransmit scheduled.
    New { previous_sequence: Option<u64> },
    /// Same sequence as stored: nothing changed.
    Duplicate { counter: u32 },
    /// Lower sequence: nothing changed.
    Stale { current_sequence: u64 },
}

/// Thread-safe node table.
pub struct NodeTable {
    entries: RwLock<HashMap<NodeKey, NodeTableEntry>>,
    /// Bumped on every mutation so waiters can re-check.
    version: watch::Sender<u64>,
}

impl NodeTable {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            entries: RwLock::new(HashMap::new()),
            version,
        }
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    /// Watch for mutations. The receiver fires after any change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn get(&self, key: &NodeKey) -> Option<NodeTableEntry> {
        self.entries.read().get(key).cloned()
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// A consistent copy of every entry, ordered by key.
    pub fn snapshot(&self) -> Vec<NodeTableEntry> {
        let mut entries: Vec<NodeTableEntry> = self.entries.read().values().cloned().collect();
        entries.sort_by(|a, b| (&a.subnet_id, a.node_id).cmp(&(&b.subnet_id, b.node_id)));
        entries
    }

    /// Insert an entry, replacing any previous one under the same key.
    pub fn add_node(&self, entry: NodeTableEntry) {
        self.entries.write().insert(entry.key(), entry);
        self.bump();
    }

    /// Apply a patch to a single entry. Returns false if the key is unknown.
    pub fn update_node(&self, key: &NodeKey, update: NodeUpdate) -> bool {
        let updated = match self.entries.write().get_mut(key) {
            Some(entry) => {
                update.apply(entry);
                true
            }
            None => false,
        };
        if updated {
            self.bump();
        }
        updated
    }

    pub fn remove_node(&self, key: &NodeKey) -> Option<NodeTableEntry> {
        let removed = self.entries.write().remove(key);
        if removed.is_some() {
            self.bump();
        }
        removed
    }

    /// Offer a link-state update for `key` at `sequence`.
    ///
    /// Sequence numbers only move forward. An update at or below the stored
    /// sequence leaves the entry untouched. A higher one replaces the stored
    /// bytes, resets the receipt counter to one and schedules a
    /// retransmission at `retransmit_at`. Unknown nodes are created with no
    /// peer relationship.
    pub fn ingest_link_state(
        &self,
        key: &NodeKey,
        sequence: u64,
        bytes: Bytes,
        retransmit_at: i64,
    ) -> LinkStateIngest {
        let previous_sequence = {
            let mut entries = self.entries.write();
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| NodeTableEntry::new(key.subnet_id.clone(), key.node_id));

            let previous_sequence = entry.last_link_state_update.as_ref().map(|_| entry.sequence);
            match previous_sequence {
                Some(current) if sequence == current => {
                    return LinkStateIngest::Duplicate {
                        counter: entry.update_received_counter,
                    };
                }
                Some(current) if sequence < current => {
                    return LinkStateIngest::Stale {
                        current_sequence: current,
                    };
                }
                _ => {}
            }

            entry.sequence = sequence;
            entry.last_link_state_update = Some(bytes);
            entry.update_received_counter = 1;
            entry.scheduled_retransmit_time = RetransmitDeadline::At(retransmit_at);
            previous_sequence
        };
        self.bump();
        LinkStateIngest::New { previous_sequence }
    }

    /// Entries due for forwarding: they hold an update, have been received
    /// fewer than `counter_threshold` times, and their deadline has elapsed.
    ///
    /// Each returned entry has its deadline pushed to
    /// [`RetransmitDeadline::Never`] and its counter raised by one in the
    /// same critical section, so an update is handed out at most once per
    /// scheduled deadline and at most `counter_threshold` times overall.
    pub fn take_due_for_retransmit(&self, now: i64, counter_threshold: u32) -> Vec<NodeTableEntry> {
        let due: Vec<NodeTableEntry> = {
            let mut entries = self.entries.write();
            entries
                .values_mut()
                .filter(|entry| {
                    entry.last_link_state_update.is_some()
                        && entry.update_received_counter < counter_threshold
                        && entry.scheduled_retransmit_time.has_elapsed(now)
                })
                .map(|entry| {
                    entry.scheduled_retransmit_time = RetransmitDeadline::Never;
                    entry.update_received_counter = entry.update_received_counter.saturating_add(1);
                    entry.clone()
                })
                .collect()
        };
        if !due.is_empty() {
            self.bump();
        }
        due
    }
}

impl Default for NodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(byte: u8) -> NodeKey {
        NodeKey::new(SubnetId::new("test"), NodeId::from_bytes([byte; 32]))
    }

    #[test]
    fn test_stale_update_leaves_entry_unchanged() {
        let table = NodeTable::new();
        let k = key(0xAA);

        table.ingest_link_state(&k, 5, Bytes::from_static(b"seq5"), 1_000);
        let before = table.get(&k).unwrap();

        let outcome = table.ingest_link_state(&k, 3, Bytes::from_static(b"seq3"), 9_999);
        assert_eq!(outcome, LinkStateIngest::Stale { current_sequence: 5 });
        assert_eq!(table.get(&k).unwrap(), before);
    }

    #[test]
    fn test_duplicate_leaves_entry_unchanged() {
        let table = NodeTable::new();
        let k = key(0xAA);

        table.ingest_link_state(&k, 5, Bytes::from_static(b"seq5"), 1_000);
        let before = table.get(&k).unwrap();
        let outcome = table.ingest_link_state(&k, 5, Bytes::from_static(b"other"), 9_999);

        assert_eq!(outcome, LinkStateIngest::Duplicate { counter: 1 });
        assert_eq!(table.get(&k).unwrap(), before);
    }

    #[test]
    fn test_newer_update_resets_counter() {
        let table = NodeTable::new();
        let k = key(0xAA);

        table.ingest_link_state(&k, 1, Bytes::from_static(b"a"), 10);
        table.update_node(
            &k,
            NodeUpdate {
                update_received_counter: Some(3),
                ..Default::default()
            },
        );

        let outcome = table.ingest_link_state(&k, 2, Bytes::from_static(b"b"), 20);
        assert_eq!(outcome, LinkStateIngest::New { previous_sequence: Some(1) });

        let entry = table.get(&k).unwrap();
        assert_eq!(entry.update_received_counter, 1);
        assert_eq!(entry.sequence, 2);
        assert_eq!(entry.last_link_state_update.unwrap(), Bytes::from_static(b"b"));
        assert_eq!(entry.scheduled_retransmit_time, RetransmitDeadline::At(20));
    }

    #[test]
    fn test_ingest_preserves_peer_state() {
        let table = NodeTable::new();
        let k = key(0xBB);
        let mut entry = NodeTableEntry::new(k.subnet_id.clone(), k.node_id);
        entry.peer_state = NodePeerState::RequestPeering;
        table.add_node(entry);

        table.ingest_link_state(&k, 1, Bytes::from_static(b"a"), 10);
        assert_eq!(table.get(&k).unwrap().peer_state, NodePeerState::RequestPeering);
    }

    #[test]
    fn test_take_due_is_one_shot() {
        let table = NodeTable::new();
        let k = key(0xCC);
        table.ingest_link_state(&k, 1, Bytes::from_static(b"a"), 100);

        assert!(table.take_due_for_retransmit(100, 3).is_empty());
        assert_eq!(table.take_due_for_retransmit(101, 3).len(), 1);
        assert!(table.take_due_for_retransmit(10_000, 3).is_empty());
        assert_eq!(
            table.get(&k).unwrap().scheduled_retransmit_time,
            RetransmitDeadline::Never
        );
    }

    #[test]
    fn test_take_due_respects_counter_threshold() {
        let table = NodeTable::new();
        let k = key(0xCC);
        table.ingest_link_state(&k, 1, Bytes::from_static(b"a"), 100);
        table.update_node(
            &k,
            NodeUpdate {
                update_received_counter: Some(3),
                ..Default::default()
            },
        );
        assert!(table.take_due_for_retransmit(1_000, 3).is_empty());
    }

    #[test]
    fn test_forwarding_counts_toward_threshold() {
        let table = NodeTable::new();
        let k = key(0xCE);
        table.ingest_link_state(&k, 1, Bytes::from_static(b"a"), 100);

        let reschedule = |at| {
            table.update_node(
                &k,
                NodeUpdate {
                    scheduled_retransmit_time: Some(RetransmitDeadline::At(at)),
                    ..Default::default()
                },
            )
        };

        let first = table.take_due_for_retransmit(101, 3);
        assert_eq!(first[0].update_received_counter, 2);

        reschedule(200);
        assert_eq!(table.take_due_for_retransmit(201, 3).len(), 1);
        assert_eq!(table.get(&k).unwrap().update_received_counter, 3);

        // Damped: rescheduling no longer gets it forwarded.
        reschedule(300);
        assert!(table.take_due_for_retransmit(301, 3).is_empty());

        // A newer update starts over.
        table.ingest_link_state(&k, 2, Bytes::from_static(b"b"), 400);
        assert_eq!(table.take_due_for_retransmit(401, 3).len(), 1);
    }

    #[test]
    fn test_update_node_patch() {
        let table = NodeTable::new();
        let k = key(0xDD);
        assert!(!table.update_node(&k, NodeUpdate::default()));

        table.add_node(NodeTableEntry::new(k.subnet_id.clone(), k.node_id));
        let updated = table.update_node(
            &k,
            NodeUpdate {
                peer_state: Some(NodePeerState::Peered {
                    settlement_scheme_id: SettlementSchemeId::new("stub"),
                }),
                ..Default::default()
            },
        );
        assert!(updated);
        assert!(table.get(&k).unwrap().peer_state.is_peered());
        assert_eq!(table.get(&k).unwrap().sequence, 0);
    }

    #[tokio::test]
    async fn test_subscribe_sees_mutations() {
        let table = NodeTable::new();
        let mut rx = table.subscribe();
        table.add_node(NodeTableEntry::new(SubnetId::new("test"), NodeId::from_bytes([1; 32])));
        rx.changed().await.unwrap();
    }

    proptest! {
        #[test]
        fn prop_accepted_sequences_strictly_increase(seqs in prop::collection::vec(0u64..50, 1..40)) {
            let table = NodeTable::new();
            let k = key(0x01);
            let mut accepted: Vec<u64> = Vec::new();

            for (i, seq) in seqs.iter().enumerate() {
                let before = table.get(&k);
                match table.ingest_link_state(&k, *seq, Bytes::from(seq.to_be_bytes().to_vec()), i as i64) {
                    LinkStateIngest::New { .. } => accepted.push(*seq),
                    LinkStateIngest::Duplicate { .. } | LinkStateIngest::Stale { .. } => {
                        prop_assert_eq!(before, table.get(&k));
                    }
                }
            }

            prop_assert!(accepted.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
