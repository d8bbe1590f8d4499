//! The peer table: wire-level peering relationships.
//!
//! An entry exists only for relationships this node initiated
//! ([`PeeringState::RequestPeering`]) or accepted ([`PeeringState::Peered`]).

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use tally_core::{NodeId, NodeKey, PublicKey, SubnetId};

/// Wire peering state. There is no "absent" variant: absence is the lack of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeeringState {
    RequestPeering,
    Peered,
}

impl PeeringState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeeringState::RequestPeering => "request-peering",
            PeeringState::Peered => "peered",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "request-peering" => Some(PeeringState::RequestPeering),
            "peered" => Some(PeeringState::Peered),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerTableEntry {
    pub subnet_id: SubnetId,
    pub node_id: NodeId,
    pub state: PeeringState,
    pub url: String,
    pub node_public_key: PublicKey,
    /// Last time we heard from the peer (Unix ms).
    pub last_seen: i64,
}

impl PeerTableEntry {
    pub fn key(&self) -> NodeKey {
        NodeKey::new(self.subnet_id.clone(), self.node_id)
    }
}

/// Result of [`PeerTable::upsert_peer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertResult {
    Inserted,
    /// Replaced an existing entry that was in the given state.
    Updated { previous: PeeringState },
}

/// Thread-safe peer table.
pub struct PeerTable {
    entries: RwLock<HashMap<NodeKey, PeerTableEntry>>,
    version: watch::Sender<u64>,
}

impl PeerTable {
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

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn get(&self, key: &NodeKey) -> Option<PeerTableEntry> {
        self.entries.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// A consistent copy of every entry, ordered by key.
    pub fn snapshot(&self) -> Vec<PeerTableEntry> {
        let mut entries: Vec<PeerTableEntry> = self.entries.read().values().cloned().collect();
        entries.sort_by(|a, b| (&a.subnet_id, a.node_id).cmp(&(&b.subnet_id, b.node_id)));
        entries
    }

    /// Every peer currently in the `Peered` state.
    pub fn peered(&self) -> Vec<PeerTableEntry> {
        let mut entries: Vec<PeerTableEntry> = self
            .entries
            .read()
            .values()
            .filter(|entry| entry.state == PeeringState::Peered)
            .cloned()
            .collect();
        entries.sort_by(|a, b| (&a.subnet_id, a.node_id).cmp(&(&b.subnet_id, b.node_id)));
        entries
    }

    /// Insert or replace the entry for `entry.key()`. Never creates a second entry.
    pub fn upsert_peer(&self, entry: PeerTableEntry) -> UpsertResult {
        let previous = self.entries.write().insert(entry.key(), entry);
        self.bump();
        match previous {
            Some(previous) => UpsertResult::Updated {
                previous: previous.state,
            },
            None => UpsertResult::Inserted,
        }
    }

    /// Promote a `RequestPeering` entry to `Peered`. Returns false if the
    /// entry is missing or was not requesting.
    pub fn mark_peered(&self, key: &NodeKey, now: i64) -> bool {
        let promoted = match self.entries.write().get_mut(key) {
            Some(entry) if entry.state == PeeringState::RequestPeering => {
                entry.state = PeeringState::Peered;
                entry.last_seen = entry.last_seen.max(now);
                true
            }
            _ => false,
        };
        if promoted {
            self.bump();
        }
        promoted
    }

    /// Keys of every entry, in order.
    pub fn keys(&self) -> Vec<NodeKey> {
        let mut keys: Vec<NodeKey> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Record that we heard from `key` at `now`. Returns false if unknown.
    pub fn touch(&self, key: &NodeKey, now: i64) -> bool {
        let touched = match self.entries.write().get_mut(key) {
            Some(entry) => {
                entry.last_seen = entry.last_seen.max(now);
                true
            }
            None => false,
        };
        if touched {
            self.bump();
        }
        touched
    }

    pub fn remove_peer(&self, key: &NodeKey) -> Option<PeerTableEntry> {
        let removed = self.entries.write().remove(key);
        if removed.is_some() {
            self.bump();
        }
        removed
    }
}

impl Default for PeerTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(byte: u8, state: PeeringState, last_seen: i64) -> PeerTableEntry {
        PeerTableEntry {
            subnet_id: SubnetId::new("test"),
            node_id: NodeId::from_bytes([byte; 32]),
            state,
            url: format!("https://node-{byte}.example/peer"),
            node_public_key: PublicKey::from_bytes([byte; 32]),
            last_seen,
        }
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let table = PeerTable::new();

        assert_eq!(
            table.upsert_peer(entry(1, PeeringState::Peered, 100)),
            UpsertResult::Inserted
        );
        assert_eq!(
            table.upsert_peer(entry(1, PeeringState::Peered, 200)),
            UpsertResult::Updated {
                previous: PeeringState::Peered
            }
        );

        assert_eq!(table.len(), 1);
        let key = entry(1, PeeringState::Peered, 0).key();
        assert_eq!(table.get(&key).unwrap().last_seen, 200);
    }

    #[test]
    fn test_upsert_upgrades_request_to_peered() {
        let table = PeerTable::new();
        table.upsert_peer(entry(2, PeeringState::RequestPeering, 0));
        let result = table.upsert_peer(entry(2, PeeringState::Peered, 10));

        assert_eq!(
            result,
            UpsertResult::Updated {
                previous: PeeringState::RequestPeering
            }
        );
        assert_eq!(table.peered().len(), 1);
    }

    #[test]
    fn test_peered_filters_requests() {
        let table = PeerTable::new();
        table.upsert_peer(entry(1, PeeringState::RequestPeering, 0));
        table.upsert_peer(entry(2, PeeringState::Peered, 0));
        table.upsert_peer(entry(3, PeeringState::Peered, 0));

        let peered: Vec<u8> = table.peered().iter().map(|e| e.node_id.as_bytes()[0]).collect();
        assert_eq!(peered, vec![2, 3]);
        assert_eq!(table.snapshot().len(), 3);
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let table = PeerTable::new();
        let e = entry(4, PeeringState::Peered, 500);
        let key = e.key();
        table.upsert_peer(e);

        assert!(table.touch(&key, 400));
        assert_eq!(table.get(&key).unwrap().last_seen, 500);
        assert!(table.touch(&key, 600));
        assert_eq!(table.get(&key).unwrap().last_seen, 600);

        table.remove_peer(&key);
        assert!(!table.touch(&key, 700));
    }

    #[test]
    fn test_mark_peered_only_promotes_requests() {
        let table = PeerTable::new();
        let requested = entry(5, PeeringState::RequestPeering, 0);
        let key = requested.key();

        assert!(!table.mark_peered(&key, 10));
        table.upsert_peer(requested);
        assert!(table.mark_peered(&key, 10));
        assert_eq!(table.get(&key).unwrap().state, PeeringState::Peered);
        assert!(!table.mark_peered(&key, 20));
    }

    #[test]
    fn test_state_names() {
        for state in [PeeringState::RequestPeering, PeeringState::Peered] {
            assert_eq!(PeeringState::parse(state.as_str()), Some(state));
        }
        assert_eq!(PeeringState::parse("absent"), None);
    }
}
