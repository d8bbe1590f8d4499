//! SQLite implementation of the TableStore trait.
//!
//! Uses rusqlite with bundled SQLite. Every call runs on the blocking pool
//! via `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use tally_core::{NodeId, NodeKey, PublicKey, SubnetId};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::node_table::{NodePeerState, NodeTableEntry, RetransmitDeadline};
use crate::peer_table::{PeerTableEntry, PeeringState};
use crate::traits::TableStore;

/// SQLite-backed table store.
pub struct SqliteTableStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTableStore {
    /// Open (and migrate) a database file, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database. Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(format!("spawn_blocking failed: {}", e)))?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row conversion
// ─────────────────────────────────────────────────────────────────────────────

fn blob_32(bytes: Vec<u8>, column: &str) -> Result<[u8; 32]> {
    bytes
        .try_into()
        .map_err(|_| StoreError::InvalidData(format!("{} is not 32 bytes", column)))
}

fn encode_peer_state(state: &NodePeerState) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(state, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_peer_state(bytes: &[u8]) -> Result<NodePeerState> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

struct NodeRow {
    subnet_id: String,
    node_id: Vec<u8>,
    sequence: i64,
    last_link_state_update: Option<Vec<u8>>,
    peer_state: Vec<u8>,
}

impl NodeRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            subnet_id: row.get("subnet_id")?,
            node_id: row.get("node_id")?,
            sequence: row.get("sequence")?,
            last_link_state_update: row.get("last_link_state_update")?,
            peer_state: row.get("peer_state")?,
        })
    }

    fn into_entry(self) -> Result<NodeTableEntry> {
        Ok(NodeTableEntry {
            subnet_id: SubnetId::new(self.subnet_id),
            node_id: NodeId::from_bytes(blob_32(self.node_id, "node_id")?),
            // stored as the i64 bit pattern of a u64
            sequence: self.sequence as u64,
            last_link_state_update: self.last_link_state_update.map(Bytes::from),
            update_received_counter: 0,
            scheduled_retransmit_time: RetransmitDeadline::Never,
            peer_state: decode_peer_state(&self.peer_state)?,
        })
    }
}

struct PeerRow {
    subnet_id: String,
    node_id: Vec<u8>,
    state: String,
    url: String,
    node_public_key: Vec<u8>,
    last_seen: i64,
}

impl PeerRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            subnet_id: row.get("subnet_id")?,
            node_id: row.get("node_id")?,
            state: row.get("state")?,
            url: row.get("url")?,
            node_public_key: row.get("node_public_key")?,
            last_seen: row.get("last_seen")?,
        })
    }

    fn into_entry(self) -> Result<PeerTableEntry> {
        let state = PeeringState::parse(&self.state)
            .ok_or_else(|| StoreError::InvalidData(format!("unknown peering state: {}", self.state)))?;
        Ok(PeerTableEntry {
            subnet_id: SubnetId::new(self.subnet_id),
            node_id: NodeId::from_bytes(blob_32(self.node_id, "node_id")?),
            state,
            url: self.url,
            node_public_key: PublicKey::from_bytes(blob_32(self.node_public_key, "node_public_key")?),
            last_seen: self.last_seen,
        })
    }
}

#[async_trait]
impl TableStore for SqliteTableStore {
    async fn save_node(&self, entry: &NodeTableEntry) -> Result<()> {
        let subnet_id = entry.subnet_id.as_str().to_owned();
        let node_id = entry.node_id.as_bytes().to_vec();
        let sequence = entry.sequence as i64;
        let update = entry.last_link_state_update.as_ref().map(|b| b.to_vec());
        let peer_state = encode_peer_state(&entry.peer_state)?;

        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO nodes (subnet_id, node_id, sequence, last_link_state_update, peer_state)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(subnet_id, node_id) DO UPDATE SET
                    sequence = excluded.sequence,
                    last_link_state_update = excluded.last_link_state_update,
                    peer_state = excluded.peer_state",
                params![subnet_id, node_id, sequence, update, peer_state],
            )?;
            Ok(())
        })
        .await
    }

    async fn load_nodes(&self) -> Result<Vec<NodeTableEntry>> {
        let rows = self
            .blocking(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT subnet_id, node_id, sequence, last_link_state_update, peer_state
                     FROM nodes ORDER BY subnet_id, node_id",
                )?;
                let rows = stmt
                    .query_map([], NodeRow::from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter().map(NodeRow::into_entry).collect()
    }

    async fn delete_node(&self, key: &NodeKey) -> Result<bool> {
        let subnet_id = key.subnet_id.as_str().to_owned();
        let node_id = key.node_id.as_bytes().to_vec();
        self.blocking(move |conn| {
            let removed = conn.execute(
                "DELETE FROM nodes WHERE subnet_id = ?1 AND node_id = ?2",
                params![subnet_id, node_id],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn save_peer(&self, entry: &PeerTableEntry) -> Result<()> {
        let entry = entry.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO peers (subnet_id, node_id, state, url, node_public_key, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(subnet_id, node_id) DO UPDATE SET
                    state = excluded.state,
                    url = excluded.url,
                    node_public_key = excluded.node_public_key,
                    last_seen = excluded.last_seen",
                params![
                    entry.subnet_id.as_str(),
                    entry.node_id.as_bytes().as_slice(),
                    entry.state.as_str(),
                    entry.url,
                    entry.node_public_key.as_bytes().as_slice(),
                    entry.last_seen,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn load_peers(&self) -> Result<Vec<PeerTableEntry>> {
        let rows = self
            .blocking(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT subnet_id, node_id, state, url, node_public_key, last_seen
                     FROM peers ORDER BY subnet_id, node_id",
                )?;
                let rows = stmt
                    .query_map([], PeerRow::from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter().map(PeerRow::into_entry).collect()
    }

    async fn delete_peer(&self, key: &NodeKey) -> Result<bool> {
        let subnet_id = key.subnet_id.as_str().to_owned();
        let node_id = key.node_id.as_bytes().to_vec();
        self.blocking(move |conn| {
            let removed = conn.execute(
                "DELETE FROM peers WHERE subnet_id = ?1 AND node_id = ?2",
                params![subnet_id, node_id],
            )?;
            Ok(removed > 0)
        })
        .await
    }
}
