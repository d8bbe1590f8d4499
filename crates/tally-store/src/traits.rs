//! TableStore trait: the abstract interface for node and peer table persistence.
//!
//! The live tables are in memory. A host process checkpoints them into a
//! `TableStore` and restores them on startup. Implementations include SQLite
//! (primary) and in-memory (for tests).

use async_trait::async_trait;
use tally_core::NodeKey;

use crate::error::Result;
use crate::node_table::NodeTableEntry;
use crate::peer_table::PeerTableEntry;

/// Async interface for table persistence.
///
/// # Design Notes
///
/// - **Upserts**: Saving an entry replaces any row with the same key.
/// - **Flood state is transient**: `update_received_counter` and
///   `scheduled_retransmit_time` are not persisted. Loaded node entries come
///   back with a zero counter and no retransmission scheduled, so a restart
///   never re-floods old updates.
#[async_trait]
pub trait TableStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Node Table
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or replace a node row.
    async fn save_node(&self, entry: &NodeTableEntry) -> Result<()>;

    /// Load every node row.
    async fn load_nodes(&self) -> Result<Vec<NodeTableEntry>>;

    /// Delete a node row. Returns true if a row was removed.
    async fn delete_node(&self, key: &NodeKey) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Peer Table
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or replace a peer row.
    async fn save_peer(&self, entry: &PeerTableEntry) -> Result<()>;

    /// Load every peer row.
    async fn load_peers(&self) -> Result<Vec<PeerTableEntry>>;

    /// Delete a peer row. Returns true if a row was removed.
    async fn delete_peer(&self, key: &NodeKey) -> Result<bool>;
}

/// Bulk helpers built on [`TableStore`].
#[async_trait]
pub trait TableStoreExt: TableStore {
    /// Save many node rows.
    async fn save_nodes(&self, entries: &[NodeTableEntry]) -> Result<()> {
        for entry in entries {
            self.save_node(entry).await?;
        }
        Ok(())
    }

    /// Save many peer rows.
    async fn save_peers(&self, entries: &[PeerTableEntry]) -> Result<()> {
        for entry in entries {
            self.save_peer(entry).await?;
        }
        Ok(())
    }
}

impl<T: TableStore + ?Sized> TableStoreExt for T {}

/// Strip the transient flood state from a node entry.
pub(crate) fn as_persisted(entry: &NodeTableEntry) -> NodeTableEntry {
    NodeTableEntry {
        update_received_counter: 0,
        scheduled_retransmit_time: crate::node_table::RetransmitDeadline::Never,
        ..entry.clone()
    }
}
