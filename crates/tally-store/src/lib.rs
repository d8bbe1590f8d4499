//! # Tally Store
//!
//! The node table and peer table, plus persistence for both.
//!
//! ## Overview
//!
//! [`NodeTable`] holds one link-state record per (subnet, node) and enforces
//! the monotonic sequence rule. [`PeerTable`] holds wire-level peering
//! relationships. Both are in-memory, thread-safe, and only reachable
//! through narrow operations; every mutation bumps a `watch` version so
//! background processes can wait for changes.
//!
//! Tables are checkpointed through the [`TableStore`] trait. The primary
//! implementation is [`SqliteTableStore`], with [`MemoryTableStore`] for tests.
//!
//! ## Key Types
//!
//! - [`NodeTable`] / [`NodeTableEntry`] - Link-state records
//! - [`LinkStateIngest`] - Outcome of offering an update to the node table
//! - [`PeerTable`] / [`PeerTableEntry`] - Peering relationships
//! - [`TableStore`] - Async persistence trait
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tally_store::{SqliteTableStore, TableStore, NodeTable};
//!
//! async fn example() -> tally_store::Result<()> {
//!     let store = SqliteTableStore::open("tables.db")?;
//!     let table = NodeTable::new();
//!     for entry in store.load_nodes().await? {
//!         table.add_node(entry);
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod memory;
pub mod migration;
pub mod node_table;
pub mod peer_table;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryTableStore;
pub use node_table::{
    LinkStateIngest, NodePeerState, NodeTable, NodeTableEntry, NodeUpdate, RetransmitDeadline,
};
pub use peer_table::{PeerTable, PeerTableEntry, PeeringState, UpsertResult};
pub use sqlite::SqliteTableStore;
pub use traits::{TableStore, TableStoreExt};
