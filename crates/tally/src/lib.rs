//! # Tally
//!
//! A node of a peer-to-peer value network: it keeps its neighbours informed
//! of its link state, floods theirs onward, tracks what each peer owes in a
//! double-entry ledger, and settles balances over pluggable payment rails.
//!
//! ## Overview
//!
//! - **Link state**: every node signs a versioned self-announcement; peers
//!   store the latest one per node and forward each fresh one exactly once
//! - **Peering**: a node asks another to peer with a `peeringRequest`; the
//!   receiver accepts unconditionally and both sides then exchange heartbeats
//! - **Ledger**: each peer has interledger, trust and settlement accounts;
//!   value moves between them in two-phase transfers
//! - **Settlement**: once a peer's balance exceeds the credit midpoint by
//!   enough, the excess is paid through the settlement scheme
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tally::{Node, NodeConfig};
//! use tally::core::{Keypair, NodeId};
//! use tally::peering::MemoryNetwork;
//!
//! async fn example() -> tally::Result<()> {
//!     let keypair = Keypair::generate();
//!     let network = MemoryNetwork::new();
//!     let transport = network.create_transport(NodeId::derive(&keypair.public_key())).await;
//!
//!     let config = NodeConfig::new("main", "https://alice.example/peer", "stub");
//!     let node = Arc::new(Node::new(keypair, config, Arc::new(transport))?);
//!     node.start()?;
//!
//!     // ... register settlement schemes, request peering ...
//!
//!     node.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `tally::core` - Identifiers, amounts, signed link state, message codec
//! - `tally::store` - Node and peer tables, table persistence
//! - `tally::ledger` - Accounts and two-phase transfers
//! - `tally::peering` - Transport, flooder, heartbeat driver, inbound handler
//! - `tally::settlement` - Settlement backends and per-peer loops

pub mod config;
pub mod error;
pub mod node;

pub use tally_core as core;
pub use tally_ledger as ledger;
pub use tally_peering as peering;
pub use tally_settlement as settlement;
pub use tally_store as store;

pub use config::NodeConfig;
pub use error::{NodeError, Result};
pub use node::{Node, ReconcileReport, RestoreReport};

pub use tally_core::{Amount, Keypair, NodeId, NodeKey, Ratio, SettlementSchemeId, SubnetId};
