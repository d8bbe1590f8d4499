//! # Tally Peering
//!
//! The peer protocol: how a node keeps its neighbours informed and how it
//! reacts to what they send.
//!
//! ## Overview
//!
//! Three processes share the node and peer tables from `tally-store`:
//!
//! - [`Flooder`] forwards each fresh link-state update once to every peer,
//!   damped by a receipt counter and a one-shot retransmit deadline
//! - [`HeartbeatDriver`] periodically sends the node's own link state to
//!   every peer, as a peering request until the peer accepts
//! - [`InboundHandler`] parses inbound messages, ingests link state, and
//!   accepts peering requests
//!
//! Messages travel through a [`Transport`]; [`MemoryNetwork`] connects
//! nodes in-process for tests.
//!
//! ## Message Flow
//!
//! ```text
//! Node A                              Node B
//!   |-------- peeringRequest -------->|   B: peer A = peered
//!   |   A: peer B = peered            |
//!   |<------- linkStateUpdate --------|   heartbeat
//!   |-------- linkStateUpdate ------->|   heartbeat / flooded update
//!   |-------- settlement ------------>|   after an outgoing settlement
//! ```

pub mod config;
pub mod error;
pub mod flooder;
pub mod handler;
pub mod heartbeat;
pub mod ingest;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::PeeringConfig;
pub use error::{PeeringError, Result};
pub use flooder::{FloodReport, Flooder};
pub use handler::{InboundEvent, InboundHandler};
pub use heartbeat::{HeartbeatDriver, HeartbeatOutcome, HeartbeatReport};
pub use ingest::{ingest_link_state, IngestReport};
pub use transport::{memory::MemoryNetwork, memory::MemoryTransport, Transport};
