//! # Tally Core
//!
//! Pure primitives shared by every Tally crate: node identity, amounts,
//! signed link-state announcements, and the peer message codec.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`NodeId`] - Node identifier derived from an Ed25519 public key
//! - [`NodeKey`] - Composite (subnet, node) key used by the node and peer tables
//! - [`Amount`] - Non-negative ledger amount with checked arithmetic
//! - [`Ratio`] - Fixed-point ratio with 8 decimal digits of precision
//! - [`SignedNodeInfo`] - A signed, versioned self-announcement
//! - [`PeerMessage`] - Logical messages exchanged between peers
//!
//! ## Encoding
//!
//! Signed announcements and peer messages are encoded with CBOR. Link-state
//! bytes are treated as opaque once signed: they are stored and re-broadcast
//! verbatim and never re-encoded locally.

pub mod amount;
pub mod crypto;
pub mod error;
pub mod link_state;
pub mod message;
pub mod time;
pub mod types;

pub use amount::{Amount, Ratio, RATIO_PRECISION};
pub use crypto::{Keypair, PublicKey, Signature};
pub use error::{CodecError, CoreError};
pub use link_state::{NodeInfo, SignedNodeInfo};
pub use message::{limits, CborCodec, MessageCodec, PeerMessage};
pub use time::now_millis;
pub use types::{NodeId, NodeKey, SettlementSchemeId, SubnetId};
