//! # Tally Ledger
//!
//! A double-entry ledger with two-phase transfers.
//!
//! ## Overview
//!
//! Accounts are addressed by hierarchical [`AccountPath`]s and carry four
//! counters: posted and pending credits and debits. Value moves through a
//! [`Transfer`] in two phases:
//!
//! 1. **prepare** reserves the amount on both accounts (pending counters)
//! 2. **post** commits it (pending moves to posted), or **void** releases it
//!
//! Across all accounts, total posted credits equal total posted debits
//! whenever no transfer is pending.
//!
//! ## Key Types
//!
//! - [`Ledger`] - The account store
//! - [`Account`] / [`AccountPath`] - Accounts and their addresses
//! - [`Transfer`] - A prepare token, resolved by post or void
//! - [`LimitPolicy`] - Pluggable capacity bounds checked at prepare time
//! - [`LedgerFailure`] - Typed, recoverable prepare rejections
//!
//! ## Peer accounts
//!
//! [`initialize_peer`] and [`cleanup_peer`] manage the interledger, trust
//! and settlement accounts of a peered node, and
//! [`process_settlement_prepare`] prepares the transfer recording a
//! settlement in either direction.

pub mod account;
pub mod error;
pub mod ledger;
pub mod peer;
pub mod policy;
pub mod transfer;

pub use account::{Account, AccountPath, PeerAccountKind};
pub use error::{LedgerError, LedgerFailure, Result, WhichAccount};
pub use ledger::{Ledger, LedgerTotals};
pub use peer::{
    cleanup_peer, initialize_peer, peer_accounts, process_settlement_prepare, PeerAccountSnapshot,
    PeerAccounts, SettlementDirection,
};
pub use policy::{AccountLimit, LimitPolicy, NoLimits, PeerAccountLimits};
pub use transfer::{Transfer, TransferId, TransferState};
