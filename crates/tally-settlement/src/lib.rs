//! # Tally Settlement
//!
//! Turns credit exposure recorded in the ledger into external payments.
//!
//! ## Overview
//!
//! A [`SettlementEngine`] runs one loop per peered node. Each tick reads
//! the peer's accounts and asks [`calculate_settlement_amount`] how much to
//! settle: nothing while the balance stays under the credit midpoint plus
//! half the settlement ratio, otherwise everything above the midpoint. The
//! amount is reserved with a prepared transfer, paid through the peer's
//! [`SettlementBackend`], and then posted or voided.
//!
//! ## Key Types
//!
//! - [`SettlementEngine`] - Per-peer loops and incoming settlement handling
//! - [`SettlementBackend`] - An external payment rail
//! - [`SettlementSchemes`] - Backends by settlement scheme id
//! - [`CreditPolicy`] - Credit the peer extends to us; [`SymmetricCredit`] by default
//! - [`SettlementOutcome`] - What one attempt did
//!
//! ## Example
//!
//! ```rust,ignore
//! let schemes = Arc::new(SettlementSchemes::new());
//! schemes.register(SettlementSchemeId::new("stub"), Arc::new(MyRail::new()));
//!
//! let engine = SettlementEngine::new(ledger, schemes, transport, Arc::new(CborCodec), SettlementConfig::default());
//! engine.start_peer(peer_id, SettlementSchemeId::new("stub"));
//! ```

pub mod backend;
pub mod calculate;
pub mod config;
pub mod engine;
pub mod error;
pub mod policy;

pub use backend::{SettlementBackend, SettlementSchemes};
pub use calculate::{calculate_settlement_amount, SettlementCalculation};
pub use config::SettlementConfig;
pub use engine::{SettlementEngine, SettlementOutcome};
pub use error::{Result, SettlementError};
pub use policy::{CreditPolicy, SymmetricCredit};
