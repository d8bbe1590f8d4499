//! Credit policy: how much credit the peer extends to us.
//!
//! The outgoing side is read from the trust account. The incoming side is
//! not tracked yet, so the policy supplies it.

use tally_core::{Amount, NodeId};

pub trait CreditPolicy: Send + Sync {
    /// Credit `peer` extends to us, given the credit we extend to it.
    fn incoming_credit(&self, peer: &NodeId, outgoing_credit: Amount) -> Amount;
}

/// Assume the peer extends us exactly the credit we extend it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymmetricCredit;

impl CreditPolicy for SymmetricCredit {
    fn incoming_credit(&self, _peer: &NodeId, outgoing_credit: Amount) -> Amount {
        outgoing_credit
    }
}
