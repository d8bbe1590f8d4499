//! Settlement amount calculation.
//!
//! ```text
//! balance   = interledger.credits_posted - interledger.debits_posted - interledger.debits_pending
//! outgoing  = trust.debits_posted - trust.credits_posted
//! midpoint  = (incoming + outgoing) / 2
//! threshold = midpoint * (1 + ratio / 2)
//! amount    = balance < threshold ? 0 : clamp(balance - midpoint, 0, balance)
//! ```
//!
//! All arithmetic is integer. A negative balance settles nothing, and a
//! negative credit line counts as zero, which yields the same amount the
//! signed formula would after clamping.

use tally_core::{Amount, NodeId, Ratio};
use tally_ledger::PeerAccountSnapshot;

use crate::policy::CreditPolicy;

/// Every intermediate value of one calculation, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementCalculation {
    /// `None` when the peer owes us nothing.
    pub balance: Option<Amount>,
    pub outgoing_credit: Amount,
    pub incoming_credit: Amount,
    pub midpoint: Amount,
    pub threshold: Amount,
    /// What to settle now. Zero means nothing.
    pub amount: Amount,
}

/// Decide how much to settle with `peer` given its accounts.
pub fn calculate_settlement_amount(
    accounts: &PeerAccountSnapshot,
    ratio: Ratio,
    credit_policy: &dyn CreditPolicy,
    peer: &NodeId,
) -> SettlementCalculation {
    let interledger = &accounts.interledger;
    let balance = interledger
        .credits_posted
        .checked_sub(interledger.debits_posted)
        .and_then(|net| net.checked_sub(interledger.debits_pending));

    let outgoing_credit = accounts.trust.debit_balance().unwrap_or(Amount::ZERO);
    let incoming_credit = credit_policy.incoming_credit(peer, outgoing_credit);
    let midpoint = midpoint(incoming_credit, outgoing_credit);
    let threshold = threshold(midpoint, ratio);

    let amount = match balance {
        Some(balance) if balance >= threshold => balance.saturating_sub(midpoint),
        _ => Amount::ZERO,
    };

    SettlementCalculation {
        balance,
        outgoing_credit,
        incoming_credit,
        midpoint,
        threshold,
        amount,
    }
}

/// `(a + b) / 2` without overflowing.
fn midpoint(a: Amount, b: Amount) -> Amount {
    let (a, b) = (a.value(), b.value());
    Amount::new(a / 2 + b / 2 + (a % 2 + b % 2) / 2)
}

/// `midpoint * (1 + ratio / 2)`. Saturates, so an absurd threshold means "never".
fn threshold(midpoint: Amount, ratio: Ratio) -> Amount {
    Ratio::ONE
        .checked_add(ratio.half())
        .and_then(|factor| midpoint.checked_mul_ratio(factor))
        .unwrap_or(Amount::new(u128::MAX))
}
