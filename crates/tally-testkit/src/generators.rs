//! Proptest strategies.

use proptest::prelude::*;

use tally_core::{Amount, NodeId, Ratio};
use tally_ledger::{Account, PeerAccountSnapshot, PeerAccounts};

/// Amounts small enough that sums of a few never overflow.
pub fn amount() -> impl Strategy<Value = Amount> {
    (0u128..1u128 << 96).prop_map(Amount::new)
}

/// Ratios between 0 and 10.
pub fn ratio() -> impl Strategy<Value = Ratio> {
    (0u64..1_000_000_000).prop_map(Ratio::from_scaled)
}

pub fn node_id() -> impl Strategy<Value = NodeId> {
    any::<[u8; 32]>().prop_map(NodeId::from_bytes)
}

fn account_counters(account: &mut Account, counters: [Amount; 4]) {
    account.credits_posted = counters[0];
    account.credits_pending = counters[1];
    account.debits_posted = counters[2];
    account.debits_pending = counters[3];
}

/// Three peer accounts with arbitrary counters.
pub fn peer_account_snapshot() -> impl Strategy<Value = PeerAccountSnapshot> {
    (node_id(), prop::array::uniform4(amount()), prop::array::uniform4(amount())).prop_map(
        |(peer, interledger_counters, trust_counters)| {
            let paths = PeerAccounts::new(&tally_core::SettlementSchemeId::new("stub"), &peer);
            let mut interledger = Account::new(paths.interledger);
            account_counters(&mut interledger, interledger_counters);
            let mut trust = Account::new(paths.trust);
            account_counters(&mut trust, trust_counters);
            PeerAccountSnapshot {
                interledger,
                trust,
                settlement: Account::new(paths.settlement),
            }
        },
    )
}
