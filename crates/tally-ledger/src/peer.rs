//! Peer account lifecycle and settlement transfers.
//!
//! Each peered relationship owns three accounts under its settlement scheme
//! (see [`PeerAccountKind`]). They are created when the peer becomes peered
//! and removed when the peering ends.

use tally_core::{Amount, NodeId, SettlementSchemeId};

use crate::account::{Account, AccountPath, PeerAccountKind};
use crate::error::LedgerFailure;
use crate::ledger::Ledger;
use crate::transfer::Transfer;

/// Paths of a peer's three accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAccounts {
    pub interledger: AccountPath,
    pub trust: AccountPath,
    pub settlement: AccountPath,
}

impl PeerAccounts {
    pub fn new(scheme: &SettlementSchemeId, peer: &NodeId) -> Self {
        Self {
            interledger: AccountPath::peer(scheme, peer, PeerAccountKind::Interledger),
            trust: AccountPath::peer(scheme, peer, PeerAccountKind::Trust),
            settlement: AccountPath::peer(scheme, peer, PeerAccountKind::Settlement),
        }
    }

    pub fn paths(&self) -> [&AccountPath; 3] {
        [&self.interledger, &self.trust, &self.settlement]
    }
}

/// A consistent read of a peer's three accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAccountSnapshot {
    pub interledger: Account,
    pub trust: Account,
    pub settlement: Account,
}

/// Direction of a settlement relative to this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementDirection {
    /// We pay the peer: debit interledger, credit settlement.
    Outgoing,
    /// The peer paid us: debit settlement, credit interledger.
    Incoming,
}

/// Create the three zero-balance accounts for a newly peered node.
///
/// Accounts that already exist are left untouched, so re-peering is harmless.
pub fn initialize_peer(ledger: &Ledger, scheme: &SettlementSchemeId, peer: &NodeId) -> PeerAccounts {
    let accounts = PeerAccounts::new(scheme, peer);
    let mut created = 0;
    for path in accounts.paths() {
        if ledger.ensure_account(path.clone()) {
            created += 1;
        }
    }
    tracing::debug!(peer = %peer, scheme = %scheme, created, "initialized peer accounts");
    accounts
}

/// Remove a peer's accounts, dropping any pending transfers that touch them.
pub fn cleanup_peer(ledger: &Ledger, scheme: &SettlementSchemeId, peer: &NodeId) {
    let accounts = PeerAccounts::new(scheme, peer);
    for path in accounts.paths() {
        ledger.remove_account(path);
    }
    tracing::debug!(peer = %peer, scheme = %scheme, "removed peer accounts");
}

/// Read all three peer accounts, or `None` if any is missing.
pub fn peer_accounts(
    ledger: &Ledger,
    scheme: &SettlementSchemeId,
    peer: &NodeId,
) -> Option<PeerAccountSnapshot> {
    let paths = PeerAccounts::new(scheme, peer);
    let mut accounts = ledger.get_accounts(&paths.paths())?.into_iter();
    Some(PeerAccountSnapshot {
        interledger: accounts.next()?,
        trust: accounts.next()?,
        settlement: accounts.next()?,
    })
}

/// Prepare the transfer that records a settlement with `peer`.
pub fn process_settlement_prepare(
    ledger: &Ledger,
    scheme: &SettlementSchemeId,
    peer: &NodeId,
    amount: Amount,
    direction: SettlementDirection,
) -> Result<Transfer, LedgerFailure> {
    let paths = PeerAccounts::new(scheme, peer);
    match direction {
        SettlementDirection::Outgoing => ledger.prepare(&paths.interledger, &paths.settlement, amount),
        SettlementDirection::Incoming => ledger.prepare(&paths.settlement, &paths.interledger, amount),
    }
}
