//! Ledger accounts and their hierarchical paths.

use std::fmt;

use serde::{Deserialize, Serialize};

use tally_core::{Amount, NodeId, SettlementSchemeId};

use crate::error::LedgerError;

/// The three accounts every peered relationship owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerAccountKind {
    /// Value routed through the peer: credited when the peer owes us.
    Interledger,
    /// Unsecured credit extended to the peer.
    Trust,
    /// Value moved over the settlement scheme.
    Settlement,
}

impl PeerAccountKind {
    pub const ALL: [PeerAccountKind; 3] = [
        PeerAccountKind::Interledger,
        PeerAccountKind::Trust,
        PeerAccountKind::Settlement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PeerAccountKind::Interledger => "interledger",
            PeerAccountKind::Trust => "trust",
            PeerAccountKind::Settlement => "settlement",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "interledger" => Some(PeerAccountKind::Interledger),
            "trust" => Some(PeerAccountKind::Trust),
            "settlement" => Some(PeerAccountKind::Settlement),
            _ => None,
        }
    }
}

/// A `/`-separated account path, e.g. `stub/peer/<node id hex>/trust`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountPath(String);

impl AccountPath {
    /// Validate and wrap a path. Segments must be non-empty and free of whitespace.
    pub fn new(path: impl Into<String>) -> Result<Self, LedgerError> {
        let path = path.into();
        let valid = !path.is_empty()
            && path
                .split('/')
                .all(|segment| !segment.is_empty() && !segment.chars().any(char::is_whitespace));
        if valid {
            Ok(Self(path))
        } else {
            Err(LedgerError::InvalidPath(path))
        }
    }

    /// Path of one of a peer's accounts under a settlement scheme.
    pub fn peer(scheme: &SettlementSchemeId, peer: &NodeId, kind: PeerAccountKind) -> Self {
        Self(format!("{}/peer/{}/{}", scheme, peer.to_hex(), kind.as_str()))
    }

    /// Split a peer account path back into its parts.
    pub fn parse_peer(&self) -> Option<(SettlementSchemeId, NodeId, PeerAccountKind)> {
        let mut segments = self.0.split('/');
        let scheme = segments.next()?;
        if segments.next()? != "peer" {
            return None;
        }
        let peer = segments.next()?.parse::<NodeId>().ok()?;
        let kind = PeerAccountKind::parse(segments.next()?)?;
        if segments.next().is_some() {
            return None;
        }
        Some((SettlementSchemeId::new(scheme), peer, kind))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A double-entry account: four monotone counters.
///
/// Posted counters only grow. Pending counters grow on prepare and shrink
/// by exactly the prepared amount on post or void.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub path: AccountPath,
    pub credits_posted: Amount,
    pub credits_pending: Amount,
    pub debits_posted: Amount,
    pub debits_pending: Amount,
}

impl Account {
    pub fn new(path: AccountPath) -> Self {
        Self {
            path,
            credits_posted: Amount::ZERO,
            credits_pending: Amount::ZERO,
            debits_posted: Amount::ZERO,
            debits_pending: Amount::ZERO,
        }
    }

    /// `credits_posted - debits_posted`, or `None` if debits are larger.
    pub fn credit_balance(&self) -> Option<Amount> {
        self.credits_posted.checked_sub(self.debits_posted)
    }

    /// `debits_posted - credits_posted`, or `None` if credits are larger.
    pub fn debit_balance(&self) -> Option<Amount> {
        self.debits_posted.checked_sub(self.credits_posted)
    }

    pub fn has_pending(&self) -> bool {
        !self.credits_pending.is_zero() || !self.debits_pending.is_zero()
    }
}
