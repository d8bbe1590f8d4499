//! Pluggable capacity bounds.
//!
//! A [`LimitPolicy`] assigns each account an [`AccountLimit`]. The ledger
//! checks it during `prepare`, counting pending amounts as already spent.

use serde::{Deserialize, Serialize};

use crate::account::{AccountPath, PeerAccountKind};

/// Capacity bound on a single account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AccountLimit {
    #[default]
    NoLimit,
    /// `debits_posted + debits_pending` may not exceed `credits_posted`.
    DebitsMustNotExceedCredits,
    /// `credits_posted + credits_pending` may not exceed `debits_posted`.
    CreditsMustNotExceedDebits,
}

/// Maps accounts to their capacity bound.
pub trait LimitPolicy: Send + Sync {
    fn limit(&self, path: &AccountPath) -> AccountLimit;
}

/// Every account is unbounded.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLimits;

impl LimitPolicy for NoLimits {
    fn limit(&self, _path: &AccountPath) -> AccountLimit {
        AccountLimit::NoLimit
    }
}

/// Bounds chosen by peer account kind. Non-peer accounts are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAccountLimits {
    pub interledger: AccountLimit,
    pub trust: AccountLimit,
    pub settlement: AccountLimit,
}

impl LimitPolicy for PeerAccountLimits {
    fn limit(&self, path: &AccountPath) -> AccountLimit {
        match path.parse_peer() {
            Some((_, _, PeerAccountKind::Interledger)) => self.interledger,
            Some((_, _, PeerAccountKind::Trust)) => self.trust,
            Some((_, _, PeerAccountKind::Settlement)) => self.settlement,
            None => AccountLimit::NoLimit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{NodeId, SettlementSchemeId};

    #[test]
    fn test_peer_limits_by_kind() {
        let policy = PeerAccountLimits {
            interledger: AccountLimit::DebitsMustNotExceedCredits,
            ..Default::default()
        };
        let scheme = SettlementSchemeId::new("stub");
        let peer = NodeId::from_bytes([1; 32]);

        assert_eq!(
            policy.limit(&AccountPath::peer(&scheme, &peer, PeerAccountKind::Interledger)),
            AccountLimit::DebitsMustNotExceedCredits
        );
        assert_eq!(
            policy.limit(&AccountPath::peer(&scheme, &peer, PeerAccountKind::Trust)),
            AccountLimit::NoLimit
        );
        assert_eq!(
            policy.limit(&AccountPath::new("internal/connector").unwrap()),
            AccountLimit::NoLimit
        );
    }
}
