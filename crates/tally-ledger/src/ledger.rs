//! The ledger: path-addressed accounts and two-phase transfers.
//!
//! All state lives behind one lock, so a transfer's two account updates are
//! applied together and no reader ever observes half of one.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use tally_core::Amount;

use crate::account::{Account, AccountPath};
use crate::error::{LedgerError, LedgerFailure, Result, WhichAccount};
use crate::policy::{AccountLimit, LimitPolicy, NoLimits};
use crate::transfer::{Transfer, TransferId, TransferState};

/// Sums of every counter across all accounts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTotals {
    pub credits_posted: Amount,
    pub credits_pending: Amount,
    pub debits_posted: Amount,
    pub debits_pending: Amount,
}

impl LedgerTotals {
    /// Double-entry conservation: posted and pending sides match.
    pub fn is_balanced(&self) -> bool {
        self.credits_posted == self.debits_posted && self.credits_pending == self.debits_pending
    }
}

#[derive(Default)]
struct LedgerInner {
    accounts: HashMap<AccountPath, Account>,
    pending: HashMap<TransferId, Transfer>,
    next_transfer_id: u64,
}

/// A double-entry ledger.
pub struct Ledger {
    inner: Mutex<LedgerInner>,
    policy: Box<dyn LimitPolicy>,
}

impl Ledger {
    /// A ledger with no capacity bounds.
    pub fn new() -> Self {
        Self::with_policy(NoLimits)
    }

    pub fn with_policy(policy: impl LimitPolicy + 'static) -> Self {
        Self {
            inner: Mutex::new(LedgerInner::default()),
            policy: Box::new(policy),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accounts
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a zero-balance account.
    pub fn create_account(&self, path: AccountPath) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.accounts.contains_key(&path) {
            return Err(LedgerError::AccountExists(path));
        }
        inner.accounts.insert(path.clone(), Account::new(path));
        Ok(())
    }

    /// Create the account unless it exists. Returns true if it was created.
    pub fn ensure_account(&self, path: AccountPath) -> bool {
        let mut inner = self.inner.lock();
        if inner.accounts.contains_key(&path) {
            return false;
        }
        inner.accounts.insert(path.clone(), Account::new(path));
        true
    }

    /// Remove an account.
    ///
    /// Pending transfers touching it are voided first, releasing their
    /// reservation on the other account, and then forgotten: a later
    /// `post` or `void` of one of them returns [`LedgerError::NotPending`].
    pub fn remove_account(&self, path: &AccountPath) -> Option<Account> {
        let mut inner = self.inner.lock();
        if !inner.accounts.contains_key(path) {
            return None;
        }

        let dropped: Vec<TransferId> = inner
            .pending
            .values()
            .filter(|transfer| transfer.touches(path))
            .map(|transfer| transfer.id)
            .collect();
        for id in &dropped {
            if let Some(transfer) = inner.pending.remove(id) {
                release(&mut inner.accounts, &transfer);
            }
        }
        if !dropped.is_empty() {
            tracing::debug!(account = %path, dropped = dropped.len(), "dropped pending transfers of removed account");
        }

        inner.accounts.remove(path)
    }

    pub fn get_account(&self, path: &AccountPath) -> Option<Account> {
        self.inner.lock().accounts.get(path).cloned()
    }

    /// Read several accounts under one lock. `None` if any is missing.
    pub fn get_accounts(&self, paths: &[&AccountPath]) -> Option<Vec<Account>> {
        let inner = self.inner.lock();
        paths.iter().map(|path| inner.accounts.get(*path).cloned()).collect()
    }

    pub fn contains_account(&self, path: &AccountPath) -> bool {
        self.inner.lock().accounts.contains_key(path)
    }

    /// A consistent copy of every account, ordered by path.
    pub fn accounts(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self.inner.lock().accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.path.cmp(&b.path));
        accounts
    }

    pub fn totals(&self) -> LedgerTotals {
        let inner = self.inner.lock();
        let mut totals = LedgerTotals::default();
        for account in inner.accounts.values() {
            // u128 sums of u128 counters; saturate rather than wrap in diagnostics
            totals.credits_posted = sum(totals.credits_posted, account.credits_posted);
            totals.credits_pending = sum(totals.credits_pending, account.credits_pending);
            totals.debits_posted = sum(totals.debits_posted, account.debits_posted);
            totals.debits_pending = sum(totals.debits_pending, account.debits_pending);
        }
        totals
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transfers
    // ─────────────────────────────────────────────────────────────────────────

    /// Reserve `amount` from `debit` to `credit`.
    ///
    /// On success both pending counters have grown by `amount`. On failure
    /// nothing changed.
    pub fn prepare(
        &self,
        debit: &AccountPath,
        credit: &AccountPath,
        amount: Amount,
    ) -> std::result::Result<Transfer, LedgerFailure> {
        let mut inner = self.inner.lock();

        let debit_account = inner.accounts.get(debit).ok_or_else(|| LedgerFailure::InvalidAccount {
            which_account: WhichAccount::Debit,
            account_path: debit.clone(),
        })?;
        let credit_account = inner.accounts.get(credit).ok_or_else(|| LedgerFailure::InvalidAccount {
            which_account: WhichAccount::Credit,
            account_path: credit.clone(),
        })?;

        let overflow = |path: &AccountPath| LedgerFailure::Overflow {
            account_path: path.clone(),
        };

        // posted + pending + amount must fit so that post can never overflow
        let debits_reserved = debit_account
            .debits_posted
            .checked_add(debit_account.debits_pending)
            .and_then(|reserved| reserved.checked_add(amount))
            .ok_or_else(|| overflow(debit))?;
        let credits_reserved = credit_account
            .credits_posted
            .checked_add(credit_account.credits_pending)
            .and_then(|reserved| reserved.checked_add(amount))
            .ok_or_else(|| overflow(credit))?;

        if self.policy.limit(debit) == AccountLimit::DebitsMustNotExceedCredits
            && debits_reserved > debit_account.credits_posted
        {
            return Err(LedgerFailure::ExceedsCredits {
                account_path: debit.clone(),
            });
        }
        if self.policy.limit(credit) == AccountLimit::CreditsMustNotExceedDebits
            && credits_reserved > credit_account.debits_posted
        {
            return Err(LedgerFailure::ExceedsDebits {
                account_path: credit.clone(),
            });
        }

        // Checked above: these cannot overflow.
        if let Some(account) = inner.accounts.get_mut(debit) {
            account.debits_pending = Amount::new(account.debits_pending.value() + amount.value());
        }
        if let Some(account) = inner.accounts.get_mut(credit) {
            account.credits_pending = Amount::new(account.credits_pending.value() + amount.value());
        }

        let id = TransferId(inner.next_transfer_id);
        inner.next_transfer_id += 1;

        let transfer = Transfer {
            id,
            debit_account: debit.clone(),
            credit_account: credit.clone(),
            amount,
            state: TransferState::Prepared,
        };
        inner.pending.insert(id, transfer.clone());
        Ok(transfer)
    }

    /// Commit a prepared transfer: pending moves to posted on both sides.
    pub fn post(&self, transfer: &Transfer) -> Result<Transfer> {
        let mut inner = self.inner.lock();
        let mut transfer = inner
            .pending
            .remove(&transfer.id)
            .ok_or(LedgerError::NotPending(transfer.id))?;

        let amount = transfer.amount;
        if let Some(account) = inner.accounts.get_mut(&transfer.debit_account) {
            account.debits_pending = account.debits_pending.saturating_sub(amount);
            account.debits_posted = Amount::new(account.debits_posted.value() + amount.value());
        }
        if let Some(account) = inner.accounts.get_mut(&transfer.credit_account) {
            account.credits_pending = account.credits_pending.saturating_sub(amount);
            account.credits_posted = Amount::new(account.credits_posted.value() + amount.value());
        }

        transfer.state = TransferState::Posted;
        Ok(transfer)
    }

    /// Roll back a prepared transfer: both pending counters shrink by its amount.
    pub fn void(&self, transfer: &Transfer) -> Result<Transfer> {
        let mut inner = self.inner.lock();
        let mut transfer = inner
            .pending
            .remove(&transfer.id)
            .ok_or(LedgerError::NotPending(transfer.id))?;

        release(&mut inner.accounts, &transfer);

        transfer.state = TransferState::Voided;
        Ok(transfer)
    }

    pub fn is_pending(&self, id: TransferId) -> bool {
        self.inner.lock().pending.contains_key(&id)
    }

    /// Every prepared but unresolved transfer, ordered by id.
    pub fn pending_transfers(&self) -> Vec<Transfer> {
        let mut pending: Vec<Transfer> = self.inner.lock().pending.values().cloned().collect();
        pending.sort_by_key(|transfer| transfer.id);
        pending
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

fn release(accounts: &mut HashMap<AccountPath, Account>, transfer: &Transfer) {
    if let Some(account) = accounts.get_mut(&transfer.debit_account) {
        account.debits_pending = account.debits_pending.saturating_sub(transfer.amount);
    }
    if let Some(account) = accounts.get_mut(&transfer.credit_account) {
        account.credits_pending = account.credits_pending.saturating_sub(transfer.amount);
    }
}

fn sum(a: Amount, b: Amount) -> Amount {
    Amount::new(a.value().saturating_add(b.value()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PeerAccountLimits;
    use proptest::prelude::*;

    fn path(s: &str) -> AccountPath {
        AccountPath::new(s).unwrap()
    }

    fn ledger_with(paths: &[&str]) -> Ledger {
        let ledger = Ledger::new();
        for p in paths {
            ledger.create_account(path(p)).unwrap();
        }
        ledger
    }

    #[test]
    fn test_prepare_post() {
        let ledger = ledger_with(&["a", "b"]);
        let transfer = ledger.prepare(&path("a"), &path("b"), Amount::new(100)).unwrap();
        assert_eq!(transfer.state, TransferState::Prepared);

        let a = ledger.get_account(&path("a")).unwrap();
        assert_eq!(a.debits_pending, Amount::new(100));
        assert_eq!(a.debits_posted, Amount::ZERO);

        let posted = ledger.post(&transfer).unwrap();
        assert_eq!(posted.state, TransferState::Posted);

        let a = ledger.get_account(&path("a")).unwrap();
        let b = ledger.get_account(&path("b")).unwrap();
        assert_eq!(a.debits_pending, Amount::ZERO);
        assert_eq!(a.debits_posted, Amount::new(100));
        assert_eq!(b.credits_posted, Amount::new(100));
        assert!(ledger.totals().is_balanced());
    }

    #[test]
    fn test_void_restores_pending() {
        let ledger = ledger_with(&["a", "b"]);
        let before_a = ledger.get_account(&path("a")).unwrap();
        let before_b = ledger.get_account(&path("b")).unwrap();

        let transfer = ledger.prepare(&path("a"), &path("b"), Amount::new(7)).unwrap();
        ledger.void(&transfer).unwrap();

        assert_eq!(ledger.get_account(&path("a")).unwrap(), before_a);
        assert_eq!(ledger.get_account(&path("b")).unwrap(), before_b);
    }

    #[test]
    fn test_double_resolution_rejected() {
        let ledger = ledger_with(&["a", "b"]);
        let transfer = ledger.prepare(&path("a"), &path("b"), Amount::new(1)).unwrap();
        ledger.post(&transfer).unwrap();

        assert_eq!(ledger.post(&transfer), Err(LedgerError::NotPending(transfer.id)));
        assert_eq!(ledger.void(&transfer), Err(LedgerError::NotPending(transfer.id)));
    }

    #[test]
    fn test_missing_accounts() {
        let ledger = ledger_with(&["a"]);

        assert_eq!(
            ledger.prepare(&path("x"), &path("a"), Amount::new(1)),
            Err(LedgerFailure::InvalidAccount {
                which_account: WhichAccount::Debit,
                account_path: path("x"),
            })
        );
        assert_eq!(
            ledger.prepare(&path("a"), &path("y"), Amount::new(1)),
            Err(LedgerFailure::InvalidAccount {
                which_account: WhichAccount::Credit,
                account_path: path("y"),
            })
        );
        assert_eq!(ledger.get_account(&path("a")).unwrap().debits_pending, Amount::ZERO);
    }

    #[test]
    fn test_duplicate_account_rejected() {
        let ledger = ledger_with(&["a"]);
        assert_eq!(
            ledger.create_account(path("a")),
            Err(LedgerError::AccountExists(path("a")))
        );
        assert!(!ledger.ensure_account(path("a")));
        assert!(ledger.ensure_account(path("b")));
    }

    struct Bounded;

    impl LimitPolicy for Bounded {
        fn limit(&self, path: &AccountPath) -> AccountLimit {
            match path.as_str() {
                "capped-debit" => AccountLimit::DebitsMustNotExceedCredits,
                "capped-credit" => AccountLimit::CreditsMustNotExceedDebits,
                _ => AccountLimit::NoLimit,
            }
        }
    }

    #[test]
    fn test_limits_count_pending() {
        let ledger = Ledger::with_policy(Bounded);
        for p in ["capped-debit", "capped-credit", "free"] {
            ledger.create_account(path(p)).unwrap();
        }

        // fund capped-debit with 10 credits
        let funding = ledger.prepare(&path("free"), &path("capped-debit"), Amount::new(10)).unwrap();
        ledger.post(&funding).unwrap();

        let first = ledger.prepare(&path("capped-debit"), &path("free"), Amount::new(6)).unwrap();
        assert_eq!(
            ledger.prepare(&path("capped-debit"), &path("free"), Amount::new(5)),
            Err(LedgerFailure::ExceedsCredits {
                account_path: path("capped-debit")
            })
        );
        ledger.void(&first).unwrap();
        assert!(ledger.prepare(&path("capped-debit"), &path("free"), Amount::new(10)).is_ok());

        assert_eq!(
            ledger.prepare(&path("free"), &path("capped-credit"), Amount::new(1)),
            Err(LedgerFailure::ExceedsDebits {
                account_path: path("capped-credit")
            })
        );
    }

    #[test]
    fn test_peer_limits_policy_plugs_in() {
        let ledger = Ledger::with_policy(PeerAccountLimits::default());
        ledger.create_account(path("a")).unwrap();
        ledger.create_account(path("b")).unwrap();
        assert!(ledger.prepare(&path("a"), &path("b"), Amount::new(5)).is_ok());
    }

    #[test]
    fn test_overflow_is_a_failure() {
        let ledger = ledger_with(&["a", "b"]);
        ledger.prepare(&path("a"), &path("b"), Amount::new(u128::MAX)).unwrap();
        assert_eq!(
            ledger.prepare(&path("a"), &path("b"), Amount::new(1)),
            Err(LedgerFailure::Overflow { account_path: path("a") })
        );
    }

    #[test]
    fn test_remove_account_releases_other_side() {
        let ledger = ledger_with(&["a", "b"]);
        let transfer = ledger.prepare(&path("a"), &path("b"), Amount::new(3)).unwrap();

        let removed = ledger.remove_account(&path("a")).unwrap();
        assert_eq!(removed.debits_pending, Amount::new(3));
        assert_eq!(ledger.get_account(&path("b")).unwrap().credits_pending, Amount::ZERO);
        assert!(!ledger.is_pending(transfer.id));
        assert_eq!(ledger.void(&transfer), Err(LedgerError::NotPending(transfer.id)));
        assert!(ledger.remove_account(&path("a")).is_none());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Prepare { debit: usize, credit: usize, amount: u64 },
        Post(usize),
        Void(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..4, 0usize..4, 0u64..1_000_000).prop_map(|(debit, credit, amount)| Op::Prepare {
                debit,
                credit,
                amount
            }),
            (0usize..64).prop_map(Op::Post),
            (0usize..64).prop_map(Op::Void),
        ]
    }

    proptest! {
        #[test]
        fn prop_conservation(ops in prop::collection::vec(op(), 0..100)) {
            let names = ["w", "x", "y", "z"];
            let ledger = ledger_with(&names);
            let mut prepared: Vec<Transfer> = Vec::new();

            for op in ops {
                match op {
                    Op::Prepare { debit, credit, amount } => {
                        let transfer = ledger
                            .prepare(&path(names[debit]), &path(names[credit]), Amount::from(amount))
                            .unwrap();
                        prepared.push(transfer);
                    }
                    Op::Post(i) if !prepared.is_empty() => {
                        let transfer = prepared.remove(i % prepared.len());
                        ledger.post(&transfer).unwrap();
                    }
                    Op::Void(i) if !prepared.is_empty() => {
                        let transfer = prepared.remove(i % prepared.len());
                        ledger.void(&transfer).unwrap();
                    }
                    _ => {}
                }
                // pending sides always match, even mid-flight
                let totals = ledger.totals();
                prop_assert_eq!(totals.credits_pending, totals.debits_pending);
            }

            for transfer in prepared.drain(..) {
                ledger.void(&transfer).unwrap();
            }

            let totals = ledger.totals();
            prop_assert!(totals.is_balanced());
            prop_assert_eq!(totals.credits_pending, Amount::ZERO);
            prop_assert!(ledger.pending_transfers().is_empty());
        }
    }
}
