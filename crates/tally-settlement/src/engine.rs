//! Per-peer settlement loops.
//!
//! Each peered node with an active settlement scheme gets its own loop.
//! Every `check_interval` the loop reads the peer's accounts, works out how
//! much to settle, and if that is more than zero it:
//!
//! 1. prepares an outgoing transfer (interledger → settlement)
//! 2. calls the scheme backend's `settle`
//! 3. posts the transfer and tells the peer on success, or voids it on failure
//!
//! Attempts for one peer never overlap: a busy flag turns away any attempt
//! that starts while another is still waiting on the backend. Loops for
//! different peers are independent.
//!
//! Stopping a peer cancels its loop but not an attempt already waiting on
//! the backend, which may have committed externally. Such an attempt still
//! applies its real result while its reservation is pending: a paid
//! settlement is posted, a failed one voided. Only when the peer's accounts
//! were removed in the meantime (and the reservation with them) is the
//! result ignored on arrival. [`SettlementEngine::shutdown`] waits for
//! attempts in flight.
//!
//! A loop whose attempt fails with an error stops and leaves the running
//! set, so the peer can be started again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use tally_core::{Amount, MessageCodec, NodeId, PeerMessage, SettlementSchemeId};
use tally_ledger::{
    peer_accounts, process_settlement_prepare, Ledger, LedgerError, LedgerFailure,
    SettlementDirection, Transfer, TransferId,
};
use tally_peering::Transport;

use crate::backend::SettlementSchemes;
use crate::calculate::calculate_settlement_amount;
use crate::config::SettlementConfig;
use crate::error::{Result, SettlementError};
use crate::policy::{CreditPolicy, SymmetricCredit};

/// What one settlement attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// Another attempt for the same peer is still in flight.
    Busy,
    /// The peer has no running settlement loop.
    NotRunning,
    /// No backend is registered for the peer's scheme.
    SchemeMissing,
    /// The balance is below the threshold.
    NothingToSettle,
    /// The ledger refused the prepare. Nothing changed.
    Rejected(LedgerFailure),
    /// The backend paid and the transfer was posted.
    Settled { amount: Amount, transfer: TransferId },
    /// The backend failed and the transfer was voided.
    Failed { amount: Amount, error: String },
    /// The peer's accounts were removed while the backend call was
    /// outstanding. Nothing was recorded.
    Ignored { amount: Amount },
}

struct EngineShared {
    ledger: Arc<Ledger>,
    schemes: Arc<SettlementSchemes>,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn MessageCodec>,
    credit_policy: Arc<dyn CreditPolicy>,
    config: SettlementConfig,
}

/// One peer's settlement state.
struct PeerSettlement {
    peer: NodeId,
    scheme: SettlementSchemeId,
    busy: AtomicBool,
    cancel: CancellationToken,
}

/// Clears the busy flag when the attempt ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct PeerLoop {
    state: Arc<PeerSettlement>,
    handle: JoinHandle<()>,
}

type LoopMap = Arc<Mutex<HashMap<NodeId, PeerLoop>>>;

/// Runs settlement for every peer that has been started.
pub struct SettlementEngine {
    shared: Arc<EngineShared>,
    loops: LoopMap,
}

impl SettlementEngine {
    pub fn new(
        ledger: Arc<Ledger>,
        schemes: Arc<SettlementSchemes>,
        transport: Arc<dyn Transport>,
        codec: Arc<dyn MessageCodec>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                ledger,
                schemes,
                transport,
                codec,
                credit_policy: Arc::new(SymmetricCredit),
                config,
            }),
            loops: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Replace the default symmetric credit assumption.
    ///
    /// Only affects peers started afterwards.
    pub fn with_credit_policy(mut self, credit_policy: Arc<dyn CreditPolicy>) -> Self {
        let shared = &self.shared;
        self.shared = Arc::new(EngineShared {
            ledger: shared.ledger.clone(),
            schemes: shared.schemes.clone(),
            transport: shared.transport.clone(),
            codec: shared.codec.clone(),
            credit_policy,
            config: shared.config.clone(),
        });
        self
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.shared.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Peer lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Start the settlement loop for `peer`. Returns false if one is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_peer(&self, peer: NodeId, scheme: SettlementSchemeId) -> bool {
        let mut loops = self.loops.lock();
        if loops.contains_key(&peer) {
            return false;
        }

        let state = Arc::new(PeerSettlement {
            peer,
            scheme: scheme.clone(),
            busy: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });
        let handle = tokio::spawn(run_peer_loop(
            self.shared.clone(),
            state.clone(),
            Arc::downgrade(&self.loops),
        ));
        loops.insert(peer, PeerLoop { state, handle });

        tracing::info!(peer = %peer, scheme = %scheme, "settlement loop started");
        true
    }

    /// Stop the loop for `peer`. An attempt already in flight still
    /// finishes and records its result.
    pub fn stop_peer(&self, peer: &NodeId) -> bool {
        match self.loops.lock().remove(peer) {
            Some(peer_loop) => {
                peer_loop.state.cancel.cancel();
                tracing::info!(peer = %peer, "settlement loop stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, peer: &NodeId) -> bool {
        self.loops.lock().contains_key(peer)
    }

    pub fn running_peers(&self) -> Vec<NodeId> {
        let mut peers: Vec<NodeId> = self.loops.lock().keys().copied().collect();
        peers.sort();
        peers
    }

    /// Stop every loop and wait for them, and any attempt they have in
    /// flight, to finish.
    pub async fn shutdown(&self) {
        let loops: Vec<PeerLoop> = self.loops.lock().drain().map(|(_, peer_loop)| peer_loop).collect();
        for peer_loop in &loops {
            peer_loop.state.cancel.cancel();
        }
        for peer_loop in loops {
            let _ = peer_loop.handle.await;
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Settlement
    // ─────────────────────────────────────────────────────────────────────────

    /// Run one settlement attempt for `peer` now, outside the timer.
    ///
    /// Shares the busy flag with the loop, so it returns `Busy` while the
    /// loop's attempt is in flight.
    pub async fn settle_now(&self, peer: &NodeId) -> Result<SettlementOutcome> {
        let state = match self.loops.lock().get(peer) {
            Some(peer_loop) => peer_loop.state.clone(),
            None => return Ok(SettlementOutcome::NotRunning),
        };
        self.shared.attempt(&state).await
    }

    /// Record a settlement the peer says it made to us.
    ///
    /// The scheme backend checks the proof first. On acceptance the amount
    /// is moved from the peer's settlement account to its interledger
    /// account in one prepare and post.
    pub async fn handle_incoming_settlement(
        &self,
        from: &NodeId,
        scheme: &SettlementSchemeId,
        amount: Amount,
        proof: &Bytes,
    ) -> Result<Transfer> {
        let shared = &self.shared;
        let backend = shared
            .schemes
            .get(scheme)
            .ok_or_else(|| SettlementError::UnknownScheme(scheme.clone()))?;

        if peer_accounts(&shared.ledger, scheme, from).is_none() {
            return Err(SettlementError::MissingAccounts { peer: from.to_string() });
        }

        backend
            .receive(amount, from, proof)
            .await
            .map_err(|e| SettlementError::Backend(e.to_string()))?;

        let transfer =
            process_settlement_prepare(&shared.ledger, scheme, from, amount, SettlementDirection::Incoming)?;
        let posted = shared.ledger.post(&transfer)?;

        tracing::info!(peer = %from, scheme = %scheme, amount = %amount, transfer = %posted.id, "incoming settlement recorded");
        Ok(posted)
    }
}

impl Drop for SettlementEngine {
    fn drop(&mut self) {
        for peer_loop in self.loops.lock().values() {
            peer_loop.state.cancel.cancel();
        }
    }
}

impl EngineShared {
    async fn attempt(&self, state: &PeerSettlement) -> Result<SettlementOutcome> {
        if state.cancel.is_cancelled() {
            return Ok(SettlementOutcome::NotRunning);
        }
        let Some(_busy) = BusyGuard::acquire(&state.busy) else {
            tracing::debug!(peer = %state.peer, "settlement still in flight, skipping");
            return Ok(SettlementOutcome::Busy);
        };

        let peer = &state.peer;
        let scheme = &state.scheme;

        let Some(backend) = self.schemes.get(scheme) else {
            tracing::warn!(peer = %peer, scheme = %scheme, "settlement scheme not available, skipping settlement");
            return Ok(SettlementOutcome::SchemeMissing);
        };

        let accounts = peer_accounts(&self.ledger, scheme, peer)
            .ok_or_else(|| SettlementError::MissingAccounts { peer: peer.to_string() })?;

        let calculation =
            calculate_settlement_amount(&accounts, self.config.settlement_ratio, self.credit_policy.as_ref(), peer);
        let amount = calculation.amount;
        if amount.is_zero() {
            tracing::trace!(peer = %peer, ?calculation, "nothing to settle");
            return Ok(SettlementOutcome::NothingToSettle);
        }

        tracing::debug!(peer = %peer, ?calculation, "settling");

        let transfer = match process_settlement_prepare(
            &self.ledger,
            scheme,
            peer,
            amount,
            SettlementDirection::Outgoing,
        ) {
            Ok(transfer) => transfer,
            Err(failure) => {
                tracing::warn!(peer = %peer, amount = %amount, error = %failure, "settlement transfer rejected");
                return Ok(SettlementOutcome::Rejected(failure));
            }
        };

        let settled = match self.config.settle_timeout {
            Some(limit) => match tokio::time::timeout(limit, backend.settle(amount, peer)).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("settle timed out after {:?}", limit)),
            },
            None => backend.settle(amount, peer).await,
        };

        // The reservation goes away with the peer's accounts.
        if !self.ledger.is_pending(transfer.id) {
            tracing::info!(
                peer = %peer,
                amount = %amount,
                succeeded = settled.is_ok(),
                "peer accounts removed during settlement, ignoring result"
            );
            return Ok(SettlementOutcome::Ignored { amount });
        }

        match settled {
            Ok(proof) => {
                let posted = match self.ledger.post(&transfer) {
                    Ok(posted) => posted,
                    Err(LedgerError::NotPending(id)) => {
                        tracing::info!(peer = %peer, transfer = %id, "peer accounts removed during settlement, ignoring result");
                        return Ok(SettlementOutcome::Ignored { amount });
                    }
                    Err(e) => return Err(e.into()),
                };
                tracing::info!(peer = %peer, scheme = %scheme, amount = %amount, transfer = %posted.id, "settled");

                self.notify_peer(peer, scheme, amount, proof).await;
                Ok(SettlementOutcome::Settled {
                    amount,
                    transfer: posted.id,
                })
            }
            Err(error) => {
                if let Err(e) = self.ledger.void(&transfer) {
                    tracing::debug!(peer = %peer, error = %e, "settlement transfer already resolved");
                }
                tracing::warn!(peer = %peer, amount = %amount, error = %error, "settlement failed, transfer voided");
                Ok(SettlementOutcome::Failed {
                    amount,
                    error: error.to_string(),
                })
            }
        }
    }

    async fn notify_peer(&self, peer: &NodeId, scheme: &SettlementSchemeId, amount: Amount, proof: Bytes) {
        let message = PeerMessage::Settlement {
            settlement_scheme_id: scheme.clone(),
            amount,
            proof,
        };
        let bytes = match self.codec.serialize(&message) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(peer = %peer, error = %e, "failed to serialize settlement message");
                return;
            }
        };
        if let Err(e) = self.transport.send(peer, bytes).await {
            tracing::warn!(peer = %peer, error = %e, "failed to send settlement message");
        }
    }
}

async fn run_peer_loop(
    shared: Arc<EngineShared>,
    state: Arc<PeerSettlement>,
    loops: Weak<Mutex<HashMap<NodeId, PeerLoop>>>,
) {
    let period = shared.config.check_interval;
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Each tick's attempt runs on its own task so a slow backend never
    // delays the timer; the busy flag turns away overlapping ones.
    let mut attempts: JoinSet<bool> = JoinSet::new();
    let mut failed = false;

    loop {
        tokio::select! {
            _ = state.cancel.cancelled() => break,
            _ = interval.tick() => {
                let shared = shared.clone();
                let state = state.clone();
                attempts.spawn(async move {
                    match shared.attempt(&state).await {
                        Ok(_) => false,
                        Err(e) => {
                            tracing::error!(peer = %state.peer, error = %e, "settlement loop stopped");
                            true
                        }
                    }
                });
            }
            Some(joined) = attempts.join_next(), if !attempts.is_empty() => {
                if joined.unwrap_or(false) {
                    failed = true;
                    break;
                }
            }
        }
    }

    while attempts.join_next().await.is_some() {}

    if failed {
        state.cancel.cancel();
        // Leave the running set unless a newer loop already took our place.
        if let Some(loops) = loops.upgrade() {
            let mut loops = loops.lock();
            if loops
                .get(&state.peer)
                .is_some_and(|peer_loop| Arc::ptr_eq(&peer_loop.state, &state))
            {
                loops.remove(&state.peer);
            }
        }
    }
}
