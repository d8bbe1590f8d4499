//! Scripted settlement backends.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use tally_core::{Amount, NodeId};
use tally_settlement::SettlementBackend;

/// One recorded `settle` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettleCall {
    pub amount: Amount,
    pub peer: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Succeed,
    Fail,
    /// Wait for `release`, then succeed.
    Pending,
}

/// A settlement backend that records calls and behaves as scripted.
///
/// Proofs are `"proof:<amount>"`. Incoming proofs are accepted unless
/// [`reject_incoming`](MockBackend::reject_incoming) is set.
pub struct MockBackend {
    behavior: Behavior,
    calls: Mutex<Vec<SettleCall>>,
    received: Mutex<Vec<SettleCall>>,
    reject_incoming: Mutex<bool>,
    hold_incoming: Mutex<bool>,
    gate: Arc<Notify>,
}

impl MockBackend {
    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
            reject_incoming: Mutex::new(false),
            hold_incoming: Mutex::new(false),
            gate: Arc::new(Notify::new()),
        }
    }

    /// Every settlement succeeds immediately.
    pub fn succeeding() -> Self {
        Self::with_behavior(Behavior::Succeed)
    }

    /// Every settlement fails.
    pub fn failing() -> Self {
        Self::with_behavior(Behavior::Fail)
    }

    /// Every settlement waits for [`release`](MockBackend::release), then succeeds.
    pub fn pending() -> Self {
        Self::with_behavior(Behavior::Pending)
    }

    /// Let one waiting settlement finish.
    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn reject_incoming(&self) {
        *self.reject_incoming.lock() = true;
    }

    /// Make every incoming settlement wait for
    /// [`release`](MockBackend::release) before it is accepted.
    pub fn hold_incoming(&self) {
        *self.hold_incoming.lock() = true;
    }

    /// Every `settle` call so far, including ones still waiting.
    pub fn calls(&self) -> Vec<SettleCall> {
        self.calls.lock().clone()
    }

    /// Every accepted incoming settlement.
    pub fn received(&self) -> Vec<SettleCall> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl SettlementBackend for MockBackend {
    async fn settle(&self, amount: Amount, peer: &NodeId) -> anyhow::Result<Bytes> {
        self.calls.lock().push(SettleCall { amount, peer: *peer });
        match self.behavior {
            Behavior::Succeed => {}
            Behavior::Fail => anyhow::bail!("mock settlement failure"),
            Behavior::Pending => self.gate.notified().await,
        }
        Ok(Bytes::from(format!("proof:{amount}")))
    }

    async fn receive(&self, amount: Amount, peer: &NodeId, _proof: &Bytes) -> anyhow::Result<()> {
        let held = *self.hold_incoming.lock();
        if held {
            self.gate.notified().await;
        }
        anyhow::ensure!(!*self.reject_incoming.lock(), "mock rejected incoming settlement");
        self.received.lock().push(SettleCall { amount, peer: *peer });
        Ok(())
    }
}
