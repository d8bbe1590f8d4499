//! Settlement scheme backends.
//!
//! A backend moves value over an external rail (a chain, a payment
//! network) and returns a proof. Backends are registered per scheme id.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use tally_core::{Amount, NodeId, SettlementSchemeId};

/// An external settlement rail.
#[async_trait]
pub trait SettlementBackend: Send + Sync {
    /// Pay `amount` to `peer`. Returns a proof the peer can check.
    async fn settle(&self, amount: Amount, peer: &NodeId) -> anyhow::Result<Bytes>;

    /// Check a proof for a settlement `peer` says it made to us.
    async fn receive(&self, _amount: Amount, _peer: &NodeId, _proof: &Bytes) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Registry of backends by scheme id.
#[derive(Default)]
pub struct SettlementSchemes {
    backends: RwLock<HashMap<SettlementSchemeId, Arc<dyn SettlementBackend>>>,
}

impl SettlementSchemes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend, replacing any previous one for the scheme.
    pub fn register(&self, scheme: SettlementSchemeId, backend: Arc<dyn SettlementBackend>) {
        self.backends.write().insert(scheme, backend);
    }

    pub fn unregister(&self, scheme: &SettlementSchemeId) -> Option<Arc<dyn SettlementBackend>> {
        self.backends.write().remove(scheme)
    }

    pub fn get(&self, scheme: &SettlementSchemeId) -> Option<Arc<dyn SettlementBackend>> {
        self.backends.read().get(scheme).cloned()
    }

    pub fn schemes(&self) -> Vec<SettlementSchemeId> {
        let mut schemes: Vec<SettlementSchemeId> = self.backends.read().keys().cloned().collect();
        schemes.sort();
        schemes
    }
}
