//! Transport abstraction for peer messages.
//!
//! The transport carries already-serialized messages between nodes and
//! reports who sent each inbound message. Implementations may use HTTP,
//! WebSockets, or anything else; delivery is fire-and-forget from the
//! protocol's point of view.

use async_trait::async_trait;
use bytes::Bytes;

use tally_core::NodeId;

use crate::error::Result;

/// Sends and receives serialized peer messages.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver a message to a peer. `Ok` means the peer accepted it.
    async fn send(&self, destination: &NodeId, message: Bytes) -> Result<()>;

    /// Receive the next inbound message and its authenticated sender.
    async fn recv(&self) -> Result<(NodeId, Bytes)>;

    /// The local node's identity.
    fn local_node_id(&self) -> NodeId;
}

/// An in-memory transport for tests and simulations.
///
/// Every node registered with a [`memory::MemoryNetwork`] gets a mailbox;
/// sending to a node that is not registered fails.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::{mpsc, Mutex, RwLock};

    use crate::error::PeeringError;

    #[derive(Debug)]
    struct Envelope {
        from: NodeId,
        message: Bytes,
    }

    /// Shared routing state for a set of in-memory transports.
    #[derive(Default)]
    pub struct MemoryNetwork {
        mailboxes: RwLock<HashMap<NodeId, mpsc::Sender<Envelope>>>,
    }

    impl MemoryNetwork {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Register a node and return its transport.
        pub async fn create_transport(self: &Arc<Self>, node_id: NodeId) -> MemoryTransport {
            let (tx, rx) = mpsc::channel(1000);
            self.mailboxes.write().await.insert(node_id, tx);

            MemoryTransport {
                node_id,
                network: Arc::clone(self),
                receiver: Mutex::new(rx),
            }
        }

        /// Unregister a node. Later sends to it fail.
        pub async fn disconnect(&self, node_id: &NodeId) {
            self.mailboxes.write().await.remove(node_id);
        }
    }

    pub struct MemoryTransport {
        node_id: NodeId,
        network: Arc<MemoryNetwork>,
        receiver: Mutex<mpsc::Receiver<Envelope>>,
    }

    impl MemoryTransport {
        /// Receive with a timeout. `Ok(None)` if nothing arrived in time.
        pub async fn recv_timeout(&self, timeout: std::time::Duration) -> Result<Option<(NodeId, Bytes)>> {
            match tokio::time::timeout(timeout, self.recv()).await {
                Ok(result) => result.map(Some),
                Err(_) => Ok(None),
            }
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&self, destination: &NodeId, message: Bytes) -> Result<()> {
            let mailboxes = self.network.mailboxes.read().await;
            let mailbox = mailboxes
                .get(destination)
                .ok_or_else(|| PeeringError::PeerNotConnected(destination.to_string()))?;

            mailbox
                .send(Envelope {
                    from: self.node_id,
                    message,
                })
                .await
                .map_err(|_| PeeringError::Transport("peer mailbox closed".into()))
        }

        async fn recv(&self) -> Result<(NodeId, Bytes)> {
            let mut rx = self.receiver.lock().await;
            match rx.recv().await {
                Some(envelope) => Ok((envelope.from, envelope.message)),
                None => Err(PeeringError::Transport("mailbox closed".into())),
            }
        }

        fn local_node_id(&self) -> NodeId {
            self.node_id
        }
    }
}
