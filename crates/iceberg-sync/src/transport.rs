//! Transport abstraction for the sync protocol.
//!
//! A transport moves opaque frames between peers; encoding lives in
//! [`crate::messages`]. Implementations may use WebSockets through a relay,
//! direct connections, or anything else that delivers frames.

use async_trait::async_trait;
use bytes::Bytes;

use iceberg_core::PeerId;

use crate::error::{Result, SyncError};
use crate::messages::SyncMessage;

/// Transport trait for sending and receiving frames.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish the session with the relays. Each call performs a handshake.
    async fn open(&self) -> Result<()>;

    /// Tear the session down. Closing a closed transport is a no-op.
    async fn close(&self) -> Result<()>;

    /// Send one frame to a specific peer.
    async fn send(&self, peer: &PeerId, frame: Bytes) -> Result<()>;

    /// Receive the next frame from any peer.
    ///
    /// Blocks until a frame is available or the transport fails.
    async fn recv(&self) -> Result<(PeerId, Bytes)>;

    /// Get the local node's identity.
    fn local_peer_id(&self) -> PeerId;
}

/// Encode and send a message.
pub async fn send_message<T: Transport + ?Sized>(
    transport: &T,
    peer: &PeerId,
    message: &SyncMessage,
) -> Result<()> {
    let frame = message.encode()?;
    transport.send(peer, frame).await
}

/// A simple in-memory transport for testing.
///
/// Uses channels to simulate message passing between nodes. A transport is
/// reachable only while open.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::{mpsc, Mutex, RwLock};

    /// Frame envelope for internal routing.
    #[derive(Debug, Clone)]
    struct Envelope {
        from: PeerId,
        frame: Bytes,
    }

    /// Shared state for the memory transport network.
    #[derive(Default)]
    pub struct MemoryNetwork {
        /// Sender channels for each open node.
        senders: RwLock<HashMap<PeerId, mpsc::Sender<Envelope>>>,
    }

    impl MemoryNetwork {
        /// Create a new memory network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Create a transport attached to this network. It is unreachable
        /// until opened.
        pub fn create_transport(self: &Arc<Self>, peer_id: PeerId) -> MemoryTransport {
            let (tx, rx) = mpsc::channel(1000);
            MemoryTransport {
                peer_id,
                network: Arc::clone(self),
                sender: tx,
                receiver: Mutex::new(rx),
                open: AtomicBool::new(false),
                handshakes: AtomicUsize::new(0),
            }
        }

        /// Drop a node from the network, as if its link died.
        pub async fn sever(&self, peer_id: &PeerId) {
            self.senders.write().await.remove(peer_id);
        }

        /// Inject a raw frame, bypassing the encoder.
        pub async fn inject(&self, from: PeerId, to: &PeerId, frame: Bytes) -> Result<()> {
            let sender = self
                .senders
                .read()
                .await
                .get(to)
                .cloned()
                .ok_or_else(|| SyncError::TransportFailure("peer not found".into()))?;
            sender
                .send(Envelope { from, frame })
                .await
                .map_err(|_| SyncError::TransportFailure("peer disconnected".into()))
        }
    }

    /// In-memory transport implementation.
    pub struct MemoryTransport {
        peer_id: PeerId,
        network: Arc<MemoryNetwork>,
        sender: mpsc::Sender<Envelope>,
        receiver: Mutex<mpsc::Receiver<Envelope>>,
        open: AtomicBool,
        handshakes: AtomicUsize,
    }

    impl MemoryTransport {
        /// Number of handshakes performed so far.
        pub fn handshakes(&self) -> usize {
            self.handshakes.load(Ordering::SeqCst)
        }

        pub fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn open(&self) -> Result<()> {
            self.handshakes.fetch_add(1, Ordering::SeqCst);
            self.network
                .senders
                .write()
                .await
                .insert(self.peer_id, self.sender.clone());
            self.open.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            if self.open.swap(false, Ordering::SeqCst) {
                self.network.senders.write().await.remove(&self.peer_id);
            }
            Ok(())
        }

        async fn send(&self, peer: &PeerId, frame: Bytes) -> Result<()> {
            if !self.is_open() {
                return Err(SyncError::NotConnected("transport closed".into()));
            }
            self.network.inject(self.peer_id, peer, frame).await
        }

        async fn recv(&self) -> Result<(PeerId, Bytes)> {
            let mut rx = self.receiver.lock().await;
            match rx.recv().await {
                Some(envelope) => Ok((envelope.from, envelope.frame)),
                None => Err(SyncError::TransportFailure("channel closed".into())),
            }
        }

        fn local_peer_id(&self) -> PeerId {
            self.peer_id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryNetwork;
    use super::*;
    use crate::messages::PROTOCOL_VERSION;

    #[tokio::test]
    async fn test_memory_transport_send_recv() {
        let network = MemoryNetwork::new();

        let node_a = PeerId::from_bytes([0xAA; 32]);
        let node_b = PeerId::from_bytes([0xBB; 32]);

        let transport_a = network.create_transport(node_a);
        let transport_b = network.create_transport(node_b);
        transport_a.open().await.unwrap();
        transport_b.open().await.unwrap();

        let msg = SyncMessage::Hello {
            peer_id: node_a,
            protocol_version: PROTOCOL_VERSION,
            regions: vec![],
            reply: false,
        };
        send_message(&transport_a, &node_b, &msg).await.unwrap();

        let (from, frame) = transport_b.recv().await.unwrap();
        assert_eq!(from, node_a);
        assert_eq!(SyncMessage::decode(&frame).unwrap(), msg);
    }

    #[tokio::test]
    async fn test_closed_peer_unreachable() {
        let network = MemoryNetwork::new();
        let node_a = PeerId::from_bytes([0xAA; 32]);
        let node_b = PeerId::from_bytes([0xBB; 32]);

        let transport_a = network.create_transport(node_a);
        let transport_b = network.create_transport(node_b);
        transport_a.open().await.unwrap();

        let err = transport_a.send(&node_b, Bytes::from_static(b"x")).await;
        assert!(matches!(err, Err(SyncError::TransportFailure(_))));

        transport_b.open().await.unwrap();
        transport_b.close().await.unwrap();
        transport_b.close().await.unwrap();
        assert!(transport_a.send(&node_b, Bytes::from_static(b"x")).await.is_err());
        assert_eq!(transport_b.handshakes(), 1);
    }

    #[tokio::test]
    async fn test_send_before_open_fails() {
        let network = MemoryNetwork::new();
        let transport = network.create_transport(PeerId::from_bytes([1; 32]));
        let err = transport
            .send(&PeerId::from_bytes([2; 32]), Bytes::new())
            .await;
        assert!(matches!(err, Err(SyncError::NotConnected(_))));
    }
}
