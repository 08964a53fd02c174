//! Inbound frame routing.
//!
//! The dispatcher owns the receive side of the transport. It answers Hellos
//! and SyncRequests itself and hands SyncBatches to the session waiting on
//! the matching request id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use iceberg_core::{PeerId, Region, SyncCursor, SyncItem};
use iceberg_store::Store;

use crate::error::{Result, SyncError};
use crate::events::NodeEvent;
use crate::messages::{RequestId, SyncErrorCode, SyncMessage, PROTOCOL_VERSION};
use crate::session::{cancelled, SyncContext};

/// A batch as delivered to the waiting session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReply {
    pub items: Vec<SyncItem>,
    pub has_more: bool,
}

struct Waiter {
    peer: PeerId,
    reply: oneshot::Sender<Result<BatchReply>>,
}

/// Requests awaiting a reply, and peers awaiting a Hello.
pub struct PendingRequests {
    next_id: AtomicU64,
    batches: Mutex<HashMap<RequestId, Waiter>>,
    hellos: Mutex<HashMap<PeerId, oneshot::Sender<()>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(u64::from(rand::random::<u32>())),
            batches: Mutex::new(HashMap::new()),
            hellos: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a request id and wait for its batch.
    pub fn register(&self, peer: PeerId) -> (RequestId, oneshot::Receiver<Result<BatchReply>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.batches.lock().insert(id, Waiter { peer, reply: tx });
        (id, rx)
    }

    pub fn cancel(&self, id: RequestId) {
        self.batches.lock().remove(&id);
    }

    /// Deliver a reply. Replies from a peer other than the one asked, or
    /// for unknown ids, are dropped. Returns whether a session took it.
    pub fn resolve(&self, id: RequestId, from: &PeerId, reply: Result<BatchReply>) -> bool {
        let mut batches = self.batches.lock();
        match batches.get(&id) {
            Some(waiter) if waiter.peer == *from => {}
            _ => return false,
        }
        match batches.remove(&id) {
            Some(waiter) => waiter.reply.send(reply).is_ok(),
            None => false,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn expect_hello(&self, peer: PeerId) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.hellos.lock().insert(peer, tx);
        rx
    }

    pub fn forget_hello(&self, peer: &PeerId) {
        self.hellos.lock().remove(peer);
    }

    fn hello_received(&self, peer: &PeerId) {
        if let Some(tx) = self.hellos.lock().remove(peer) {
            let _ = tx.send(());
        }
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

/// Receive loop for one node.
pub struct Dispatcher<S: Store> {
    ctx: Arc<SyncContext<S>>,
}

impl<S: Store> Dispatcher<S> {
    pub fn new(ctx: Arc<SyncContext<S>>) -> Self {
        Self { ctx }
    }

    /// Run until `shutdown` is raised or the transport fails.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let next = tokio::select! {
                _ = cancelled(&mut shutdown) => break,
                next = self.ctx.transport.recv() => next,
            };
            match next {
                Ok((from, frame)) => self.handle_frame(from, frame).await,
                Err(err) => {
                    warn!(error = %err, "transport receive failed");
                    break;
                }
            }
        }
        debug!("dispatcher stopped");
    }

    pub async fn handle_frame(&self, from: PeerId, frame: Bytes) {
        self.ctx.registry.record_received(&from);

        let message = match SyncMessage::decode(&frame) {
            Ok(message) => message,
            Err(err) => {
                warn!(peer = %from, error = %err, "rejected frame");
                self.ctx.registry.downgrade(&from);
                self.reply(
                    &from,
                    SyncMessage::error(None, SyncErrorCode::InvalidMessage, err.to_string()),
                )
                .await;
                return;
            }
        };
        trace!(peer = %from, kind = message.kind(), "frame received");

        match message {
            SyncMessage::Hello {
                peer_id,
                protocol_version,
                regions,
                reply,
            } => {
                self.on_hello(from, peer_id, protocol_version, regions, reply)
                    .await
            }
            SyncMessage::SyncRequest {
                request_id,
                region,
                after,
                limit,
            } => {
                tokio::spawn(serve_request(
                    self.ctx.clone(),
                    from,
                    request_id,
                    region,
                    after,
                    limit,
                ));
            }
            SyncMessage::SyncBatch {
                request_id,
                items,
                has_more,
            } => {
                let batch = BatchReply { items, has_more };
                if !self.ctx.pending.resolve(request_id, &from, Ok(batch)) {
                    debug!(peer = %from, request_id, "unsolicited batch dropped");
                }
            }
            SyncMessage::Error {
                request_id: Some(request_id),
                code,
                message,
            } => {
                let err = SyncError::PeerError { code, message };
                if !self.ctx.pending.resolve(request_id, &from, Err(err)) {
                    debug!(peer = %from, request_id, "unsolicited error dropped");
                }
            }
            SyncMessage::Error {
                request_id: None,
                code,
                message,
            } => {
                warn!(peer = %from, ?code, %message, "peer reported error");
            }
        }
    }

    async fn on_hello(
        &self,
        from: PeerId,
        peer_id: PeerId,
        protocol_version: u8,
        regions: Vec<Region>,
        reply: bool,
    ) {
        if peer_id != from {
            warn!(peer = %from, claimed = %peer_id, "hello identity mismatch");
            self.ctx.registry.downgrade(&from);
            return;
        }
        if protocol_version != PROTOCOL_VERSION {
            warn!(
                peer = %from,
                local = PROTOCOL_VERSION,
                remote = protocol_version,
                "protocol version mismatch"
            );
            let message = format!(
                "protocol version {protocol_version} unsupported, expected {PROTOCOL_VERSION}"
            );
            self.reply(
                &from,
                SyncMessage::error(None, SyncErrorCode::VersionMismatch, message),
            )
            .await;
            return;
        }

        self.ctx.registry.observe(from, &regions);
        if self.ctx.registry.connect(from) {
            self.ctx
                .events
                .emit(NodeEvent::PeerConnected { peer: from });
        }
        self.ctx.pending.hello_received(&from);

        if reply {
            self.reply(&from, self.ctx.hello(false)).await;
        }
    }

    async fn reply(&self, peer: &PeerId, message: SyncMessage) {
        if let Err(err) = self.ctx.send(peer, &message).await {
            debug!(%peer, kind = message.kind(), error = %err, "reply not delivered");
        }
    }
}

/// Answer one SyncRequest from the local store.
///
/// The batch holds at most `min(limit, max_batch_size)` items; if it does
/// not fit in a frame it is halved until it does.
pub async fn serve_request<S: Store>(
    ctx: Arc<SyncContext<S>>,
    from: PeerId,
    request_id: RequestId,
    region: Region,
    after: SyncCursor,
    limit: u32,
) {
    let cap = ctx.config.batch_limit().min(limit.max(1) as usize);

    let mut items = match ctx.content.sync_items(&region, &after, cap + 1).await {
        Ok(items) => items,
        Err(err) => {
            if err.is_fatal() {
                ctx.latch_fatal(err.to_string());
            }
            warn!(peer = %from, request_id, error = %err, "cannot serve sync request");
            let reply = SyncMessage::error(
                Some(request_id),
                SyncErrorCode::InternalError,
                "store unavailable",
            );
            let _ = ctx.send(&from, &reply).await;
            return;
        }
    };
    let mut has_more = items.len() > cap;
    items.truncate(cap);

    let frame = loop {
        let served = items.len();
        let message = SyncMessage::SyncBatch {
            request_id,
            items,
            has_more,
        };
        match message.encode() {
            Ok(frame) => {
                debug!(peer = %from, %region, request_id, items = served, has_more, "serving batch");
                break frame;
            }
            Err(err) if served > 1 => {
                trace!(peer = %from, request_id, error = %err, "batch too large, halving");
                let SyncMessage::SyncBatch { items: mut all, .. } = message else {
                    return;
                };
                all.truncate(served / 2);
                items = all;
                has_more = true;
            }
            Err(err) => {
                warn!(peer = %from, request_id, error = %err, "cannot encode batch");
                let reply = SyncMessage::error(
                    Some(request_id),
                    SyncErrorCode::MessageTooLarge,
                    err.to_string(),
                );
                let _ = ctx.send(&from, &reply).await;
                return;
            }
        }
    };

    match ctx.transport.send(&from, frame).await {
        Ok(()) => ctx.registry.record_sent(&from),
        Err(err) => debug!(peer = %from, request_id, error = %err, "batch not delivered"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{post, Harness};
    use crate::transport::Transport;
    use iceberg_core::Keypair;
    use std::time::Duration;

    #[test]
    fn test_resolve_checks_sender() {
        let pending = PendingRequests::new();
        let asked = PeerId::from_bytes([1; 32]);
        let stranger = PeerId::from_bytes([2; 32]);
        let (id, mut rx) = pending.register(asked);

        let batch = || {
            Ok(BatchReply {
                items: vec![],
                has_more: false,
            })
        };
        assert!(!pending.resolve(id, &stranger, batch()));
        assert!(!pending.resolve(id + 1, &asked, batch()));
        assert!(rx.try_recv().is_err());

        assert!(pending.resolve(id, &asked, batch()));
        assert!(rx.try_recv().unwrap().is_ok());
        assert_eq!(pending.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_hello_connects_and_replies() {
        let harness = Harness::new().await;
        let a = harness.peer(1, &["BR-SP"]).await;
        let b = harness.peer(2, &["BR-RJ"]).await;
        let mut events = b.ctx.events.subscribe();

        let waiting = a.ctx.pending.expect_hello(b.id);
        a.ctx.send(&b.id, &a.ctx.hello(true)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();

        assert!(b.ctx.registry.is_connected(&a.id));
        assert!(a.ctx.registry.is_connected(&b.id));
        let regions = &a.ctx.registry.get(&b.id).unwrap().regions;
        assert!(regions.contains(&Region::new("BR-RJ").unwrap()));
        assert_eq!(
            events.recv().await.unwrap(),
            NodeEvent::PeerConnected { peer: a.id }
        );
    }

    #[tokio::test]
    async fn test_version_mismatch_refused() {
        let harness = Harness::new().await;
        let a = harness.peer(1, &["BR"]).await;
        let b = harness.peer(2, &["BR"]).await;

        let hello = SyncMessage::Hello {
            peer_id: a.id,
            protocol_version: PROTOCOL_VERSION + 1,
            regions: vec![],
            reply: true,
        };
        a.ctx.send(&b.id, &hello).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!b.ctx.registry.is_connected(&a.id));
    }

    #[tokio::test]
    async fn test_serves_bounded_batches() {
        let harness = Harness::new().await;
        let b = harness.peer(2, &["BR"]).await;
        let raw = harness.silent_peer(3).await;

        let author = Keypair::from_seed(&[9; 32]);
        for i in 0..5 {
            b.ctx
                .content
                .put_post(&post(&author, "BR-SP", 1_000 + i))
                .await
                .unwrap();
        }

        // Asks for 50; the responder caps at its batch size of 3.
        let request = SyncMessage::SyncRequest {
            request_id: 77,
            region: Region::new("BR").unwrap(),
            after: SyncCursor::ORIGIN,
            limit: 50,
        };
        harness
            .network
            .inject(raw, &b.id, request.encode().unwrap())
            .await
            .unwrap();

        let transport = harness.raw_transport(&raw);
        let (from, frame) = transport.recv().await.unwrap();
        assert_eq!(from, b.id);
        match SyncMessage::decode(&frame).unwrap() {
            SyncMessage::SyncBatch {
                request_id,
                items,
                has_more,
            } => {
                assert_eq!(request_id, 77);
                assert_eq!(items.len(), 3);
                assert!(has_more);
            }
            other => panic!("expected batch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_garbage_frame_downgrades_sender() {
        let harness = Harness::new().await;
        let b = harness.peer(2, &["BR"]).await;
        let raw = harness.silent_peer(3).await;

        harness
            .network
            .inject(raw, &b.id, Bytes::from_static(b"\xff\xff\xff"))
            .await
            .unwrap();

        let transport = harness.raw_transport(&raw);
        let (_, frame) = transport.recv().await.unwrap();
        assert!(matches!(
            SyncMessage::decode(&frame).unwrap(),
            SyncMessage::Error {
                code: SyncErrorCode::InvalidMessage,
                ..
            }
        ));
        assert!(b.ctx.registry.get(&raw).unwrap().reputation < 1.0);
    }
}
