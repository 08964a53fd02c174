//! Two-node fixtures over the in-memory network.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use iceberg_core::{Cid, Direction, Keypair, PeerId, Post, PostBuilder, Region, Vote};
use iceberg_leveling::LevelingEngine;
use iceberg_store::{ContentStore, MemoryStore};

use crate::dispatcher::Dispatcher;
use crate::events::EventBus;
use crate::registry::PeerRegistry;
use crate::session::{SyncConfig, SyncContext, SyncSession};
use crate::transport::memory::{MemoryNetwork, MemoryTransport};
use crate::transport::Transport;

pub(crate) fn post(keypair: &Keypair, region: &str, created_at: i64) -> Post {
    PostBuilder::new(keypair.identity(), Region::new(region).unwrap())
        .title(format!("post {created_at}"))
        .body("body")
        .created_at(created_at)
        .sign(keypair)
}

pub(crate) fn vote(
    keypair: &Keypair,
    target: Cid,
    direction: Direction,
    region: &str,
    timestamp: i64,
) -> Vote {
    Vote::sign(keypair, target, direction, Region::new(region).unwrap(), timestamp)
}

pub(crate) struct Harness {
    pub network: Arc<MemoryNetwork>,
    config: SyncConfig,
    raw: Mutex<HashMap<PeerId, Arc<MemoryTransport>>>,
}

impl Harness {
    /// Small batches so pagination is exercised.
    pub async fn new() -> Self {
        Self::with_config(SyncConfig {
            max_batch_size: 3,
            ..SyncConfig::default()
        })
        .await
    }

    pub async fn with_config(config: SyncConfig) -> Self {
        Self {
            network: MemoryNetwork::new(),
            config,
            raw: Mutex::new(HashMap::new()),
        }
    }

    /// A node with a running dispatcher.
    pub async fn peer(&self, n: u8, regions: &[&str]) -> TestPeer {
        let id = PeerId::from_bytes([n; 32]);
        let transport = Arc::new(self.network.create_transport(id));
        transport.open().await.unwrap();

        let content = Arc::new(
            ContentStore::new(Arc::new(MemoryStore::new()), LevelingEngine::default())
                .with_max_skew(self.config.max_clock_skew),
        );
        let ctx = Arc::new(SyncContext::new(
            content,
            transport,
            Arc::new(PeerRegistry::default()),
            Arc::new(EventBus::new()),
            self.config.clone(),
            regions.iter().map(|r| Region::new(*r).unwrap()).collect(),
        ));
        let (shutdown, rx) = watch::channel(false);
        Dispatcher::new(ctx.clone()).spawn(rx);

        TestPeer { id, ctx, shutdown }
    }

    /// An open transport nobody reads from, unless the test does.
    pub async fn silent_peer(&self, n: u8) -> PeerId {
        let id = PeerId::from_bytes([n; 32]);
        let transport = Arc::new(self.network.create_transport(id));
        transport.open().await.unwrap();
        self.raw.lock().insert(id, transport);
        id
    }

    pub fn raw_transport(&self, id: &PeerId) -> Arc<MemoryTransport> {
        self.raw.lock()[id].clone()
    }
}

pub(crate) struct TestPeer {
    pub id: PeerId,
    pub ctx: Arc<SyncContext<MemoryStore>>,
    shutdown: watch::Sender<bool>,
}

impl TestPeer {
    /// Mark both sides connected without a handshake.
    pub fn link(&self, other: &TestPeer) {
        self.ctx.registry.connect(other.id);
        other.ctx.registry.connect(self.id);
    }

    pub fn session(&self, peer: PeerId, region: &str, since: Option<i64>) -> SyncSession<MemoryStore> {
        let (_cancel, rx) = watch::channel(false);
        SyncSession::new(self.ctx.clone(), peer, Region::new(region).unwrap(), rx).since(since)
    }
}

impl Drop for TestPeer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
