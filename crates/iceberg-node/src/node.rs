//! The Node: one Iceberg participant.
//!
//! The node owns the content store, the sync machinery and the connection
//! lifecycle, and exposes the operations the HTTP layer calls.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use iceberg_core::{
    Cid, Clock, Direction, Keypair, PeerId, Post, PostBuilder, Region, Report, StoredPost,
    SystemClock, Vote,
};
use iceberg_leveling::{LevelingEngine, Progress};
use iceberg_store::{
    ApplyOutcome, ContentResult, ContentStore, PostFilter, PostPager, RecomputeSummary, Store,
};
use iceberg_sync::{
    Discovery, Dispatcher, EventBus, NodeEvent, PeerAdvert, PeerRegistry, StaticDiscovery,
    SyncContext, SyncManager, Transport,
};

use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::status::{
    ConnectOutcome, DisconnectOutcome, NodeState, NodeStats, PeerSummary, PeersView,
    SyncScheduled,
};

const HOUR_MS: i64 = 60 * 60 * 1000;

/// Background tasks of a live connection.
struct Running {
    shutdown: watch::Sender<bool>,
    dispatcher: JoinHandle<()>,
    scheduler: JoinHandle<()>,
}

/// Builder for [`Node`].
pub struct NodeBuilder<S: Store> {
    backend: Arc<S>,
    config: NodeConfig,
    keypair: Option<Keypair>,
    transport: Option<Arc<dyn Transport>>,
    discovery: Option<Arc<dyn Discovery>>,
    clock: Arc<dyn Clock>,
}

impl<S: Store> NodeBuilder<S> {
    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    /// Identity used for local posts, votes and reports.
    pub fn keypair(mut self, keypair: Keypair) -> Self {
        self.keypair = Some(keypair);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Defaults to a [`StaticDiscovery`] built from the configured relays
    /// and bootstrap peers.
    pub fn discovery(mut self, discovery: Arc<dyn Discovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<Node<S>> {
        let config = self.config;
        config
            .validate()
            .map_err(|e| NodeError::Config(format!("{e:#}")))?;
        let region = config
            .home_region()
            .map_err(|e| NodeError::InvalidRegion(format!("{e:#}")))?;
        let regions = config
            .regions_of_interest()
            .map_err(|e| NodeError::InvalidRegion(format!("{e:#}")))?;
        let transport = self
            .transport
            .ok_or_else(|| NodeError::Config("a transport is required".into()))?;
        let discovery = match self.discovery {
            Some(discovery) => discovery,
            None => {
                let adverts = config
                    .bootstrap_adverts()
                    .map_err(|e| NodeError::Config(format!("{e:#}")))?;
                Arc::new(StaticDiscovery::new(config.relays.clone(), adverts))
            }
        };
        let engine = LevelingEngine::new(config.rules.clone())
            .map_err(|e| NodeError::Config(e.to_string()))?;

        let content = Arc::new(
            ContentStore::new(self.backend, engine)
                .with_clock(self.clock.clone())
                .with_max_skew(config.sync.max_clock_skew),
        );
        let registry = Arc::new(PeerRegistry::with_clock(
            config.registry.clone(),
            self.clock.clone(),
        ));
        let events = Arc::new(EventBus::with_capacity(config.event_capacity));
        let ctx = Arc::new(SyncContext::new(
            content.clone(),
            transport,
            registry,
            events,
            config.sync.clone(),
            regions.clone(),
        ));

        Ok(Node {
            keypair: self.keypair.unwrap_or_else(Keypair::generate),
            manager: Arc::new(SyncManager::new(ctx.clone())),
            config,
            region,
            regions,
            content,
            ctx,
            discovery,
            clock: self.clock,
            running: Mutex::new(None),
            state: watch::channel(NodeState::Disconnected).0,
        })
    }
}

/// One Iceberg node.
pub struct Node<S: Store> {
    config: NodeConfig,
    region: Region,
    regions: Vec<Region>,
    keypair: Keypair,
    content: Arc<ContentStore<S>>,
    ctx: Arc<SyncContext<S>>,
    manager: Arc<SyncManager<S>>,
    discovery: Arc<dyn Discovery>,
    clock: Arc<dyn Clock>,
    /// Serializes connect and disconnect.
    running: Mutex<Option<Running>>,
    state: watch::Sender<NodeState>,
}

impl<S: Store> Node<S> {
    pub fn builder(backend: Arc<S>) -> NodeBuilder<S> {
        NodeBuilder {
            backend,
            config: NodeConfig::default(),
            keypair: None,
            transport: None,
            discovery: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.ctx.local_peer()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn content(&self) -> &Arc<ContentStore<S>> {
        &self.content
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.ctx.registry
    }

    pub fn state(&self) -> NodeState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == NodeState::Connected
    }

    /// Follow lifecycle transitions.
    pub fn watch_state(&self) -> watch::Receiver<NodeState> {
        self.state.subscribe()
    }

    fn transition(&self, next: NodeState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "node state");
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.manager.active_sessions()
    }

    /// The latched fatal store failure, if any.
    pub fn store_failure(&self) -> Option<String> {
        self.ctx.fatal()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Connection Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Join the network. A second call while connected returns
    /// [`ConnectOutcome::AlreadyConnected`] without touching the transport.
    pub async fn connect(&self) -> Result<ConnectOutcome> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(ConnectOutcome::AlreadyConnected);
        }
        if let Some(error) = self.ctx.fatal() {
            return Err(NodeError::StoreFailure(error));
        }

        info!(
            peer = %self.peer_id(),
            region = %self.region,
            relays = ?self.discovery.relays(),
            "connecting"
        );
        self.transition(NodeState::Connecting);
        if let Err(err) = self.ctx.transport.open().await {
            self.transition(NodeState::Disconnected);
            return Err(err.into());
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let dispatcher = Dispatcher::new(self.ctx.clone()).spawn(shutdown_rx.clone());
        self.manager.resume();

        let adverts = self.discover().await;
        let peers = self.manager.introduce(&adverts).await;
        self.transition(NodeState::Connected);

        if self.config.sync_on_connect {
            for region in &self.regions {
                self.manager.schedule(region, None);
            }
        }
        let scheduler = tokio::spawn(run_scheduler(
            self.manager.clone(),
            self.regions.clone(),
            self.config.clone(),
            self.clock.clone(),
            shutdown_rx,
        ));

        *running = Some(Running {
            shutdown,
            dispatcher,
            scheduler,
        });
        info!(peers = peers.len(), "connected");
        Ok(ConnectOutcome::Connected { peers: peers.len() })
    }

    /// Leave the network. Without a connection this is a successful no-op.
    pub async fn disconnect(&self) -> Result<DisconnectOutcome> {
        let mut running = self.running.lock().await;
        let Some(tasks) = running.take() else {
            return Ok(DisconnectOutcome::AlreadyDisconnected);
        };
        self.transition(NodeState::Disconnecting);

        // The scheduler must be gone before the session table is drained,
        // or a late tick could start sessions that outlive the connection.
        let _ = tasks.shutdown.send(true);
        for handle in [tasks.scheduler, tasks.dispatcher] {
            if let Err(err) = handle.await {
                warn!(error = %err, "background task panicked");
            }
        }
        self.manager.shutdown().await;

        for peer in self.ctx.registry.disconnect_all() {
            self.ctx.events.emit(NodeEvent::PeerDisconnected { peer });
        }
        let closed = self.ctx.transport.close().await;
        self.transition(NodeState::Disconnected);
        closed?;
        info!("disconnected");
        Ok(DisconnectOutcome::Disconnected)
    }

    /// Candidate peers for every region of interest, one advert per peer.
    async fn discover(&self) -> Vec<PeerAdvert> {
        let mut merged: HashMap<PeerId, PeerAdvert> = HashMap::new();
        let mut order = Vec::new();
        for region in &self.regions {
            match self.discovery.discover(region).await {
                Ok(found) => {
                    for advert in found {
                        match merged.get_mut(&advert.peer_id) {
                            Some(known) => {
                                for r in advert.regions {
                                    if !known.regions.contains(&r) {
                                        known.regions.push(r);
                                    }
                                }
                            }
                            None => {
                                order.push(advert.peer_id);
                                merged.insert(advert.peer_id, advert);
                            }
                        }
                    }
                }
                Err(err) => warn!(%region, error = %err, "discovery failed"),
            }
        }
        order
            .into_iter()
            .filter_map(|peer| merged.remove(&peer))
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Status
    // ─────────────────────────────────────────────────────────────────────────

    pub fn stats(&self) -> NodeStats {
        let registry = self.ctx.registry.stats();
        NodeStats {
            state: self.state(),
            connected: self.is_connected(),
            peer_count: registry.connected,
            messages_sent: registry.messages_sent,
            messages_received: registry.messages_received,
            region: self.region.to_string(),
            relays: self.discovery.relays(),
            active_sessions: self.manager.active_sessions(),
        }
    }

    pub fn peers(&self) -> PeersView {
        if !self.is_connected() {
            return PeersView::disconnected();
        }
        let peers: Vec<PeerSummary> = self
            .ctx
            .registry
            .peers()
            .iter()
            .map(PeerSummary::from)
            .collect();
        PeersView {
            connected: true,
            count: peers.len(),
            peers,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.ctx.events.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sync
    // ─────────────────────────────────────────────────────────────────────────

    /// Schedule an immediate sync of `region` (the home region if None)
    /// with eligible peers. `since` replaces the saved checkpoints for this
    /// round. Returns how many sessions were started.
    pub async fn request_sync(&self, region: Option<&str>, since: Option<i64>) -> Result<SyncScheduled> {
        if !self.is_connected() {
            return Err(NodeError::NotConnected);
        }
        if let Some(error) = self.ctx.fatal() {
            return Err(NodeError::StoreFailure(error));
        }
        let region = match region {
            Some(code) => {
                Region::new(code).map_err(|e| NodeError::InvalidRegion(e.to_string()))?
            }
            None => self.region.clone(),
        };

        let sessions = self.manager.schedule(&region, since);
        debug!(%region, ?since, sessions, "sync requested");
        Ok(SyncScheduled {
            region: region.to_string(),
            sessions,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local Content
    // ─────────────────────────────────────────────────────────────────────────

    /// Sign and store a new post by this node's identity.
    pub async fn publish_post(
        &self,
        title: &str,
        body: &str,
        region: Option<&str>,
    ) -> Result<Post> {
        let region = match region {
            Some(code) => {
                Region::new(code).map_err(|e| NodeError::InvalidRegion(e.to_string()))?
            }
            None => self.region.clone(),
        };
        let now = self.clock.now_millis();
        let author = self.keypair.identity();

        let previous = self
            .check(self.content.recent_post_times(&author, now - HOUR_MS).await)?;
        self.content
            .engine()
            .rules()
            .spam
            .check(&previous, now)
            .map_err(NodeError::RateLimited)?;

        let post = PostBuilder::new(author, region)
            .title(title)
            .body(body)
            .created_at(now)
            .sign(&self.keypair);
        let outcome = self.check(self.content.put_post(&post).await)?;
        self.announce(&outcome);
        info!(cid = %post.cid, region = %post.region(), "post published");
        Ok(post)
    }

    /// Vote on someone else's post from the home region.
    pub async fn cast_vote(&self, cid: &Cid, direction: Direction) -> Result<ApplyOutcome> {
        let stored = self.check(self.content.get(cid).await)?;
        let voter = self.keypair.identity();
        if stored.post.author() == &voter {
            return Err(NodeError::SelfVote(*cid));
        }
        let vote = Vote::sign(
            &self.keypair,
            *cid,
            direction,
            self.region.clone(),
            self.clock.now_millis(),
        );
        let outcome = self.check(self.content.put_vote(&vote).await)?;
        self.announce(&outcome);
        Ok(outcome)
    }

    pub async fn report(&self, cid: &Cid, reason: &str) -> Result<ApplyOutcome> {
        self.check(self.content.get(cid).await)?;
        let report = Report::sign(&self.keypair, *cid, reason, self.clock.now_millis());
        let outcome = self.check(self.content.put_report(&report).await)?;
        self.announce(&outcome);
        Ok(outcome)
    }

    /// Tombstone one of this node's own posts.
    pub async fn delete_post(&self, cid: &Cid) -> Result<ApplyOutcome> {
        let outcome = self.check(self.content.delete(cid, &self.keypair.identity()).await)?;
        self.announce(&outcome);
        Ok(outcome)
    }

    pub async fn get_post(&self, cid: &Cid) -> Result<StoredPost> {
        self.check(self.content.get(cid).await)
    }

    pub fn list_posts(&self, filter: PostFilter) -> PostPager<S> {
        self.content.list(filter)
    }

    pub async fn progress(&self, cid: &Cid) -> Result<Progress> {
        self.check(self.content.progress(cid).await)
    }

    /// Re-level every post now.
    pub async fn recompute_all(&self) -> Result<RecomputeSummary> {
        let summary = self.check(self.content.recompute_all().await)?;
        for change in &summary.level_changes {
            self.ctx.events.emit(NodeEvent::LevelChanged {
                cid: change.cid,
                from: change.from,
                to: change.to,
            });
        }
        Ok(summary)
    }

    /// Latch fatal store failures before surfacing them.
    fn check<T>(&self, result: ContentResult<T>) -> Result<T> {
        result.map_err(|err| {
            if err.is_fatal() {
                self.ctx.latch_fatal(err.to_string());
            }
            NodeError::Content(err)
        })
    }

    fn announce(&self, outcome: &ApplyOutcome) {
        if outcome.changed {
            self.ctx.events.emit(NodeEvent::PostApplied {
                cid: outcome.cid,
                from: None,
            });
        }
        if let Some(change) = outcome.level_change {
            self.ctx.events.emit(NodeEvent::LevelChanged {
                cid: change.cid,
                from: change.from,
                to: change.to,
            });
        }
    }
}

/// Periodic sync rounds with stale sweeps, and leveling sweeps.
async fn run_scheduler<S: Store>(
    manager: Arc<SyncManager<S>>,
    regions: Vec<Region>,
    config: NodeConfig,
    clock: Arc<dyn Clock>,
    mut shutdown: watch::Receiver<bool>,
) {
    let start = tokio::time::Instant::now();
    let mut sync_tick =
        tokio::time::interval_at(start + config.sync.sync_interval, config.sync.sync_interval);
    let mut level_tick =
        tokio::time::interval_at(start + config.leveling_interval, config.leveling_interval);
    sync_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    level_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let ctx = manager.context().clone();

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = sync_tick.tick() => {
                for peer in ctx.registry.sweep_stale(clock.now_millis()) {
                    manager.cancel_peer(&peer);
                }
                if ctx.fatal().is_some() {
                    continue;
                }
                for region in &regions {
                    manager.schedule(region, None);
                }
            }
            _ = level_tick.tick() => {
                match ctx.content.recompute_all().await {
                    Ok(summary) => {
                        debug!(scanned = summary.scanned, changed = summary.changed, "leveling sweep");
                        for change in summary.level_changes {
                            ctx.events.emit(NodeEvent::LevelChanged {
                                cid: change.cid,
                                from: change.from,
                                to: change.to,
                            });
                        }
                    }
                    Err(err) if err.is_fatal() => ctx.latch_fatal(err.to_string()),
                    Err(err) => warn!(error = %err, "leveling sweep failed"),
                }
            }
        }
    }
    debug!("scheduler stopped");
}
