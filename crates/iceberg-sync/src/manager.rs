//! Session scheduling.
//!
//! The manager runs at most one session per (peer, region), introduces the
//! node to discovered peers, and turns session outcomes into events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use iceberg_core::{PeerId, Region};
use iceberg_store::Store;

use crate::discovery::PeerAdvert;
use crate::error::SyncError;
use crate::events::NodeEvent;
use crate::session::{SessionReport, SyncContext, SyncSession};

type SessionKey = (PeerId, Region);

struct ActiveSession {
    id: u64,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Runs sync sessions for one node.
///
/// [`shutdown`](Self::shutdown) closes the manager to new sessions until
/// [`resume`](Self::resume) is called.
pub struct SyncManager<S: Store> {
    ctx: Arc<SyncContext<S>>,
    sessions: Arc<Mutex<HashMap<SessionKey, ActiveSession>>>,
    next_id: AtomicU64,
    /// Checked and cleared under the `sessions` lock.
    accepting: AtomicBool,
}

impl<S: Store> SyncManager<S> {
    pub fn new(ctx: Arc<SyncContext<S>>) -> Self {
        Self {
            ctx,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            accepting: AtomicBool::new(true),
        }
    }

    pub fn context(&self) -> &Arc<SyncContext<S>> {
        &self.ctx
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Handshake
    // ─────────────────────────────────────────────────────────────────────────

    /// Send a Hello to every advertised peer not yet connected and wait, up
    /// to the handshake timeout, for their replies. Returns the peers that
    /// answered.
    pub async fn introduce(&self, adverts: &[PeerAdvert]) -> Vec<PeerId> {
        let local = self.ctx.local_peer();
        let registry = &self.ctx.registry;
        let hello = self.ctx.hello(true);

        let mut waiting = Vec::new();
        for advert in adverts {
            let peer = advert.peer_id;
            if peer == local {
                continue;
            }
            registry.observe(peer, &advert.regions);
            if registry.is_connected(&peer) {
                continue;
            }
            registry.connecting(peer);
            let reply = self.ctx.pending.expect_hello(peer);
            match self.ctx.send(&peer, &hello).await {
                Ok(()) => waiting.push((peer, reply)),
                Err(err) => {
                    debug!(%peer, error = %err, "hello not delivered");
                    self.ctx.pending.forget_hello(&peer);
                    registry.disconnect(&peer);
                    registry.record_failure(&peer);
                }
            }
        }

        let deadline = tokio::time::Instant::now() + self.ctx.config.handshake_timeout;
        let mut connected = Vec::new();
        for (peer, reply) in waiting {
            match tokio::time::timeout_at(deadline, reply).await {
                Ok(Ok(())) => connected.push(peer),
                _ => {
                    debug!(%peer, "no hello reply");
                    self.ctx.pending.forget_hello(&peer);
                    registry.disconnect(&peer);
                }
            }
        }
        connected
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────────

    /// Start sessions with the best candidates for `region`. Returns how
    /// many were started; zero when no peer is eligible.
    pub fn schedule(&self, region: &Region, since: Option<i64>) -> usize {
        if self.ctx.fatal().is_some() {
            return 0;
        }
        let candidates = self
            .ctx
            .registry
            .candidates_for(region, self.ctx.config.max_peers_per_round);
        let started = candidates
            .into_iter()
            .filter(|peer| self.start(*peer, region.clone(), since))
            .count();
        debug!(%region, started, "sync round scheduled");
        started
    }

    /// Start one session. A no-op returning false if one is already running
    /// for the same peer and region, or if the manager is shut down.
    pub fn start(&self, peer: PeerId, region: Region, since: Option<i64>) -> bool {
        let key = (peer, region.clone());
        let mut sessions = self.sessions.lock();
        if !self.accepting.load(Ordering::Acquire) {
            debug!(%peer, %region, "manager shut down, session refused");
            return false;
        }
        if sessions
            .get(&key)
            .is_some_and(|active| !active.handle.is_finished())
        {
            debug!(%peer, %region, "session already running");
            return false;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel, cancel_rx) = watch::channel(false);
        let session = SyncSession::new(self.ctx.clone(), peer, region.clone(), cancel_rx).since(since);
        let ctx = self.ctx.clone();
        let table = self.sessions.clone();
        let finished_key = key.clone();

        let handle = tokio::spawn(async move {
            let outcome = session.run().await;
            report_outcome(&ctx, peer, region, outcome);

            let mut sessions = table.lock();
            if sessions
                .get(&finished_key)
                .is_some_and(|active| active.id == id)
            {
                sessions.remove(&finished_key);
            }
        });

        sessions.insert(key, ActiveSession { id, cancel, handle });
        true
    }

    pub fn is_active(&self, peer: &PeerId, region: &Region) -> bool {
        self.sessions
            .lock()
            .get(&(*peer, region.clone()))
            .is_some_and(|active| !active.handle.is_finished())
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions
            .lock()
            .values()
            .filter(|active| !active.handle.is_finished())
            .count()
    }

    /// Ask every session with `peer` to stop at its next safe point.
    pub fn cancel_peer(&self, peer: &PeerId) {
        for ((session_peer, _), active) in self.sessions.lock().iter() {
            if session_peer == peer {
                let _ = active.cancel.send(true);
            }
        }
    }

    /// Accept new sessions again after a shutdown.
    pub fn resume(&self) {
        let _sessions = self.sessions.lock();
        self.accepting.store(true, Ordering::Release);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Refuse new sessions, cancel every running one and wait for all of
    /// them to stop.
    pub async fn shutdown(&self) {
        let drained: Vec<ActiveSession> = {
            let mut sessions = self.sessions.lock();
            self.accepting.store(false, Ordering::Release);
            sessions.drain().map(|(_, active)| active).collect()
        };
        for active in &drained {
            let _ = active.cancel.send(true);
        }
        for active in drained {
            if let Err(err) = active.handle.await {
                warn!(error = %err, "sync session panicked");
            }
        }
    }
}

fn report_outcome<S: Store>(
    ctx: &SyncContext<S>,
    peer: PeerId,
    region: Region,
    outcome: Result<SessionReport, SyncError>,
) {
    match outcome {
        Ok(report) => {
            info!(%peer, %region, applied = report.applied, "session finished");
            ctx.events.emit(NodeEvent::SyncCompleted {
                peer,
                region,
                applied: report.applied,
            });
        }
        Err(SyncError::Cancelled) => {
            debug!(%peer, %region, "session cancelled");
        }
        Err(err) => {
            if err.is_fatal() {
                ctx.latch_fatal(err.to_string());
            }
            ctx.events.emit(NodeEvent::SyncFailed {
                peer,
                region,
                error: err.to_string(),
            });
        }
    }
}
