//! Sync session state machine.
//!
//! One session pulls one region from one peer:
//!
//! ```text
//! Idle -> Requesting -> Exchanging -> Applying -> Idle
//!            \              \            \
//!             +------------- Failed <-----+   (backoff, then Idle and retry)
//! ```
//!
//! A batch is validated as a whole before anything from it is applied, and
//! the checkpoint is saved only after every item of the batch is applied.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use iceberg_core::clock::duration_ms;
use iceberg_core::{check_horizon, validate_item, PeerId, Region, SyncCursor, SyncItem};
use iceberg_store::{ContentError, ContentStore, LevelChange, Store};

use crate::backoff::Backoff;
use crate::dispatcher::{BatchReply, PendingRequests};
use crate::error::{Result, SyncError};
use crate::events::{EventBus, NodeEvent};
use crate::messages::{limits, RequestId, SyncMessage, PROTOCOL_VERSION};
use crate::registry::PeerRegistry;
use crate::transport::{send_message, Transport};

/// Configuration for sync behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// How long to wait for a batch before the attempt fails.
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
    /// How long to wait for Hello replies when connecting.
    #[serde(with = "duration_ms")]
    pub handshake_timeout: Duration,
    /// Maximum items requested and served per batch.
    pub max_batch_size: u32,
    /// Attempts per session before giving up until the next round.
    pub max_attempts: u32,
    #[serde(with = "duration_ms")]
    pub backoff_base: Duration,
    #[serde(with = "duration_ms")]
    pub backoff_cap: Duration,
    /// Fraction of each backoff delay that is randomized.
    pub backoff_jitter: f64,
    /// Period of scheduled sync rounds.
    #[serde(with = "duration_ms")]
    pub sync_interval: Duration,
    /// Peers asked per region per round.
    pub max_peers_per_round: usize,
    /// How far past local time a received item may be dated.
    #[serde(with = "duration_ms")]
    pub max_clock_skew: Duration,
    /// How far behind the saved checkpoint a scheduled session starts, so
    /// items a peer learns late (relayed, or written while their author was
    /// offline) are still picked up. Zero resumes exactly at the checkpoint.
    #[serde(with = "duration_ms")]
    pub rewind: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(5),
            max_batch_size: 100,
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(300),
            backoff_jitter: 0.2,
            sync_interval: Duration::from_secs(60),
            max_peers_per_round: 3,
            max_clock_skew: Duration::from_secs(10 * 60),
            rewind: Duration::from_secs(60 * 60),
        }
    }
}

impl SyncConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.backoff_base, self.backoff_cap).with_jitter(self.backoff_jitter)
    }

    /// Effective batch size, clamped to the wire limit.
    pub fn batch_limit(&self) -> usize {
        (self.max_batch_size as usize).clamp(1, limits::MAX_BATCH_ITEMS)
    }

    /// Where to resume from a saved checkpoint.
    pub fn resume_from(&self, checkpoint: SyncCursor) -> SyncCursor {
        let window = i64::try_from(self.rewind.as_millis()).unwrap_or(i64::MAX);
        if window == 0 {
            return checkpoint;
        }
        SyncCursor::since(checkpoint.timestamp.saturating_sub(window)).min(checkpoint)
    }
}

/// State shared by the sessions, the dispatcher and the manager.
pub struct SyncContext<S: Store> {
    pub content: Arc<ContentStore<S>>,
    pub transport: Arc<dyn Transport>,
    pub registry: Arc<PeerRegistry>,
    pub events: Arc<EventBus>,
    pub pending: PendingRequests,
    pub config: SyncConfig,
    /// Regions advertised in our Hellos.
    pub regions: Vec<Region>,
    fatal: Mutex<Option<String>>,
}

impl<S: Store> SyncContext<S> {
    pub fn new(
        content: Arc<ContentStore<S>>,
        transport: Arc<dyn Transport>,
        registry: Arc<PeerRegistry>,
        events: Arc<EventBus>,
        config: SyncConfig,
        regions: Vec<Region>,
    ) -> Self {
        Self {
            content,
            transport,
            registry,
            events,
            pending: PendingRequests::new(),
            config,
            regions,
            fatal: Mutex::new(None),
        }
    }

    pub fn local_peer(&self) -> PeerId {
        self.transport.local_peer_id()
    }

    /// Encode, send and count one message.
    pub async fn send(&self, peer: &PeerId, message: &SyncMessage) -> Result<()> {
        send_message(self.transport.as_ref(), peer, message).await?;
        self.registry.record_sent(peer);
        Ok(())
    }

    pub fn hello(&self, reply: bool) -> SyncMessage {
        SyncMessage::Hello {
            peer_id: self.local_peer(),
            protocol_version: PROTOCOL_VERSION,
            regions: self.regions.clone(),
            reply,
        }
    }

    /// Record a fatal store failure. The first one wins.
    pub fn latch_fatal(&self, error: String) {
        let mut fatal = self.fatal.lock();
        if fatal.is_none() {
            tracing::error!(%error, "store failure latched");
            self.events.emit(NodeEvent::StoreFailure {
                error: error.clone(),
            });
            *fatal = Some(error);
        }
    }

    pub fn fatal(&self) -> Option<String> {
        self.fatal.lock().clone()
    }
}

/// Where a session is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Requesting,
    Exchanging,
    Applying,
    Failed,
}

/// Result of a sync session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub peer: PeerId,
    pub region: Region,
    /// Attempts made, including the successful one.
    pub attempts: u32,
    /// Batches fully applied.
    pub batches: usize,
    /// Items received in applied batches.
    pub received: usize,
    /// Items that changed local state.
    pub applied: usize,
    pub level_changes: Vec<LevelChange>,
    /// Last checkpoint saved by this session.
    pub checkpoint: Option<SyncCursor>,
}

impl SessionReport {
    fn new(peer: PeerId, region: Region) -> Self {
        Self {
            peer,
            region,
            attempts: 0,
            batches: 0,
            received: 0,
            applied: 0,
            level_changes: Vec::new(),
            checkpoint: None,
        }
    }

    /// Items that were already known locally.
    pub fn duplicates(&self) -> usize {
        self.received - self.applied
    }
}

/// Pulls one region from one peer.
pub struct SyncSession<S: Store> {
    ctx: Arc<SyncContext<S>>,
    peer: PeerId,
    region: Region,
    since: Option<i64>,
    cancel: watch::Receiver<bool>,
    state: SessionState,
}

impl<S: Store> SyncSession<S> {
    pub fn new(
        ctx: Arc<SyncContext<S>>,
        peer: PeerId,
        region: Region,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            ctx,
            peer,
            region,
            since: None,
            cancel,
            state: SessionState::Idle,
        }
    }

    /// Start from `since` instead of the saved checkpoint.
    pub fn since(mut self, since: Option<i64>) -> Self {
        self.since = since;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run to completion, retrying retryable failures with backoff.
    pub async fn run(mut self) -> Result<SessionReport> {
        let backoff = self.ctx.config.backoff();
        let max_attempts = self.ctx.config.max_attempts.max(1);
        let mut report = SessionReport::new(self.peer, self.region.clone());

        loop {
            report.attempts += 1;
            match self.attempt(&mut report).await {
                Ok(()) => {
                    self.transition(SessionState::Idle);
                    self.ctx.registry.record_success(&self.peer);
                    info!(
                        peer = %self.peer,
                        region = %self.region,
                        batches = report.batches,
                        applied = report.applied,
                        "sync complete"
                    );
                    return Ok(report);
                }
                Err(SyncError::Cancelled) => {
                    self.transition(SessionState::Idle);
                    return Err(SyncError::Cancelled);
                }
                Err(err) => {
                    self.transition(SessionState::Failed);
                    let failures = self.ctx.registry.record_failure(&self.peer);
                    if matches!(
                        err,
                        SyncError::ProtocolViolation(_) | SyncError::VersionMismatch { .. }
                    ) {
                        self.ctx.registry.downgrade(&self.peer);
                    }
                    if !err.is_retryable() || report.attempts >= max_attempts {
                        warn!(
                            peer = %self.peer,
                            region = %self.region,
                            attempts = report.attempts,
                            error = %err,
                            "sync failed"
                        );
                        return Err(err);
                    }

                    let delay = backoff.delay(report.attempts - 1);
                    debug!(
                        peer = %self.peer,
                        region = %self.region,
                        failures,
                        ?delay,
                        error = %err,
                        "retrying after backoff"
                    );
                    self.pause(delay).await?;
                    self.transition(SessionState::Idle);
                }
            }
        }
    }

    /// One pass of request, validate, apply, checkpoint until the peer has
    /// nothing more.
    async fn attempt(&mut self, report: &mut SessionReport) -> Result<()> {
        if !self.ctx.registry.is_connected(&self.peer) {
            return Err(SyncError::NotConnected(format!("peer {}", self.peer)));
        }

        let mut after = match report.checkpoint {
            Some(cursor) => cursor,
            None => self.start_cursor().await?,
        };
        let limit = self.ctx.config.batch_limit();

        loop {
            if self.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            self.transition(SessionState::Requesting);
            let (request_id, reply) = self.ctx.pending.register(self.peer);
            let request = SyncMessage::SyncRequest {
                request_id,
                region: self.region.clone(),
                after,
                limit: limit as u32,
            };
            if let Err(err) = self.ctx.send(&self.peer, &request).await {
                self.ctx.pending.cancel(request_id);
                return Err(err);
            }

            self.transition(SessionState::Exchanging);
            let batch = self.await_batch(request_id, reply).await?;
            validate_batch(&batch, &self.region, &after, limit, self.ctx.content.horizon())?;

            self.transition(SessionState::Applying);
            for item in &batch.items {
                self.apply(item, report).await?;
            }
            report.batches += 1;
            report.received += batch.items.len();

            if let Some(last) = batch.items.last() {
                let cursor = last.cursor();
                self.ctx
                    .content
                    .save_checkpoint(&self.peer, &self.region, &cursor)
                    .await?;
                after = cursor;
                report.checkpoint = Some(cursor);
            }

            if !batch.has_more {
                return Ok(());
            }
        }
    }

    async fn start_cursor(&self) -> Result<SyncCursor> {
        if let Some(since) = self.since {
            return Ok(SyncCursor::since(since));
        }
        Ok(self
            .ctx
            .content
            .load_checkpoint(&self.peer, &self.region)
            .await?
            .map_or(SyncCursor::ORIGIN, |saved| self.ctx.config.resume_from(saved)))
    }

    async fn await_batch(
        &self,
        request_id: RequestId,
        reply: oneshot::Receiver<Result<BatchReply>>,
    ) -> Result<BatchReply> {
        let timeout = self.ctx.config.request_timeout;
        let mut cancel = self.cancel.clone();

        let outcome = tokio::select! {
            outcome = tokio::time::timeout(timeout, reply) => outcome,
            _ = cancelled(&mut cancel) => {
                self.ctx.pending.cancel(request_id);
                return Err(SyncError::Cancelled);
            }
        };

        match outcome {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(SyncError::TransportFailure("dispatcher stopped".into())),
            Err(_) => {
                self.ctx.pending.cancel(request_id);
                Err(SyncError::Timeout(format!(
                    "no batch from {} within {:?}",
                    self.peer, timeout
                )))
            }
        }
    }

    async fn apply(&self, item: &SyncItem, report: &mut SessionReport) -> Result<()> {
        let outcome = self.ctx.content.apply(item).await.map_err(|err| match err {
            ContentError::IntegrityViolation(e) => {
                SyncError::ProtocolViolation(format!("invalid {}: {e}", item.kind()))
            }
            other => SyncError::Content(other),
        })?;

        if outcome.changed {
            report.applied += 1;
            self.ctx.events.emit(NodeEvent::PostApplied {
                cid: outcome.cid,
                from: Some(self.peer),
            });
        }
        if let Some(change) = outcome.level_change {
            report.level_changes.push(change);
            self.ctx.events.emit(NodeEvent::LevelChanged {
                cid: change.cid,
                from: change.from,
                to: change.to,
            });
        }
        Ok(())
    }

    async fn pause(&self, delay: Duration) -> Result<()> {
        let mut cancel = self.cancel.clone();
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = cancelled(&mut cancel) => Err(SyncError::Cancelled),
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!(
                peer = %self.peer,
                region = %self.region,
                from = ?self.state,
                to = ?next,
                "session state"
            );
            self.state = next;
        }
    }
}

/// Resolves once the flag is raised. Never resolves if the sender is gone.
pub(crate) async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Check a batch against the request it answers, before applying any of it.
/// Items dated after `horizon` are a violation.
pub fn validate_batch(
    batch: &BatchReply,
    region: &Region,
    after: &SyncCursor,
    limit: usize,
    horizon: i64,
) -> Result<()> {
    if batch.items.len() > limit {
        return Err(SyncError::ProtocolViolation(format!(
            "batch of {} items exceeds limit {limit}",
            batch.items.len()
        )));
    }
    if batch.has_more && batch.items.is_empty() {
        return Err(SyncError::ProtocolViolation(
            "empty batch claims more items".into(),
        ));
    }

    let mut previous = *after;
    for item in &batch.items {
        let cursor = item.cursor();
        if cursor <= previous {
            return Err(SyncError::ProtocolViolation(format!(
                "{} at {cursor:?} is not after {previous:?}",
                item.kind()
            )));
        }
        if let Some(post_region) = item.post_region() {
            if !post_region.is_within(region) {
                return Err(SyncError::ProtocolViolation(format!(
                    "post in {post_region} outside requested {region}"
                )));
            }
        }
        validate_item(item)
            .and_then(|()| check_horizon(item.timestamp(), horizon))
            .map_err(|e| SyncError::ProtocolViolation(format!("invalid {}: {e}", item.kind())))?;
        previous = cursor;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{post, vote, Harness};
    use iceberg_core::{Direction, Keypair, Level, Signature};

    fn region(code: &str) -> Region {
        Region::new(code).unwrap()
    }

    const HORIZON: i64 = 1_000_000;

    fn reply(items: Vec<SyncItem>, has_more: bool) -> BatchReply {
        BatchReply { items, has_more }
    }

    #[test]
    fn test_validate_batch_accepts_ordered_items() {
        let kp = Keypair::from_seed(&[1; 32]);
        let p = post(&kp, "BR-SP-SAO_PAULO", 1_000);
        let v = vote(&Keypair::from_seed(&[2; 32]), p.cid, Direction::Up, "BR-SP", 2_000);
        let batch = reply(vec![SyncItem::Post(p), SyncItem::Vote(v)], false);
        validate_batch(&batch, &region("BR-SP"), &SyncCursor::ORIGIN, 10, HORIZON).unwrap();
    }

    #[test]
    fn test_validate_batch_rejections() {
        let kp = Keypair::from_seed(&[1; 32]);
        let early = SyncItem::Post(post(&kp, "BR-SP", 1_000));
        let late = SyncItem::Post(post(&kp, "BR-SP", 2_000));
        let elsewhere = SyncItem::Post(post(&kp, "BR-RJ", 3_000));
        let sp = region("BR-SP");

        let unordered = reply(vec![late.clone(), early.clone()], false);
        assert!(validate_batch(&unordered, &sp, &SyncCursor::ORIGIN, 10, HORIZON).is_err());

        let stale = reply(vec![early.clone()], false);
        assert!(validate_batch(&stale, &sp, &late.cursor(), 10, HORIZON).is_err());

        let oversized = reply(vec![early.clone(), late.clone()], false);
        assert!(validate_batch(&oversized, &sp, &SyncCursor::ORIGIN, 1, HORIZON).is_err());

        let foreign = reply(vec![elsewhere], false);
        assert!(validate_batch(&foreign, &sp, &SyncCursor::ORIGIN, 10, HORIZON).is_err());

        let endless = reply(vec![], true);
        assert!(validate_batch(&endless, &sp, &SyncCursor::ORIGIN, 10, HORIZON).is_err());

        let mut forged = post(&kp, "BR-SP", 4_000);
        forged.signature = Signature::ZERO;
        let forged = reply(vec![SyncItem::Post(forged)], false);
        assert!(matches!(
            validate_batch(&forged, &sp, &SyncCursor::ORIGIN, 10, HORIZON),
            Err(SyncError::ProtocolViolation(_))
        ));

        let ahead = reply(vec![early, SyncItem::Post(post(&kp, "BR-SP", i64::MAX))], false);
        assert!(matches!(
            validate_batch(&ahead, &sp, &SyncCursor::ORIGIN, 10, HORIZON),
            Err(SyncError::ProtocolViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_session_pulls_and_checkpoints() {
        let harness = Harness::new().await;
        let (a, b) = (harness.peer(1, &["BR"]).await, harness.peer(2, &["BR"]).await);
        a.link(&b);

        let author = Keypair::from_seed(&[9; 32]);
        let mut last = None;
        for i in 0..7 {
            let p = post(&author, "BR-SP", 1_000 + i);
            last = Some(SyncItem::Post(p.clone()).cursor());
            b.ctx.content.put_post(&p).await.unwrap();
        }

        let report = a.session(b.id, "BR-SP", None).run().await.unwrap();
        assert_eq!(report.received, 7);
        assert_eq!(report.applied, 7);
        assert_eq!(report.batches, 3);
        assert_eq!(report.checkpoint, last);
        assert_eq!(
            a.ctx.content.load_checkpoint(&b.id, &region("BR-SP")).await.unwrap(),
            last
        );

        // A second run re-reads the rewind window and finds nothing new.
        let again = a.session(b.id, "BR-SP", None).run().await.unwrap();
        assert_eq!(again.received, 7);
        assert_eq!(again.applied, 0);
        assert_eq!(again.checkpoint, last);
    }

    #[tokio::test]
    async fn test_resumes_exactly_without_rewind() {
        let harness = Harness::with_config(SyncConfig {
            max_batch_size: 3,
            rewind: Duration::ZERO,
            ..SyncConfig::default()
        })
        .await;
        let (a, b) = (harness.peer(1, &["BR"]).await, harness.peer(2, &["BR"]).await);
        a.link(&b);

        let author = Keypair::from_seed(&[9; 32]);
        for i in 0..4 {
            b.ctx.content.put_post(&post(&author, "BR-SP", 1_000 + i)).await.unwrap();
        }
        a.session(b.id, "BR-SP", None).run().await.unwrap();

        let again = a.session(b.id, "BR-SP", None).run().await.unwrap();
        assert_eq!(again.received, 0);
        assert_eq!(again.batches, 1);
    }

    #[tokio::test]
    async fn test_late_arrival_behind_checkpoint_is_pulled() {
        let harness = Harness::new().await;
        let (a, b) = (harness.peer(1, &["BR"]).await, harness.peer(2, &["BR"]).await);
        a.link(&b);

        let newer = post(&Keypair::from_seed(&[9; 32]), "BR-SP", 2_000);
        b.ctx.content.put_post(&newer).await.unwrap();
        a.session(b.id, "BR-SP", None).run().await.unwrap();

        // B learns of an older post only after A has checkpointed past it.
        let older = post(&Keypair::from_seed(&[10; 32]), "BR-SP", 1_000);
        b.ctx.content.put_post(&older).await.unwrap();

        let report = a.session(b.id, "BR-SP", None).run().await.unwrap();
        assert_eq!(report.applied, 1);
        assert!(a.ctx.content.get(&older.cid).await.is_ok());
        assert_eq!(
            a.ctx.content.load_checkpoint(&b.id, &region("BR-SP")).await.unwrap(),
            Some(SyncItem::Post(newer).cursor())
        );
    }

    #[tokio::test]
    async fn test_future_dated_item_never_pins_checkpoint() {
        let harness = Harness::new().await;
        let a = harness.peer(1, &["BR"]).await;
        let rogue = harness.silent_peer(2).await;
        a.ctx.registry.connect(rogue);

        let honest = post(&Keypair::from_seed(&[9; 32]), "BR", 1_000);
        let ahead = post(&Keypair::from_seed(&[10; 32]), "BR", i64::MAX);
        let transport = harness.raw_transport(&rogue);
        let serve = tokio::spawn(async move {
            let (from, frame) = transport.recv().await.unwrap();
            let SyncMessage::SyncRequest { request_id, .. } = SyncMessage::decode(&frame).unwrap()
            else {
                panic!("expected a request");
            };
            let batch = SyncMessage::SyncBatch {
                request_id,
                items: vec![SyncItem::Post(honest), SyncItem::Post(ahead)],
                has_more: false,
            };
            send_message(transport.as_ref(), &from, &batch).await.unwrap();
        });

        let err = a.session(rogue, "BR", None).run().await.unwrap_err();
        serve.await.unwrap();

        assert!(matches!(err, SyncError::ProtocolViolation(_)));
        assert_eq!(
            a.ctx.content.load_checkpoint(&rogue, &region("BR")).await.unwrap(),
            None
        );
        assert!(a.ctx.registry.get(&rogue).unwrap().reputation < 1.0);
    }

    #[tokio::test]
    async fn test_pages_through_equal_timestamps() {
        let harness = Harness::new().await;
        let (a, b) = (harness.peer(1, &["BR"]).await, harness.peer(2, &["BR"]).await);
        a.link(&b);

        for n in 20..28u8 {
            let p = post(&Keypair::from_seed(&[n; 32]), "BR", 5_000);
            b.ctx.content.put_post(&p).await.unwrap();
        }

        let report = a.session(b.id, "BR", None).run().await.unwrap();
        assert_eq!(report.received, 8);
        assert_eq!(report.batches, 3);
        assert_eq!(report.duplicates(), 0);
    }

    #[tokio::test]
    async fn test_redelivered_vote_changes_nothing() {
        let harness = Harness::new().await;
        let (a, b) = (harness.peer(1, &["BR"]).await, harness.peer(2, &["BR"]).await);
        a.link(&b);

        let p = post(&Keypair::from_seed(&[9; 32]), "BR-SP-SAO_PAULO", 1_000);
        b.ctx.content.put_post(&p).await.unwrap();
        for n in 10..15u8 {
            let v = vote(
                &Keypair::from_seed(&[n; 32]),
                p.cid,
                Direction::Up,
                "BR-SP-SAO_PAULO",
                2_000,
            );
            b.ctx.content.put_vote(&v).await.unwrap();
        }

        a.session(b.id, "BR-SP", None).run().await.unwrap();
        let before = a.ctx.content.get(&p.cid).await.unwrap();
        assert_eq!(before.level(), Level::Regional);

        let replay = a.session(b.id, "BR-SP", Some(0)).run().await.unwrap();
        assert_eq!(replay.received, 6);
        assert_eq!(replay.applied, 0);
        assert_eq!(replay.duplicates(), 6);
        assert_eq!(a.ctx.content.get(&p.cid).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_unresponsive_peer_times_out() {
        let harness = Harness::with_config(SyncConfig {
            request_timeout: Duration::from_millis(50),
            max_attempts: 2,
            backoff_base: Duration::from_millis(1),
            backoff_jitter: 0.0,
            ..SyncConfig::default()
        })
        .await;
        let a = harness.peer(1, &["BR"]).await;
        let silent = harness.silent_peer(2).await;
        a.ctx.registry.connect(silent);

        let err = a.session(silent, "BR", None).run().await.unwrap_err();
        assert!(matches!(err, SyncError::Timeout(_)));
        assert_eq!(a.ctx.registry.get(&silent).unwrap().failures, 2);
        assert_eq!(a.ctx.pending.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting() {
        let harness = Harness::new().await;
        let a = harness.peer(1, &["BR"]).await;
        let silent = harness.silent_peer(2).await;
        a.ctx.registry.connect(silent);

        let (tx, rx) = watch::channel(false);
        let session = SyncSession::new(a.ctx.clone(), silent, region("BR"), rx);
        let running = tokio::spawn(session.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        let err = running.await.unwrap().unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(a.ctx.registry.get(&silent).unwrap().failures, 0);
    }

    #[tokio::test]
    async fn test_disconnected_peer_not_contacted() {
        let harness = Harness::new().await;
        let (a, b) = (harness.peer(1, &["BR"]).await, harness.peer(2, &["BR"]).await);

        let err = a.session(b.id, "BR", None).run().await.unwrap_err();
        assert!(matches!(err, SyncError::NotConnected(_)));
        assert_eq!(a.ctx.registry.stats().messages_sent, 0);
    }
}
