//! Peer registry: who we know, who is connected, who is worth asking.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use iceberg_core::{Clock, PeerId, Region, SystemClock};

/// Reputation every peer starts with.
pub const INITIAL_REPUTATION: f64 = 1.0;

/// Reputation lost per protocol violation.
pub const VIOLATION_PENALTY: f64 = 0.25;

/// Reputation regained per successful session.
pub const SUCCESS_REWARD: f64 = 0.05;

/// Connection state of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Introduced but never contacted.
    Unknown,
    /// Hello sent, awaiting the reply.
    Connecting,
    Connected,
    /// `stale` once silent past the silence window.
    Disconnected { stale: bool },
}

/// Everything the registry tracks about one peer.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    /// Regions the peer carries. Empty means everything.
    pub regions: BTreeSet<Region>,
    pub state: ConnectionState,
    pub first_seen: i64,
    /// Last time we heard from the peer (Unix ms).
    pub last_seen: i64,
    pub messages_sent: u64,
    pub messages_received: u64,
    /// Consecutive failed sessions.
    pub failures: u32,
    /// Reputation score (0.0-1.0).
    pub reputation: f64,
}

impl PeerInfo {
    fn new(peer_id: PeerId, now: i64) -> Self {
        Self {
            peer_id,
            regions: BTreeSet::new(),
            state: ConnectionState::Unknown,
            first_seen: now,
            last_seen: now,
            messages_sent: 0,
            messages_received: 0,
            failures: 0,
            reputation: INITIAL_REPUTATION,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_stale(&self) -> bool {
        self.state == ConnectionState::Disconnected { stale: true }
    }

    /// 2 when the peer carries `region` or an enclosing region, 1 when it
    /// carries only part of it or declares nothing, 0 when unrelated.
    pub fn affinity(&self, region: &Region) -> u8 {
        if self.regions.is_empty() {
            return 1;
        }
        if self.regions.iter().any(|r| region.is_within(r)) {
            2
        } else if self.regions.iter().any(|r| r.is_within(region)) {
            1
        } else {
            0
        }
    }
}

/// Registry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegistryConfig {
    /// Silence after which a peer is marked stale.
    #[serde(with = "iceberg_core::clock::duration_ms")]
    pub silence_window: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            silence_window: Duration::from_secs(5 * 60),
        }
    }
}

/// Aggregate registry figures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub known: usize,
    pub connected: usize,
    pub stale: usize,
    pub messages_sent: u64,
    pub messages_received: u64,
}

/// Thread-safe peer table.
pub struct PeerRegistry {
    peers: RwLock<HashMap<PeerId, PeerInfo>>,
    config: RegistryConfig,
    clock: Arc<dyn Clock>,
}

impl PeerRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RegistryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Learn about a peer and the regions it carries. Creates it as
    /// `Unknown` on first contact.
    pub fn observe(&self, peer: PeerId, regions: &[Region]) {
        let now = self.clock.now_millis();
        let mut peers = self.peers.write();
        let info = peers.entry(peer).or_insert_with(|| {
            debug!(%peer, "peer introduced");
            PeerInfo::new(peer, now)
        });
        info.regions.extend(regions.iter().cloned());
    }

    /// Mark a Hello as sent.
    pub fn connecting(&self, peer: PeerId) {
        let now = self.clock.now_millis();
        let mut peers = self.peers.write();
        let info = peers.entry(peer).or_insert_with(|| PeerInfo::new(peer, now));
        if !info.is_connected() {
            info.state = ConnectionState::Connecting;
        }
    }

    /// Mark a peer connected. Returns false if it already was.
    pub fn connect(&self, peer: PeerId) -> bool {
        let now = self.clock.now_millis();
        let mut peers = self.peers.write();
        let info = peers.entry(peer).or_insert_with(|| PeerInfo::new(peer, now));
        if info.is_connected() {
            return false;
        }
        debug!(%peer, from = ?info.state, "peer connected");
        info.state = ConnectionState::Connected;
        info.last_seen = now;
        true
    }

    /// Mark a peer disconnected. Returns false if it was not connected.
    pub fn disconnect(&self, peer: &PeerId) -> bool {
        let mut peers = self.peers.write();
        match peers.get_mut(peer) {
            Some(info) if matches!(info.state, ConnectionState::Connected | ConnectionState::Connecting) => {
                let was_connected = info.is_connected();
                debug!(%peer, "peer disconnected");
                info.state = ConnectionState::Disconnected { stale: false };
                was_connected
            }
            _ => false,
        }
    }

    /// Disconnect everyone. Returns the peers that were connected.
    pub fn disconnect_all(&self) -> Vec<PeerId> {
        let mut peers = self.peers.write();
        let mut dropped = Vec::new();
        for info in peers.values_mut() {
            match info.state {
                ConnectionState::Connected => {
                    dropped.push(info.peer_id);
                    info.state = ConnectionState::Disconnected { stale: false };
                }
                ConnectionState::Connecting => {
                    info.state = ConnectionState::Disconnected { stale: false };
                }
                _ => {}
            }
        }
        dropped.sort();
        dropped
    }

    /// Mark every peer silent past the window as stale. Connected peers
    /// drop to `Disconnected { stale: true }`. Returns the newly stale.
    pub fn sweep_stale(&self, now: i64) -> Vec<PeerId> {
        let window = self.config.silence_window.as_millis() as i64;
        let mut peers = self.peers.write();
        let mut swept = Vec::new();
        for info in peers.values_mut() {
            if info.is_stale() || now.saturating_sub(info.last_seen) < window {
                continue;
            }
            if matches!(
                info.state,
                ConnectionState::Connected | ConnectionState::Disconnected { .. }
            ) {
                debug!(peer = %info.peer_id, last_seen = info.last_seen, "peer stale");
                info.state = ConnectionState::Disconnected { stale: true };
                swept.push(info.peer_id);
            }
        }
        swept.sort();
        swept
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn get(&self, peer: &PeerId) -> Option<PeerInfo> {
        self.peers.read().get(peer).cloned()
    }

    pub fn is_connected(&self, peer: &PeerId) -> bool {
        self.peers.read().get(peer).is_some_and(PeerInfo::is_connected)
    }

    /// Connected peers, ordered by id.
    pub fn peers(&self) -> Vec<PeerInfo> {
        let mut connected: Vec<PeerInfo> = self
            .peers
            .read()
            .values()
            .filter(|info| info.is_connected())
            .cloned()
            .collect();
        connected.sort_by_key(|info| info.peer_id);
        connected
    }

    pub fn stats(&self) -> RegistryStats {
        self.peers
            .read()
            .values()
            .fold(RegistryStats::default(), |mut stats, info| {
                stats.known += 1;
                stats.connected += usize::from(info.is_connected());
                stats.stale += usize::from(info.is_stale());
                stats.messages_sent += info.messages_sent;
                stats.messages_received += info.messages_received;
                stats
            })
    }

    /// Up to `max` connected peers that may carry `region`, best first:
    /// region affinity, then reputation, then recency.
    pub fn candidates_for(&self, region: &Region, max: usize) -> Vec<PeerId> {
        let peers = self.peers.read();
        let mut ranked: Vec<(&PeerInfo, u8)> = peers
            .values()
            .filter(|info| info.is_connected())
            .map(|info| (info, info.affinity(region)))
            .filter(|(_, affinity)| *affinity > 0)
            .collect();
        ranked.sort_by(|(a, aff_a), (b, aff_b)| {
            aff_b
                .cmp(aff_a)
                .then_with(|| {
                    b.reputation
                        .partial_cmp(&a.reputation)
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| b.last_seen.cmp(&a.last_seen))
                .then_with(|| a.peer_id.cmp(&b.peer_id))
        });
        ranked
            .into_iter()
            .take(max)
            .map(|(info, _)| info.peer_id)
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accounting
    // ─────────────────────────────────────────────────────────────────────────

    pub fn record_sent(&self, peer: &PeerId) {
        if let Some(info) = self.peers.write().get_mut(peer) {
            info.messages_sent += 1;
        }
    }

    /// Count an inbound frame. Hearing from a stale peer clears the flag.
    pub fn record_received(&self, peer: &PeerId) {
        let now = self.clock.now_millis();
        let mut peers = self.peers.write();
        let info = peers.entry(*peer).or_insert_with(|| PeerInfo::new(*peer, now));
        info.messages_received += 1;
        info.last_seen = now;
        if info.is_stale() {
            info.state = ConnectionState::Disconnected { stale: false };
        }
    }

    /// Count a failed session. Returns the consecutive failure count.
    pub fn record_failure(&self, peer: &PeerId) -> u32 {
        match self.peers.write().get_mut(peer) {
            Some(info) => {
                info.failures = info.failures.saturating_add(1);
                info.failures
            }
            None => 0,
        }
    }

    pub fn record_success(&self, peer: &PeerId) {
        if let Some(info) = self.peers.write().get_mut(peer) {
            info.failures = 0;
            info.reputation = (info.reputation + SUCCESS_REWARD).min(1.0);
        }
    }

    /// Penalize a protocol violation. Returns the new reputation.
    pub fn downgrade(&self, peer: &PeerId) -> f64 {
        match self.peers.write().get_mut(peer) {
            Some(info) => {
                info.reputation = (info.reputation - VIOLATION_PENALTY).max(0.0);
                debug!(%peer, reputation = info.reputation, "peer downgraded");
                info.reputation
            }
            None => 0.0,
        }
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iceberg_core::ManualClock;

    fn peer(n: u8) -> PeerId {
        PeerId::from_bytes([n; 32])
    }

    fn region(code: &str) -> Region {
        Region::new(code).unwrap()
    }

    fn registry(clock: Arc<ManualClock>) -> PeerRegistry {
        PeerRegistry::with_clock(
            RegistryConfig {
                silence_window: Duration::from_secs(60),
            },
            clock,
        )
    }

    #[test]
    fn test_connect_is_idempotent() {
        let registry = PeerRegistry::default();
        assert!(registry.connect(peer(1)));
        assert!(!registry.connect(peer(1)));
        assert_eq!(registry.peers().len(), 1);

        assert!(registry.disconnect(&peer(1)));
        assert!(!registry.disconnect(&peer(1)));
        assert!(!registry.disconnect(&peer(9)));
        assert!(registry.peers().is_empty());
        assert_eq!(registry.stats().known, 1);
    }

    #[test]
    fn test_peers_lists_only_connected() {
        let registry = PeerRegistry::default();
        registry.observe(peer(1), &[]);
        registry.connecting(peer(2));
        registry.connect(peer(3));
        let ids: Vec<PeerId> = registry.peers().iter().map(|p| p.peer_id).collect();
        assert_eq!(ids, vec![peer(3)]);
    }

    #[test]
    fn test_candidates_ranked() {
        let clock = Arc::new(ManualClock::new(1_000));
        let registry = registry(clock.clone());

        registry.observe(peer(1), &[region("BR")]);
        registry.observe(peer(2), &[region("BR-SP")]);
        registry.observe(peer(3), &[region("BR-RJ")]);
        registry.observe(peer(4), &[]);
        registry.observe(peer(5), &[region("BR-SP-CAMPINAS")]);
        for n in 1..=5 {
            registry.connect(peer(n));
        }
        registry.downgrade(&peer(1));

        let candidates = registry.candidates_for(&region("BR-SP"), 10);
        assert_eq!(candidates, vec![peer(2), peer(1), peer(4), peer(5)]);
        assert_eq!(registry.candidates_for(&region("BR-SP"), 1), vec![peer(2)]);
    }

    #[test]
    fn test_recency_breaks_ties() {
        let clock = Arc::new(ManualClock::new(1_000));
        let registry = registry(clock.clone());
        registry.connect(peer(1));
        registry.connect(peer(2));
        clock.advance(10);
        registry.record_received(&peer(1));

        assert_eq!(
            registry.candidates_for(&region("BR"), 2),
            vec![peer(1), peer(2)]
        );
    }

    #[test]
    fn test_stale_sweep_and_recovery() {
        let clock = Arc::new(ManualClock::new(0));
        let registry = registry(clock.clone());
        registry.connect(peer(1));
        registry.connect(peer(2));

        clock.set(30_000);
        registry.record_received(&peer(2));

        assert!(registry.sweep_stale(61_000).contains(&peer(1)));
        assert!(registry.get(&peer(1)).unwrap().is_stale());
        assert!(registry.candidates_for(&region("BR"), 10) == vec![peer(2)]);
        assert_eq!(registry.stats().stale, 1);

        // Sweeping again reports nothing new.
        assert!(registry.sweep_stale(62_000).is_empty());

        clock.set(70_000);
        registry.record_received(&peer(1));
        assert!(!registry.get(&peer(1)).unwrap().is_stale());
        assert!(registry.connect(peer(1)));
        assert_eq!(registry.stats().known, 2);
    }

    #[test]
    fn test_accounting() {
        let registry = PeerRegistry::default();
        registry.connect(peer(1));
        registry.record_sent(&peer(1));
        registry.record_sent(&peer(1));
        registry.record_received(&peer(1));
        assert_eq!(registry.record_failure(&peer(1)), 1);
        assert_eq!(registry.record_failure(&peer(1)), 2);

        let info = registry.get(&peer(1)).unwrap();
        assert_eq!((info.messages_sent, info.messages_received, info.failures), (2, 1, 2));

        registry.record_success(&peer(1));
        assert_eq!(registry.get(&peer(1)).unwrap().failures, 0);

        for _ in 0..10 {
            registry.downgrade(&peer(1));
        }
        assert_eq!(registry.get(&peer(1)).unwrap().reputation, 0.0);

        let stats = registry.stats();
        assert_eq!((stats.messages_sent, stats.messages_received), (2, 1));
    }
}
