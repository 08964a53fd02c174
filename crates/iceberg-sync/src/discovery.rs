//! Peer discovery.
//!
//! Discovery answers "who might carry this region"; the registry decides
//! who is actually worth asking.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use iceberg_core::{PeerId, Region};

use crate::error::Result;

/// A peer as announced by a relay or a bootstrap list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAdvert {
    pub peer_id: PeerId,
    /// Regions the peer carries. Empty means everything.
    #[serde(default)]
    pub regions: Vec<Region>,
}

impl PeerAdvert {
    pub fn new(peer_id: PeerId, regions: Vec<Region>) -> Self {
        Self { peer_id, regions }
    }

    /// Whether the peer may hold content of `region`.
    pub fn covers(&self, region: &Region) -> bool {
        self.regions.is_empty()
            || self
                .regions
                .iter()
                .any(|r| region.is_within(r) || r.is_within(region))
    }
}

/// Source of peer introductions.
#[async_trait]
pub trait Discovery: Send + Sync + 'static {
    /// Peers that may hold content of `region`.
    async fn discover(&self, region: &Region) -> Result<Vec<PeerAdvert>>;

    /// Relay endpoints this discovery introduces through.
    fn relays(&self) -> Vec<String>;
}

/// A fixed list of relays and bootstrap peers.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    relays: Vec<String>,
    peers: Vec<PeerAdvert>,
}

impl StaticDiscovery {
    pub fn new(relays: Vec<String>, peers: Vec<PeerAdvert>) -> Self {
        Self { relays, peers }
    }

    pub fn with_peer(mut self, advert: PeerAdvert) -> Self {
        self.peers.push(advert);
        self
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn discover(&self, region: &Region) -> Result<Vec<PeerAdvert>> {
        Ok(self
            .peers
            .iter()
            .filter(|advert| advert.covers(region))
            .cloned()
            .collect())
    }

    fn relays(&self) -> Vec<String> {
        self.relays.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(code: &str) -> Region {
        Region::new(code).unwrap()
    }

    #[tokio::test]
    async fn test_static_discovery_filters_by_region() {
        let sp = PeerAdvert::new(PeerId::from_bytes([1; 32]), vec![region("BR-SP")]);
        let rj = PeerAdvert::new(PeerId::from_bytes([2; 32]), vec![region("BR-RJ")]);
        let any = PeerAdvert::new(PeerId::from_bytes([3; 32]), vec![]);
        let discovery = StaticDiscovery::new(vec!["wss://relay".into()], vec![sp.clone(), rj.clone()])
            .with_peer(any.clone());

        assert_eq!(
            discovery.discover(&region("BR-SP-CAMPINAS")).await.unwrap(),
            vec![sp.clone(), any.clone()]
        );
        assert_eq!(
            discovery.discover(&region("BR")).await.unwrap(),
            vec![sp, rj, any]
        );
        assert_eq!(discovery.relays(), vec!["wss://relay".to_string()]);
    }
}
