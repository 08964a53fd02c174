//! Node configuration.
//!
//! Loaded from a JSON file; every field has a default, so `{}` is a valid
//! configuration. Durations are written in milliseconds.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use iceberg_core::clock::duration_ms;
use iceberg_core::{PeerId, Region};
use iceberg_leveling::ConsensusRules;
use iceberg_sync::{PeerAdvert, RegistryConfig, SyncConfig, DEFAULT_EVENT_CAPACITY};

/// Relays used when none are configured.
pub const DEFAULT_RELAYS: [&str; 2] = ["wss://relay1.iceberg.network", "wss://relay2.iceberg.network"];

/// A peer known before any relay introduction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapPeer {
    /// Hex-encoded peer id.
    pub peer_id: String,
    #[serde(default)]
    pub regions: Vec<String>,
}

/// Complete node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeConfig {
    /// The node's home region. Local votes are cast from here.
    pub region: String,
    /// Regions to replicate. Empty means just the home region.
    pub regions: Vec<String>,
    pub relays: Vec<String>,
    pub bootstrap: Vec<BootstrapPeer>,
    pub rules: ConsensusRules,
    pub sync: SyncConfig,
    pub registry: RegistryConfig,
    /// Period of full leveling sweeps, which promote posts by age alone.
    #[serde(with = "duration_ms")]
    pub leveling_interval: Duration,
    /// Run a sync round right after connecting.
    pub sync_on_connect: bool,
    pub event_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            region: "BR".into(),
            regions: Vec::new(),
            relays: DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect(),
            bootstrap: Vec::new(),
            rules: ConsensusRules::default(),
            sync: SyncConfig::default(),
            registry: RegistryConfig::default(),
            leveling_interval: Duration::from_secs(60 * 60),
            sync_on_connect: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl NodeConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: NodeConfig = serde_json::from_str(json).context("parsing node config")?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("loading {}", path.display()))
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.home_region()?;
        self.regions_of_interest()?;
        self.bootstrap_adverts()?;
        self.rules.validate().context("consensus rules")?;

        if self.sync.max_batch_size == 0 {
            bail!("sync.maxBatchSize must be at least 1");
        }
        if self.sync.request_timeout.is_zero() {
            bail!("sync.requestTimeout must be positive");
        }
        if self.sync.sync_interval.is_zero() || self.leveling_interval.is_zero() {
            bail!("sync and leveling intervals must be positive");
        }
        if self.sync.max_peers_per_round == 0 {
            bail!("sync.maxPeersPerRound must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.sync.backoff_jitter) {
            bail!("sync.backoffJitter must be between 0 and 1");
        }
        if self.event_capacity == 0 {
            bail!("eventCapacity must be at least 1");
        }
        Ok(())
    }

    pub fn home_region(&self) -> anyhow::Result<Region> {
        Region::new(self.region.as_str()).with_context(|| format!("region {:?}", self.region))
    }

    /// Configured regions, or the home region alone.
    pub fn regions_of_interest(&self) -> anyhow::Result<Vec<Region>> {
        if self.regions.is_empty() {
            return Ok(vec![self.home_region()?]);
        }
        self.regions
            .iter()
            .map(|code| Region::new(code.as_str()).with_context(|| format!("region {code:?}")))
            .collect()
    }

    pub fn bootstrap_adverts(&self) -> anyhow::Result<Vec<PeerAdvert>> {
        self.bootstrap
            .iter()
            .map(|peer| {
                let peer_id = PeerId::from_hex(&peer.peer_id)
                    .with_context(|| format!("bootstrap peer id {:?}", peer.peer_id))?;
                let regions = peer
                    .regions
                    .iter()
                    .map(|code| Region::new(code.as_str()).with_context(|| format!("region {code:?}")))
                    .collect::<anyhow::Result<Vec<_>>>()?;
                Ok(PeerAdvert::new(peer_id, regions))
            })
            .collect()
    }
}
