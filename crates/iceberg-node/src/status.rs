//! Typed answers for the boundary layer.

use serde::Serialize;

use iceberg_sync::PeerInfo;

/// Connection lifecycle of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Node status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStats {
    pub state: NodeState,
    pub connected: bool,
    pub peer_count: usize,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub region: String,
    pub relays: Vec<String>,
    pub active_sessions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum ConnectOutcome {
    Connected { peers: usize },
    AlreadyConnected,
}

impl ConnectOutcome {
    pub fn message(&self) -> String {
        match self {
            ConnectOutcome::Connected { peers } => format!("connected to the network ({peers} peers)"),
            ConnectOutcome::AlreadyConnected => "already connected".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum DisconnectOutcome {
    Disconnected,
    AlreadyDisconnected,
}

impl DisconnectOutcome {
    pub fn message(&self) -> String {
        match self {
            DisconnectOutcome::Disconnected => "disconnected from the network".into(),
            DisconnectOutcome::AlreadyDisconnected => "already disconnected".into(),
        }
    }
}

/// One connected peer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub peer_id: String,
    pub regions: Vec<String>,
    pub reputation: f64,
    pub last_seen: i64,
    pub messages_sent: u64,
    pub messages_received: u64,
}

impl From<&PeerInfo> for PeerSummary {
    fn from(info: &PeerInfo) -> Self {
        Self {
            peer_id: info.peer_id.to_hex(),
            regions: info.regions.iter().map(|r| r.to_string()).collect(),
            reputation: info.reputation,
            last_seen: info.last_seen,
            messages_sent: info.messages_sent,
            messages_received: info.messages_received,
        }
    }
}

/// Connected peers. Empty, not an error, while disconnected.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeersView {
    pub connected: bool,
    pub peers: Vec<PeerSummary>,
    pub count: usize,
}

impl PeersView {
    pub fn disconnected() -> Self {
        Self {
            connected: false,
            peers: Vec::new(),
            count: 0,
        }
    }
}

/// Result of an advisory sync request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncScheduled {
    pub region: String,
    /// Sessions started. Zero when no eligible peer exists yet.
    pub sessions: usize,
}

impl SyncScheduled {
    pub fn message(&self) -> String {
        match self.sessions {
            0 => format!("no peers available for {}; will retry next round", self.region),
            n => format!("sync requested for {} with {n} peers", self.region),
        }
    }
}
