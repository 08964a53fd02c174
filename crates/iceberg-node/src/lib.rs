//! # Iceberg Node
//!
//! The unified API for an Iceberg node: signed regional posts, community
//! votes that level content up from Wild to Legacy, and peer-to-peer sync
//! of everything a region carries.
//!
//! ## Overview
//!
//! A [`Node`] ties together:
//!
//! - **Content**: Posts, votes and reports, validated and stored
//! - **Leveling**: Consensus rules that promote and demote posts
//! - **Sync**: Pull-based, checkpointed exchange with peers
//! - **Lifecycle**: connect, disconnect, status and scheduled rounds
//!
//! ## Key Concepts
//!
//! - **Post**: Immutable. Identified by the hash of its signed payload.
//! - **Region**: Hierarchical code such as `BR-SP-SAO_PAULO`.
//! - **Checkpoint**: Per (peer, region) cursor saved after each applied batch.
//! - **Event**: Everything observable is published on one broadcast bus.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use iceberg_node::{Node, NodeConfig};
//! use iceberg_node::core::{Keypair, PeerId};
//! use iceberg_node::store::SqliteStore;
//! use iceberg_node::sync::MemoryNetwork;
//!
//! async fn example() {
//!     let keypair = Keypair::generate();
//!     let network = MemoryNetwork::new();
//!     let transport = network.create_transport(PeerId::random());
//!
//!     let node = Node::builder(Arc::new(SqliteStore::open("iceberg.db").unwrap()))
//!         .config(NodeConfig::default())
//!         .keypair(keypair)
//!         .transport(Arc::new(transport))
//!         .build()
//!         .unwrap();
//!
//!     node.connect().await.unwrap();
//!     let post = node.publish_post("Hello", "First post", None).await.unwrap();
//!     let scheduled = node.request_sync(None, None).await.unwrap();
//!     println!("{} -> {}", post.cid, scheduled.message());
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `iceberg_node::core` - Content model, identities, regions
//! - `iceberg_node::leveling` - Consensus rules and the leveling engine
//! - `iceberg_node::store` - Storage abstraction and SQLite
//! - `iceberg_node::sync` - Sync protocol, registry and events

pub mod config;
pub mod error;
pub mod node;
pub mod status;
pub mod telemetry;

// Re-export component crates
pub use iceberg_core as core;
pub use iceberg_leveling as leveling;
pub use iceberg_store as store;
pub use iceberg_sync as sync;

// Re-export main types for convenience
pub use config::{BootstrapPeer, NodeConfig, DEFAULT_RELAYS};
pub use error::{NodeError, Result};
pub use node::{Node, NodeBuilder};
pub use status::{
    ConnectOutcome, DisconnectOutcome, NodeState, NodeStats, PeerSummary, PeersView, SyncScheduled,
};

// Re-export commonly used types
pub use iceberg_core::{Cid, Direction, Keypair, Level, PeerId, Post, Region, StoredPost};
pub use iceberg_sync::NodeEvent;
