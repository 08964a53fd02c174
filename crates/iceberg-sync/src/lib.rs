//! # Iceberg Sync
//!
//! Peer synchronization for an Iceberg node: the wire protocol, the
//! per-(peer, region) session state machine, the peer registry and the
//! event bus.
//!
//! ## Overview
//!
//! Replication is pull-based. A session asks a peer for every item of a
//! region after the last checkpoint, validates each batch in full, applies
//! it through the [`iceberg_store::ContentStore`] and only then moves the
//! checkpoint forward. Application is idempotent, so re-delivery after a
//! crash or a retry is harmless.
//!
//! ## Key Types
//!
//! - [`SyncMessage`] - Wire messages, CBOR-encoded into frames
//! - [`Transport`] - Frame delivery; [`MemoryNetwork`] for tests
//! - [`SyncSession`] - Pulls one region from one peer
//! - [`SyncManager`] - One session per (peer, region), handshakes
//! - [`Dispatcher`] - Receive loop; serves inbound requests
//! - [`PeerRegistry`] - Connection state, reputation, candidate ranking
//! - [`EventBus`] - Broadcast of [`NodeEvent`]s
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use iceberg_sync::{SyncContext, SyncManager, Dispatcher};
//!
//! async fn example() {
//!     // let ctx = Arc::new(SyncContext::new(content, transport, registry, events, config, regions));
//!     // let _dispatcher = Dispatcher::new(ctx.clone()).spawn(shutdown_rx);
//!
//!     // let manager = SyncManager::new(ctx);
//!     // manager.introduce(&adverts).await;
//!     // let started = manager.schedule(&region, None);
//! }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Node A                              Node B
//!   |-------- Hello {reply} ---------->|
//!   |<------- Hello -------------------|
//!   |-------- SyncRequest {after} ---->|
//!   |<------- SyncBatch {has_more} ----|
//!   |-------- SyncRequest {after'} --->|
//!   |<------- SyncBatch ---------------|
//! ```

pub mod backoff;
pub mod discovery;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod manager;
pub mod messages;
pub mod registry;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::Backoff;
pub use discovery::{Discovery, PeerAdvert, StaticDiscovery};
pub use dispatcher::{serve_request, BatchReply, Dispatcher, PendingRequests};
pub use error::{Result, SyncError};
pub use events::{EventBus, NodeEvent, DEFAULT_EVENT_CAPACITY};
pub use manager::SyncManager;
pub use messages::{limits, RequestId, SyncErrorCode, SyncMessage, PROTOCOL_VERSION};
pub use registry::{ConnectionState, PeerInfo, PeerRegistry, RegistryConfig, RegistryStats};
pub use session::{validate_batch, SessionReport, SessionState, SyncConfig, SyncContext, SyncSession};
pub use transport::{memory::MemoryNetwork, memory::MemoryTransport, send_message, Transport};
