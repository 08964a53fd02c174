//! # Iceberg Store
//!
//! Content storage for an Iceberg node. Provides a trait-based backend
//! interface with SQLite and in-memory implementations, and the
//! [`ContentStore`] that validates, serializes and levels every write.
//!
//! ## Key Types
//!
//! - [`Store`] - The async backend trait
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`ContentStore`] - Validated writes, per-CID locking, leveling hook
//! - [`PostPager`] - Lazy, restartable post listing
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use iceberg_leveling::LevelingEngine;
//! use iceberg_store::{ContentStore, SqliteStore};
//!
//! async fn example() {
//!     let backend = Arc::new(SqliteStore::open("iceberg.db").unwrap());
//!     let content = ContentStore::new(backend, LevelingEngine::default());
//!
//!     // let outcome = content.put_post(&post).await.unwrap();
//!     // let stored = content.get(&post.cid).await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent writes**: Applying the same item twice changes nothing
//! - **Last-writer-wins**: One effective vote and report per (actor, target)
//! - **Tombstones**: Deleted posts stay stored so re-delivery cannot revive them
//! - **Fatal backend errors**: A [`StoreError`] is never retried

pub mod content;
pub mod error;
pub mod locks;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use content::{ApplyOutcome, ContentStore, LevelChange, PostPager, RecomputeSummary};
pub use error::{ContentError, ContentResult, Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{InsertResult, PostCursor, PostFilter, Store, UpsertResult};
