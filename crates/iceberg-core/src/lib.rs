//! # Iceberg Core
//!
//! Pure primitives for an Iceberg node: posts, votes, reports, regions and
//! their canonical encoding.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over signed, content-addressed data.
//!
//! ## Key Types
//!
//! - [`Post`] - Immutable signed payload, addressed by its [`Cid`]
//! - [`PostState`] - Locally derived level, tallies and tombstone flag
//! - [`Vote`] / [`Report`] - Per-(actor, target) records resolved last-writer-wins
//! - [`Region`] - Hierarchical region code (`BR-SP-SAO_PAULO`)
//! - [`SyncItem`] / [`SyncCursor`] - What is replicated, and in which order
//!
//! ## Canonicalization
//!
//! CIDs and signatures are computed over deterministic CBOR. See [`canonical`].

pub mod canonical;
pub mod clock;
pub mod crypto;
pub mod error;
pub mod item;
pub mod post;
pub mod region;
mod serde_bytes;
pub mod types;
pub mod validation;
pub mod vote;

pub use clock::{now_millis, Clock, ManualClock, SystemClock};
pub use crypto::{Blake3Hash, Identity, Keypair, Signature};
pub use error::{CoreError, ValidationError};
pub use item::{SyncCursor, SyncItem};
pub use post::{Level, Post, PostBuilder, PostPayload, PostState, StoredPost};
pub use region::Region;
pub use types::{Cid, PairKey, PeerId};
pub use validation::{
    check_horizon, validate_item, validate_post, validate_report, validate_vote,
    DEFAULT_MAX_CLOCK_SKEW_MS,
};
pub use vote::{Attested, Direction, Report, Vote};
