//! Replicated items and the cursor that orders them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::post::Post;
use crate::region::Region;
use crate::types::Cid;
use crate::vote::{Attested, Report, Vote};

/// Position in the replication order: `(timestamp, key)`, compared
/// lexicographically.
///
/// The key is the CID for posts and the pair key for votes and reports, so
/// pagination stays exact when many items share a timestamp.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SyncCursor {
    pub timestamp: i64,
    #[serde(with = "crate::serde_bytes")]
    pub key: [u8; 32],
}

impl SyncCursor {
    /// Before every item.
    pub const ORIGIN: Self = Self {
        timestamp: i64::MIN,
        key: [0u8; 32],
    };

    pub const fn new(timestamp: i64, key: [u8; 32]) -> Self {
        Self { timestamp, key }
    }

    /// A cursor that admits every item with `timestamp >= since`.
    ///
    /// Item timestamps are never negative, so any `since <= 0` is the origin.
    pub fn since(since: i64) -> Self {
        if since <= 0 {
            return Self::ORIGIN;
        }
        Self {
            timestamp: since - 1,
            key: [0xff; 32],
        }
    }

    pub fn is_origin(&self) -> bool {
        *self == Self::ORIGIN
    }
}

impl Default for SyncCursor {
    fn default() -> Self {
        Self::ORIGIN
    }
}

impl fmt::Debug for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SyncCursor({}, {})",
            self.timestamp,
            &hex::encode(self.key)[..16]
        )
    }
}

/// Anything that is replicated between nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncItem {
    Post(Post),
    Vote(Vote),
    Report(Report),
}

impl SyncItem {
    /// Replication-order timestamp.
    pub fn timestamp(&self) -> i64 {
        match self {
            SyncItem::Post(p) => p.created_at(),
            SyncItem::Vote(v) => v.timestamp,
            SyncItem::Report(r) => r.timestamp,
        }
    }

    /// Replication-order key.
    pub fn key(&self) -> [u8; 32] {
        match self {
            SyncItem::Post(p) => p.cid.0,
            SyncItem::Vote(v) => v.pair_key().0,
            SyncItem::Report(r) => r.pair_key().0,
        }
    }

    pub fn cursor(&self) -> SyncCursor {
        SyncCursor::new(self.timestamp(), self.key())
    }

    /// The post this item belongs to.
    pub fn target(&self) -> Cid {
        match self {
            SyncItem::Post(p) => p.cid,
            SyncItem::Vote(v) => v.target,
            SyncItem::Report(r) => r.target,
        }
    }

    /// Region of a post item. Votes and reports inherit their target's region.
    pub fn post_region(&self) -> Option<&Region> {
        match self {
            SyncItem::Post(p) => Some(p.region()),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SyncItem::Post(_) => "post",
            SyncItem::Vote(_) => "vote",
            SyncItem::Report(_) => "report",
        }
    }
}
