//! Store trait: the abstract interface for content persistence.
//!
//! This trait keeps the node storage-agnostic. Implementations include
//! SQLite (primary) and in-memory (for tests).

use async_trait::async_trait;
use iceberg_core::{
    Cid, Identity, Level, PeerId, Post, PostState, Region, Report, StoredPost, SyncCursor,
    SyncItem, Vote,
};

use crate::error::Result;

/// Result of inserting a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// Post was inserted.
    Inserted,
    /// A post with this CID already exists (idempotent - not an error).
    AlreadyExists,
}

/// Result of storing a vote or report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertResult {
    /// First record for this (actor, target) pair.
    Inserted,
    /// Replaced an older record for the same pair.
    Superseded,
    /// The stored record wins (or is identical); nothing changed.
    Unchanged,
}

impl UpsertResult {
    pub fn is_applied(self) -> bool {
        !matches!(self, UpsertResult::Unchanged)
    }
}

/// Position in the post listing order: `(created_at, cid)` ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PostCursor {
    pub created_at: i64,
    pub cid: Cid,
}

impl PostCursor {
    pub fn of(post: &StoredPost) -> Self {
        Self {
            created_at: post.post.created_at(),
            cid: post.cid(),
        }
    }
}

/// Criteria for listing posts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostFilter {
    /// Only posts whose region lies within this region.
    pub region: Option<Region>,
    /// Only posts created at or after this time (Unix ms).
    pub since: Option<i64>,
    /// Only posts at or above this level.
    pub min_level: Option<Level>,
    /// Only posts by this author.
    pub author: Option<Identity>,
    /// Include tombstoned posts.
    pub include_deleted: bool,
}

impl PostFilter {
    pub fn region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    pub fn since(mut self, since: i64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn min_level(mut self, level: Level) -> Self {
        self.min_level = Some(level);
        self
    }

    pub fn author(mut self, author: Identity) -> Self {
        self.author = Some(author);
        self
    }

    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    /// True if `post` passes every criterion.
    pub fn matches(&self, post: &StoredPost) -> bool {
        if !self.include_deleted && post.state.deleted {
            return false;
        }
        if let Some(region) = &self.region {
            if !post.post.region().is_within(region) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if post.post.created_at() < since {
                return false;
            }
        }
        if let Some(level) = self.min_level {
            if post.state.level < level {
                return false;
            }
        }
        if let Some(author) = &self.author {
            if post.post.author() != author {
                return false;
            }
        }
        true
    }
}

/// The Store trait: async interface for content persistence.
///
/// Backends are dumb: they do not validate signatures or run leveling.
/// That is the job of [`ContentStore`](crate::ContentStore).
///
/// # Design Notes
///
/// - **Idempotent inserts**: Inserting the same post twice returns `AlreadyExists`.
/// - **Last-writer-wins**: At most one vote (and one report) is kept per
///   (actor, target) pair; see [`Attested`](iceberg_core::Attested).
/// - **Monotone checkpoints**: Saving a checkpoint never moves it backwards.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    // ─────────────────────────────────────────────────────────────────────────
    // Post Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a post with its initial derived state.
    async fn insert_post(&self, post: &Post, state: &PostState) -> Result<InsertResult>;

    /// Get a post and its derived state.
    async fn get_post(&self, cid: &Cid) -> Result<Option<StoredPost>>;

    /// Overwrite the derived state of an existing post.
    async fn update_post_state(&self, cid: &Cid, state: &PostState) -> Result<()>;

    /// List posts matching `filter`, strictly after `after`, ordered by
    /// `(created_at, cid)` ascending, at most `limit`.
    async fn list_posts(
        &self,
        filter: &PostFilter,
        after: Option<PostCursor>,
        limit: usize,
    ) -> Result<Vec<StoredPost>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Vote and Report Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Store a vote unless the existing record for the pair wins.
    async fn upsert_vote(&self, vote: &Vote) -> Result<UpsertResult>;

    /// Store a report unless the existing record for the pair wins.
    async fn upsert_report(&self, report: &Report) -> Result<UpsertResult>;

    /// Effective votes on a post.
    async fn votes_for(&self, cid: &Cid) -> Result<Vec<Vote>>;

    /// Effective reports on a post.
    async fn reports_for(&self, cid: &Cid) -> Result<Vec<Report>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Sync Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Items relevant to `region`, strictly after `after`, ascending by
    /// cursor, at most `limit`.
    ///
    /// Posts qualify when their region lies within `region` and they are not
    /// tombstoned. Votes and reports qualify when their target does.
    async fn sync_items(
        &self,
        region: &Region,
        after: &SyncCursor,
        limit: usize,
    ) -> Result<Vec<SyncItem>>;

    /// Last applied cursor for a (peer, region) pair.
    async fn load_checkpoint(&self, peer: &PeerId, region: &Region) -> Result<Option<SyncCursor>>;

    /// Record a checkpoint. A cursor older than the stored one is ignored.
    async fn save_checkpoint(&self, peer: &PeerId, region: &Region, cursor: &SyncCursor)
        -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use iceberg_core::{Keypair, PostBuilder};

    fn stored(region: &str, created_at: i64) -> StoredPost {
        let kp = Keypair::from_seed(&[3; 32]);
        let post = PostBuilder::new(kp.identity(), Region::new(region).unwrap())
            .title("t")
            .body("b")
            .created_at(created_at)
            .sign(&kp);
        StoredPost {
            post,
            state: PostState::default(),
        }
    }

    #[test]
    fn test_filter_matches() {
        let p = stored("BR-SP-SAO_PAULO", 100);
        assert!(PostFilter::default().matches(&p));
        assert!(PostFilter::default().region(Region::new("BR-SP").unwrap()).matches(&p));
        assert!(!PostFilter::default().region(Region::new("BR-RJ").unwrap()).matches(&p));
        assert!(PostFilter::default().since(100).matches(&p));
        assert!(!PostFilter::default().since(101).matches(&p));
        assert!(!PostFilter::default().min_level(Level::Regional).matches(&p));

        let mut deleted = p.clone();
        deleted.state.deleted = true;
        assert!(!PostFilter::default().matches(&deleted));
        assert!(PostFilter::default().include_deleted().matches(&deleted));
    }

    #[test]
    fn test_cursor_order() {
        let a = PostCursor::of(&stored("BR", 1));
        let b = PostCursor::of(&stored("BR", 2));
        assert!(a < b);
    }
}
