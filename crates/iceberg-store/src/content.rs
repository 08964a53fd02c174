//! The content store: validated, serialized writes with leveling.
//!
//! [`ContentStore`] wraps a [`Store`] backend. Every write is validated
//! first (a CID mismatch or bad signature is an `IntegrityViolation` and is
//! never persisted), then applied under the target post's lock, then the
//! post's level is recomputed under the same lock.

use std::sync::Arc;
use std::time::Duration;

use iceberg_core::{
    check_horizon, validate_post, validate_report, validate_vote, Cid, Clock, Identity, Level,
    PeerId, Post, PostState, Region, Report, StoredPost, SyncCursor, SyncItem, SystemClock,
    Vote, DEFAULT_MAX_CLOCK_SKEW_MS,
};
use iceberg_leveling::{LevelingEngine, Progress, Tally};

use crate::error::{ContentError, ContentResult};
use crate::locks::{CidGuard, CidLocks};
use crate::traits::{InsertResult, PostCursor, PostFilter, Store};

/// Default page size for [`PostPager`].
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// A change of effective level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelChange {
    pub cid: Cid,
    pub from: Level,
    pub to: Level,
}

/// Result of applying one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// The post the item belongs to.
    pub cid: Cid,
    /// False when the item was already known (idempotent re-application).
    pub changed: bool,
    /// Set when the post's effective level moved.
    pub level_change: Option<LevelChange>,
}

impl ApplyOutcome {
    fn unchanged(cid: Cid) -> Self {
        Self {
            cid,
            changed: false,
            level_change: None,
        }
    }
}

/// Result of a full leveling sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecomputeSummary {
    pub scanned: usize,
    pub changed: usize,
    pub level_changes: Vec<LevelChange>,
}

/// Validated content storage with leveling.
pub struct ContentStore<S: Store> {
    backend: Arc<S>,
    engine: LevelingEngine,
    clock: Arc<dyn Clock>,
    max_skew_ms: i64,
    locks: CidLocks,
}

impl<S: Store> ContentStore<S> {
    /// Create a content store over `backend` using the system clock.
    pub fn new(backend: Arc<S>, engine: LevelingEngine) -> Self {
        Self {
            backend,
            engine,
            clock: Arc::new(SystemClock),
            max_skew_ms: DEFAULT_MAX_CLOCK_SKEW_MS,
            locks: CidLocks::new(),
        }
    }

    /// Replace the clock (tests drive leveling age with a manual clock).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// How far past local time an accepted item may be dated.
    pub fn with_max_skew(mut self, skew: Duration) -> Self {
        self.max_skew_ms = i64::try_from(skew.as_millis()).unwrap_or(i64::MAX);
        self
    }

    pub fn backend(&self) -> &Arc<S> {
        &self.backend
    }

    pub fn engine(&self) -> &LevelingEngine {
        &self.engine
    }

    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Latest timestamp an item may carry right now.
    pub fn horizon(&self) -> i64 {
        self.now().saturating_add(self.max_skew_ms)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Store a post. Re-delivering a known post changes nothing, including
    /// for tombstoned posts.
    pub async fn put_post(&self, post: &Post) -> ContentResult<ApplyOutcome> {
        validate_post(post)
            .and_then(|()| check_horizon(post.created_at(), self.horizon()))
            .map_err(|e| {
                tracing::warn!(cid = %post.cid, error = %e, "rejected post");
                ContentError::IntegrityViolation(e)
            })?;

        let guard = self.locks.lock(post.cid).await;
        let now = self.now();
        let initial = PostState {
            updated_at: now,
            ..PostState::default()
        };
        let inserted = self.backend.insert_post(post, &initial).await? == InsertResult::Inserted;

        // Votes may have arrived before the post.
        let mut outcome = self.recompute_locked(&guard, now).await?;
        outcome.changed |= inserted;
        if inserted {
            tracing::debug!(cid = %post.cid, region = %post.region(), "post stored");
        }
        Ok(outcome)
    }

    /// Store a vote, resolving per-voter conflicts last-writer-wins.
    pub async fn put_vote(&self, vote: &Vote) -> ContentResult<ApplyOutcome> {
        validate_vote(vote)
            .and_then(|()| check_horizon(vote.timestamp, self.horizon()))
            .map_err(|e| {
                tracing::warn!(target_cid = %vote.target, voter = %vote.voter, error = %e, "rejected vote");
                ContentError::IntegrityViolation(e)
            })?;

        let guard = self.locks.lock(vote.target).await;
        if !self.backend.upsert_vote(vote).await?.is_applied() {
            return Ok(ApplyOutcome::unchanged(vote.target));
        }
        let mut outcome = self.recompute_locked(&guard, self.now()).await?;
        outcome.changed = true;
        Ok(outcome)
    }

    /// Store a report, resolving per-reporter conflicts last-writer-wins.
    pub async fn put_report(&self, report: &Report) -> ContentResult<ApplyOutcome> {
        validate_report(report)
            .and_then(|()| check_horizon(report.timestamp, self.horizon()))
            .map_err(|e| {
                tracing::warn!(target_cid = %report.target, reporter = %report.reporter, error = %e, "rejected report");
                ContentError::IntegrityViolation(e)
            })?;

        let guard = self.locks.lock(report.target).await;
        if !self.backend.upsert_report(report).await?.is_applied() {
            return Ok(ApplyOutcome::unchanged(report.target));
        }
        let mut outcome = self.recompute_locked(&guard, self.now()).await?;
        outcome.changed = true;
        Ok(outcome)
    }

    /// Apply any replicated item.
    pub async fn apply(&self, item: &SyncItem) -> ContentResult<ApplyOutcome> {
        match item {
            SyncItem::Post(post) => self.put_post(post).await,
            SyncItem::Vote(vote) => self.put_vote(vote).await,
            SyncItem::Report(report) => self.put_report(report).await,
        }
    }

    /// Tombstone a post on behalf of its author.
    pub async fn delete(&self, cid: &Cid, requester: &Identity) -> ContentResult<ApplyOutcome> {
        let _guard = self.locks.lock(*cid).await;
        let stored = self
            .backend
            .get_post(cid)
            .await?
            .ok_or(ContentError::NotFound(*cid))?;

        if stored.post.author() != requester {
            return Err(ContentError::NotAuthor(*cid));
        }
        if !self.engine.can_delete(&stored.state) {
            return Err(ContentError::LegacyImmutable(*cid));
        }
        if stored.state.deleted {
            return Ok(ApplyOutcome::unchanged(*cid));
        }

        let state = PostState {
            deleted: true,
            updated_at: self.now(),
            ..stored.state
        };
        self.backend.update_post_state(cid, &state).await?;
        tracing::debug!(%cid, "post deleted");
        Ok(ApplyOutcome {
            cid: *cid,
            changed: true,
            level_change: None,
        })
    }

    /// Recompute one post's level.
    pub async fn recompute(&self, cid: &Cid) -> ContentResult<ApplyOutcome> {
        let guard = self.locks.lock(*cid).await;
        self.recompute_locked(&guard, self.now()).await
    }

    /// Recompute every post. Needed because Legacy promotion depends on age,
    /// which changes without any new write.
    pub async fn recompute_all(&self) -> ContentResult<RecomputeSummary> {
        let mut summary = RecomputeSummary::default();
        let mut pager = self.list(PostFilter::default().include_deleted());

        while let Some(page) = pager.next_page().await? {
            for stored in page {
                let outcome = self.recompute(&stored.cid()).await?;
                summary.scanned += 1;
                if outcome.changed {
                    summary.changed += 1;
                }
                summary.level_changes.extend(outcome.level_change);
            }
        }

        tracing::debug!(
            scanned = summary.scanned,
            changed = summary.changed,
            "leveling sweep finished"
        );
        Ok(summary)
    }

    async fn recompute_locked(&self, guard: &CidGuard, now: i64) -> ContentResult<ApplyOutcome> {
        let cid = **guard;
        let Some(stored) = self.backend.get_post(&cid).await? else {
            return Ok(ApplyOutcome::unchanged(cid));
        };

        let votes = self.backend.votes_for(&cid).await?;
        let reports = self.backend.reports_for(&cid).await?;
        let decision = self
            .engine
            .recompute(&stored.post, &stored.state, &votes, &reports, now);

        if decision.changed {
            self.backend.update_post_state(&cid, &decision.state).await?;
        }

        let level_change = decision.level_change().map(|(from, to)| {
            tracing::debug!(%cid, from = from.name(), to = to.name(), "level changed");
            LevelChange { cid, from, to }
        });

        Ok(ApplyOutcome {
            cid,
            changed: decision.changed,
            level_change,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// A post with its derived state.
    pub async fn get(&self, cid: &Cid) -> ContentResult<StoredPost> {
        self.backend
            .get_post(cid)
            .await?
            .ok_or(ContentError::NotFound(*cid))
    }

    /// Page through posts matching `filter` from the beginning.
    pub fn list(&self, filter: PostFilter) -> PostPager<S> {
        PostPager::new(self.backend.clone(), filter, None, DEFAULT_PAGE_SIZE)
    }

    /// Resume a listing after `cursor`.
    pub fn list_from(&self, filter: PostFilter, cursor: PostCursor) -> PostPager<S> {
        PostPager::new(self.backend.clone(), filter, Some(cursor), DEFAULT_PAGE_SIZE)
    }

    pub async fn votes(&self, cid: &Cid) -> ContentResult<Vec<Vote>> {
        Ok(self.backend.votes_for(cid).await?)
    }

    pub async fn reports(&self, cid: &Cid) -> ContentResult<Vec<Report>> {
        Ok(self.backend.reports_for(cid).await?)
    }

    /// Effective vote and report counts for a known post.
    pub async fn tally(&self, cid: &Cid) -> ContentResult<Tally> {
        let stored = self.get(cid).await?;
        let votes = self.backend.votes_for(cid).await?;
        let reports = self.backend.reports_for(cid).await?;
        Ok(Tally::from_records(&stored.post, &votes, &reports))
    }

    /// What a post still needs for its next level.
    pub async fn progress(&self, cid: &Cid) -> ContentResult<Progress> {
        let stored = self.get(cid).await?;
        Ok(self.engine.progress(&stored.post, &stored.state, self.now()))
    }

    /// Creation times of an author's posts since `since`, tombstones included.
    pub async fn recent_post_times(&self, author: &Identity, since: i64) -> ContentResult<Vec<i64>> {
        let filter = PostFilter::default()
            .author(*author)
            .since(since)
            .include_deleted();
        let mut pager = self.list(filter);
        let mut times = Vec::new();
        while let Some(page) = pager.next_page().await? {
            times.extend(page.iter().map(|p| p.post.created_at()));
        }
        Ok(times)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sync
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn sync_items(
        &self,
        region: &Region,
        after: &SyncCursor,
        limit: usize,
    ) -> ContentResult<Vec<SyncItem>> {
        Ok(self.backend.sync_items(region, after, limit).await?)
    }

    pub async fn load_checkpoint(
        &self,
        peer: &PeerId,
        region: &Region,
    ) -> ContentResult<Option<SyncCursor>> {
        Ok(self.backend.load_checkpoint(peer, region).await?)
    }

    pub async fn save_checkpoint(
        &self,
        peer: &PeerId,
        region: &Region,
        cursor: &SyncCursor,
    ) -> ContentResult<()> {
        Ok(self.backend.save_checkpoint(peer, region, cursor).await?)
    }
}

/// A lazy, finite, restartable listing of posts.
///
/// The pager holds no connection; its position is the [`PostCursor`] of
/// the last post returned, which can be saved and passed to
/// [`ContentStore::list_from`] later.
pub struct PostPager<S: Store> {
    backend: Arc<S>,
    filter: PostFilter,
    cursor: Option<PostCursor>,
    page_size: usize,
    done: bool,
}

impl<S: Store> PostPager<S> {
    pub fn new(
        backend: Arc<S>,
        filter: PostFilter,
        cursor: Option<PostCursor>,
        page_size: usize,
    ) -> Self {
        Self {
            backend,
            filter,
            cursor,
            page_size: page_size.max(1),
            done: false,
        }
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Position after the last returned post.
    pub fn cursor(&self) -> Option<PostCursor> {
        self.cursor
    }

    /// The next page, or `None` once the listing is exhausted.
    pub async fn next_page(&mut self) -> ContentResult<Option<Vec<StoredPost>>> {
        if self.done {
            return Ok(None);
        }
        let page = self
            .backend
            .list_posts(&self.filter, self.cursor, self.page_size)
            .await?;
        if page.len() < self.page_size {
            self.done = true;
        }
        if page.is_empty() {
            return Ok(None);
        }
        self.cursor = page.last().map(PostCursor::of);
        Ok(Some(page))
    }

    /// Drain the remaining pages.
    pub async fn collect(mut self) -> ContentResult<Vec<StoredPost>> {
        let mut all = Vec::new();
        while let Some(page) = self.next_page().await? {
            all.extend(page);
        }
        Ok(all)
    }
}
