//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use iceberg_core::{
    Attested, Cid, PairKey, PeerId, Post, PostState, Region, Report, StoredPost, SyncCursor,
    SyncItem, Vote,
};

use crate::error::Result;
use crate::traits::{InsertResult, PostCursor, PostFilter, Store, UpsertResult};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    posts: HashMap<Cid, StoredPost>,
    /// Effective vote per (voter, target) pair.
    votes: HashMap<PairKey, Vote>,
    /// Effective report per (reporter, target) pair.
    reports: HashMap<PairKey, Report>,
    checkpoints: HashMap<(PeerId, Region), SyncCursor>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn upsert<T: Attested + Clone>(table: &mut HashMap<PairKey, T>, record: &T) -> UpsertResult {
    let key = record.pair_key();
    let result = match table.get(&key) {
        None => UpsertResult::Inserted,
        Some(existing) if record.supersedes(existing) => UpsertResult::Superseded,
        Some(_) => return UpsertResult::Unchanged,
    };
    table.insert(key, record.clone());
    result
}

impl MemoryStoreInner {
    fn serves(&self, target: &Cid, region: &Region) -> bool {
        self.posts
            .get(target)
            .is_some_and(|p| !p.state.deleted && p.post.region().is_within(region))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_post(&self, post: &Post, state: &PostState) -> Result<InsertResult> {
        let mut inner = self.inner.write();
        if inner.posts.contains_key(&post.cid) {
            return Ok(InsertResult::AlreadyExists);
        }
        inner.posts.insert(
            post.cid,
            StoredPost {
                post: post.clone(),
                state: state.clone(),
            },
        );
        Ok(InsertResult::Inserted)
    }

    async fn get_post(&self, cid: &Cid) -> Result<Option<StoredPost>> {
        Ok(self.inner.read().posts.get(cid).cloned())
    }

    async fn update_post_state(&self, cid: &Cid, state: &PostState) -> Result<()> {
        if let Some(stored) = self.inner.write().posts.get_mut(cid) {
            stored.state = state.clone();
        }
        Ok(())
    }

    async fn list_posts(
        &self,
        filter: &PostFilter,
        after: Option<PostCursor>,
        limit: usize,
    ) -> Result<Vec<StoredPost>> {
        let inner = self.inner.read();
        let mut posts: Vec<&StoredPost> = inner
            .posts
            .values()
            .filter(|p| filter.matches(p))
            .filter(|p| after.map_or(true, |after| PostCursor::of(p) > after))
            .collect();
        posts.sort_by_key(|p| PostCursor::of(p));
        Ok(posts.into_iter().take(limit).cloned().collect())
    }

    async fn upsert_vote(&self, vote: &Vote) -> Result<UpsertResult> {
        Ok(upsert(&mut self.inner.write().votes, vote))
    }

    async fn upsert_report(&self, report: &Report) -> Result<UpsertResult> {
        Ok(upsert(&mut self.inner.write().reports, report))
    }

    async fn votes_for(&self, cid: &Cid) -> Result<Vec<Vote>> {
        let inner = self.inner.read();
        Ok(inner
            .votes
            .values()
            .filter(|v| &v.target == cid)
            .cloned()
            .collect())
    }

    async fn reports_for(&self, cid: &Cid) -> Result<Vec<Report>> {
        let inner = self.inner.read();
        Ok(inner
            .reports
            .values()
            .filter(|r| &r.target == cid)
            .cloned()
            .collect())
    }

    async fn sync_items(
        &self,
        region: &Region,
        after: &SyncCursor,
        limit: usize,
    ) -> Result<Vec<SyncItem>> {
        let inner = self.inner.read();

        let posts = inner
            .posts
            .values()
            .filter(|p| inner.serves(&p.cid(), region))
            .map(|p| SyncItem::Post(p.post.clone()));
        let votes = inner
            .votes
            .values()
            .filter(|v| inner.serves(&v.target, region))
            .map(|v| SyncItem::Vote(v.clone()));
        let reports = inner
            .reports
            .values()
            .filter(|r| inner.serves(&r.target, region))
            .map(|r| SyncItem::Report(r.clone()));

        let mut items: Vec<SyncItem> = posts
            .chain(votes)
            .chain(reports)
            .filter(|item| item.cursor() > *after)
            .collect();
        items.sort_by_key(SyncItem::cursor);
        items.truncate(limit);
        Ok(items)
    }

    async fn load_checkpoint(&self, peer: &PeerId, region: &Region) -> Result<Option<SyncCursor>> {
        Ok(self
            .inner
            .read()
            .checkpoints
            .get(&(*peer, region.clone()))
            .copied())
    }

    async fn save_checkpoint(
        &self,
        peer: &PeerId,
        region: &Region,
        cursor: &SyncCursor,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let slot = inner
            .checkpoints
            .entry((*peer, region.clone()))
            .or_insert(*cursor);
        if *cursor > *slot {
            *slot = *cursor;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iceberg_core::{Direction, Keypair, PostBuilder};

    fn post(kp: &Keypair, region: &str, created_at: i64) -> Post {
        PostBuilder::new(kp.identity(), Region::new(region).unwrap())
            .title(format!("post {created_at}"))
            .body("corpo")
            .created_at(created_at)
            .sign(kp)
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let store = MemoryStore::new();
        let kp = Keypair::generate();
        let p = post(&kp, "BR", 1);
        let state = PostState::default();
        assert_eq!(store.insert_post(&p, &state).await.unwrap(), InsertResult::Inserted);
        assert_eq!(
            store.insert_post(&p, &state).await.unwrap(),
            InsertResult::AlreadyExists
        );
    }

    #[tokio::test]
    async fn test_vote_lww() {
        let store = MemoryStore::new();
        let voter = Keypair::generate();
        let target = Cid::from_bytes([1; 32]);
        let region = Region::new("BR").unwrap();
        let old = Vote::sign(&voter, target, Direction::Up, region.clone(), 10);
        let new = Vote::sign(&voter, target, Direction::Down, region, 20);

        assert_eq!(store.upsert_vote(&new).await.unwrap(), UpsertResult::Inserted);
        assert_eq!(store.upsert_vote(&old).await.unwrap(), UpsertResult::Unchanged);
        assert_eq!(store.upsert_vote(&new).await.unwrap(), UpsertResult::Unchanged);
        let votes = store.votes_for(&target).await.unwrap();
        assert_eq!(votes, vec![new]);
    }

    #[tokio::test]
    async fn test_sync_items_region_and_cursor() {
        let store = MemoryStore::new();
        let kp = Keypair::generate();
        let sp = post(&kp, "BR-SP", 10);
        let rj = post(&kp, "BR-RJ", 20);
        for p in [&sp, &rj] {
            store.insert_post(p, &PostState::default()).await.unwrap();
        }
        let vote = Vote::sign(&kp, sp.cid, Direction::Up, Region::new("BR").unwrap(), 30);
        store.upsert_vote(&vote).await.unwrap();

        let region = Region::new("BR-SP").unwrap();
        let items = store.sync_items(&region, &SyncCursor::ORIGIN, 10).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], SyncItem::Post(sp.clone()));
        assert_eq!(items[1], SyncItem::Vote(vote));

        let rest = store.sync_items(&region, &items[0].cursor(), 10).await.unwrap();
        assert_eq!(rest.len(), 1);

        let all = store
            .sync_items(&Region::new("BR").unwrap(), &SyncCursor::ORIGIN, 2)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1], SyncItem::Post(rj));
    }

    #[tokio::test]
    async fn test_checkpoint_never_moves_back() {
        let store = MemoryStore::new();
        let peer = PeerId::from_bytes([5; 32]);
        let region = Region::new("BR").unwrap();
        assert_eq!(store.load_checkpoint(&peer, &region).await.unwrap(), None);

        let later = SyncCursor::new(50, [0; 32]);
        store.save_checkpoint(&peer, &region, &later).await.unwrap();
        store
            .save_checkpoint(&peer, &region, &SyncCursor::new(10, [0; 32]))
            .await
            .unwrap();
        assert_eq!(store.load_checkpoint(&peer, &region).await.unwrap(), Some(later));
    }
}
