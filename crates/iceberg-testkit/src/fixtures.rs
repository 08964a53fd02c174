//! Test fixtures and helpers.
//!
//! Common setup code for integration tests and benchmarks.

use std::sync::Arc;

use iceberg_core::{
    Cid, Direction, Identity, Keypair, Post, PostBuilder, Region, Report, Vote,
};
use iceberg_leveling::LevelingEngine;
use iceberg_store::{ContentResult, ContentStore, MemoryStore};

/// An author with an in-memory content store.
pub struct TestFixture {
    pub keypair: Keypair,
    pub content: ContentStore<MemoryStore>,
}

impl TestFixture {
    /// Create a new test fixture with a random keypair.
    pub fn new() -> Self {
        Self::from_keypair(Keypair::generate())
    }

    /// Create with a deterministic keypair from seed.
    pub fn with_seed(seed: [u8; 32]) -> Self {
        Self::from_keypair(Keypair::from_seed(&seed))
    }

    fn from_keypair(keypair: Keypair) -> Self {
        Self {
            keypair,
            content: ContentStore::new(Arc::new(MemoryStore::new()), LevelingEngine::default()),
        }
    }

    pub fn identity(&self) -> Identity {
        self.keypair.identity()
    }

    /// Sign a post by this fixture's author.
    ///
    /// # Panics
    ///
    /// If `region` is not a valid region code.
    pub fn make_post(&self, region: &str, title: &str, created_at: i64) -> Post {
        PostBuilder::new(self.identity(), parse(region))
            .title(title)
            .body(format!("{title} body"))
            .created_at(created_at)
            .sign(&self.keypair)
    }

    /// Sign a vote by this fixture's author.
    pub fn make_vote(&self, target: Cid, direction: Direction, region: &str, timestamp: i64) -> Vote {
        Vote::sign(&self.keypair, target, direction, parse(region), timestamp)
    }

    pub fn make_report(&self, target: Cid, reason: &str, timestamp: i64) -> Report {
        Report::sign(&self.keypair, target, reason, timestamp)
    }

    /// Store `post` and `count` upvotes on it from distinct voters in
    /// `voter_region`, one second apart after the post.
    pub async fn seed_upvoted(&self, post: &Post, voter_region: &str, count: usize) -> ContentResult<()> {
        self.content.put_post(post).await?;
        for (i, voter) in voters(count).iter().enumerate() {
            let vote = Vote::sign(
                voter,
                post.cid,
                Direction::Up,
                parse(voter_region),
                post.created_at() + 1_000 * (i as i64 + 1),
            );
            self.content.put_vote(&vote).await?;
        }
        Ok(())
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic, pairwise distinct voter keypairs.
pub fn voters(count: usize) -> Vec<Keypair> {
    (0..count)
        .map(|i| {
            let mut seed = [0xF0u8; 32];
            seed[..8].copy_from_slice(&(i as u64).to_le_bytes());
            Keypair::from_seed(&seed)
        })
        .collect()
}

fn parse(region: &str) -> Region {
    match Region::new(region) {
        Ok(region) => region,
        Err(err) => panic!("fixture region {region:?}: {err}"),
    }
}
