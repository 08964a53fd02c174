//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend. It uses rusqlite with bundled
//! SQLite, wrapped in async via `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use iceberg_core::{
    now_millis, Attested, Cid, Direction, Identity, Level, PeerId, Post, PostPayload, PostState,
    Region, Report, Signature, StoredPost, SyncCursor, SyncItem, Vote,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{InsertResult, PostCursor, PostFilter, Store, UpsertResult};

const POST_COLUMNS: &str = "cid, author, title, body, region, created_at, signature, level, \
     peak_level, up, down, regional_up, regional_down, reports, deleted, updated_at";

/// Region match on a column: equal, or a descendant (`BR-SP` under `BR`).
const REGION_MATCH: &str = "(region = ?1 OR substr(region, 1, length(?1) + 1) = ?1 || '-')";

/// SQLite-based store implementation.
///
/// Thread-safe via an internal mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file if needed, checks its integrity and runs migrations.
    /// A damaged file fails with [`StoreError::Corrupted`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(classify)?;
        let store = Self::init(conn)?;
        tracing::debug!(path = %path.as_ref().display(), "sqlite store opened");
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        check_integrity(&conn)?;
        migration::migrate(&mut conn).map_err(|e| match e {
            StoreError::Database(inner) => classify(inner),
            other => other,
        })?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn).map_err(classify)
        })
        .await
        .map_err(|e| {
            StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("spawn_blocking failed: {e}"),
            ))
        })?
    }
}

fn check_integrity(conn: &Connection) -> Result<()> {
    let verdict: String = conn
        .query_row("PRAGMA quick_check", [], |row| row.get(0))
        .map_err(classify)?;
    if verdict != "ok" {
        return Err(StoreError::Corrupted(verdict));
    }
    Ok(())
}

/// Sort rusqlite errors into the store taxonomy.
fn classify(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::SqliteFailure(ref err, _)
            if matches!(err.code, ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase) =>
        {
            StoreError::Corrupted(e.to_string())
        }
        rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::IntegralValueOutOfRange(..) => StoreError::InvalidData(e.to_string()),
        other => StoreError::Database(other),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row decoding
// ─────────────────────────────────────────────────────────────────────────────

fn blob<const N: usize>(row: &Row<'_>, idx: usize) -> rusqlite::Result<[u8; N]> {
    let bytes: Vec<u8> = row.get(idx)?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        rusqlite::Error::InvalidColumnType(idx, format!("blob of {} bytes", bytes.len()), Type::Blob)
    })
}

fn region(row: &Row<'_>, idx: usize) -> rusqlite::Result<Region> {
    let code: String = row.get(idx)?;
    Region::new(code).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn level(row: &Row<'_>, idx: usize) -> rusqlite::Result<Level> {
    let value: u8 = row.get(idx)?;
    Level::from_u8(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, value.into()))
}

fn row_to_post(row: &Row<'_>) -> rusqlite::Result<StoredPost> {
    let post = Post {
        payload: PostPayload {
            author: Identity(blob(row, 1)?),
            title: row.get(2)?,
            body: row.get(3)?,
            region: region(row, 4)?,
            created_at: row.get(5)?,
        },
        cid: Cid(blob(row, 0)?),
        signature: Signature(blob(row, 6)?),
    };
    let state = PostState {
        level: level(row, 7)?,
        peak_level: level(row, 8)?,
        up: row.get(9)?,
        down: row.get(10)?,
        regional_up: row.get(11)?,
        regional_down: row.get(12)?,
        reports: row.get(13)?,
        deleted: row.get(14)?,
        updated_at: row.get(15)?,
    };
    Ok(StoredPost { post, state })
}

fn row_to_vote(row: &Row<'_>) -> rusqlite::Result<Vote> {
    let raw: i8 = row.get(2)?;
    let direction =
        Direction::from_i8(raw).ok_or(rusqlite::Error::IntegralValueOutOfRange(2, raw.into()))?;
    Ok(Vote {
        voter: Identity(blob(row, 0)?),
        target: Cid(blob(row, 1)?),
        direction,
        region: region(row, 3)?,
        timestamp: row.get(4)?,
        signature: Signature(blob(row, 5)?),
    })
}

fn row_to_report(row: &Row<'_>) -> rusqlite::Result<Report> {
    Ok(Report {
        reporter: Identity(blob(row, 0)?),
        target: Cid(blob(row, 1)?),
        reason: row.get(2)?,
        timestamp: row.get(3)?,
        signature: Signature(blob(row, 4)?),
    })
}

fn query_vote(conn: &Connection, pair_key: &[u8]) -> rusqlite::Result<Option<Vote>> {
    conn.query_row(
        "SELECT voter, target, direction, region, timestamp, signature
         FROM votes WHERE pair_key = ?1",
        params![pair_key],
        row_to_vote,
    )
    .optional()
}

fn query_report(conn: &Connection, pair_key: &[u8]) -> rusqlite::Result<Option<Report>> {
    conn.query_row(
        "SELECT reporter, target, reason, timestamp, signature
         FROM reports WHERE pair_key = ?1",
        params![pair_key],
        row_to_report,
    )
    .optional()
}

fn lww<T: Attested>(incoming: &T, existing: Option<&T>) -> UpsertResult {
    match existing {
        None => UpsertResult::Inserted,
        Some(existing) if incoming.supersedes(existing) => UpsertResult::Superseded,
        Some(_) => UpsertResult::Unchanged,
    }
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_post(&self, post: &Post, state: &PostState) -> Result<InsertResult> {
        let post = post.clone();
        let state = state.clone();

        self.run(move |conn| {
            let inserted = conn.execute(
                &format!(
                    "INSERT OR IGNORE INTO posts ({POST_COLUMNS}, ingested_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
                ),
                params![
                    post.cid.0.as_slice(),
                    post.payload.author.0.as_slice(),
                    post.payload.title,
                    post.payload.body,
                    post.payload.region.as_str(),
                    post.payload.created_at,
                    post.signature.0.as_slice(),
                    state.level.to_u8(),
                    state.peak_level.to_u8(),
                    state.up,
                    state.down,
                    state.regional_up,
                    state.regional_down,
                    state.reports,
                    state.deleted,
                    state.updated_at,
                    now_millis(),
                ],
            )?;

            Ok(if inserted == 1 {
                InsertResult::Inserted
            } else {
                InsertResult::AlreadyExists
            })
        })
        .await
    }

    async fn get_post(&self, cid: &Cid) -> Result<Option<StoredPost>> {
        let cid = *cid;
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {POST_COLUMNS} FROM posts WHERE cid = ?1"),
                params![cid.0.as_slice()],
                row_to_post,
            )
            .optional()
        })
        .await
    }

    async fn update_post_state(&self, cid: &Cid, state: &PostState) -> Result<()> {
        let cid = *cid;
        let state = state.clone();
        self.run(move |conn| {
            conn.execute(
                "UPDATE posts SET level = ?2, peak_level = ?3, up = ?4, down = ?5,
                    regional_up = ?6, regional_down = ?7, reports = ?8, deleted = ?9,
                    updated_at = ?10
                 WHERE cid = ?1",
                params![
                    cid.0.as_slice(),
                    state.level.to_u8(),
                    state.peak_level.to_u8(),
                    state.up,
                    state.down,
                    state.regional_up,
                    state.regional_down,
                    state.reports,
                    state.deleted,
                    state.updated_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_posts(
        &self,
        filter: &PostFilter,
        after: Option<PostCursor>,
        limit: usize,
    ) -> Result<Vec<StoredPost>> {
        let filter = filter.clone();

        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {POST_COLUMNS} FROM posts
                 WHERE (?1 IS NULL OR {REGION_MATCH})
                   AND (?2 IS NULL OR created_at >= ?2)
                   AND (?3 IS NULL OR level >= ?3)
                   AND (?4 IS NULL OR author = ?4)
                   AND (?5 OR deleted = 0)
                   AND (?6 IS NULL OR created_at > ?6 OR (created_at = ?6 AND cid > ?7))
                 ORDER BY created_at, cid
                 LIMIT ?8"
            ))?;

            let posts = stmt
                .query_map(
                    params![
                        filter.region.as_ref().map(Region::as_str),
                        filter.since,
                        filter.min_level.map(Level::to_u8),
                        filter.author.map(|a| a.0.to_vec()),
                        filter.include_deleted,
                        after.map(|c| c.created_at),
                        after.map(|c| c.cid.0.to_vec()),
                        limit_param(limit),
                    ],
                    row_to_post,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(posts)
        })
        .await
    }

    async fn upsert_vote(&self, vote: &Vote) -> Result<UpsertResult> {
        let vote = vote.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let key = vote.pair_key();
            let existing = query_vote(&tx, key.as_bytes())?;
            let result = lww(&vote, existing.as_ref());
            if result.is_applied() {
                tx.execute(
                    "INSERT OR REPLACE INTO votes
                        (pair_key, voter, target, direction, region, timestamp, signature)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        key.as_bytes().as_slice(),
                        vote.voter.0.as_slice(),
                        vote.target.0.as_slice(),
                        vote.direction.as_i8(),
                        vote.region.as_str(),
                        vote.timestamp,
                        vote.signature.0.as_slice(),
                    ],
                )?;
            }
            tx.commit()?;
            Ok(result)
        })
        .await
    }

    async fn upsert_report(&self, report: &Report) -> Result<UpsertResult> {
        let report = report.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let key = report.pair_key();
            let existing = query_report(&tx, key.as_bytes())?;
            let result = lww(&report, existing.as_ref());
            if result.is_applied() {
                tx.execute(
                    "INSERT OR REPLACE INTO reports
                        (pair_key, reporter, target, reason, timestamp, signature)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        key.as_bytes().as_slice(),
                        report.reporter.0.as_slice(),
                        report.target.0.as_slice(),
                        report.reason,
                        report.timestamp,
                        report.signature.0.as_slice(),
                    ],
                )?;
            }
            tx.commit()?;
            Ok(result)
        })
        .await
    }

    async fn votes_for(&self, cid: &Cid) -> Result<Vec<Vote>> {
        let cid = *cid;
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT voter, target, direction, region, timestamp, signature
                 FROM votes WHERE target = ?1",
            )?;
            let votes = stmt
                .query_map(params![cid.0.as_slice()], row_to_vote)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(votes)
        })
        .await
    }

    async fn reports_for(&self, cid: &Cid) -> Result<Vec<Report>> {
        let cid = *cid;
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT reporter, target, reason, timestamp, signature
                 FROM reports WHERE target = ?1",
            )?;
            let reports = stmt
                .query_map(params![cid.0.as_slice()], row_to_report)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(reports)
        })
        .await
    }

    async fn sync_items(
        &self,
        region: &Region,
        after: &SyncCursor,
        limit: usize,
    ) -> Result<Vec<SyncItem>> {
        let region = region.to_string();
        let after = *after;

        self.run(move |conn| {
            let key = after.key.to_vec();
            let max = limit_param(limit);
            let bound = params![region, after.timestamp, key, max];
            let mut items = Vec::new();

            // Each table contributes at most `limit` items; the merged
            // prefix is exact.
            let mut stmt = conn.prepare(&format!(
                "SELECT {POST_COLUMNS} FROM posts
                 WHERE deleted = 0 AND {REGION_MATCH}
                   AND (created_at > ?2 OR (created_at = ?2 AND cid > ?3))
                 ORDER BY created_at, cid
                 LIMIT ?4"
            ))?;
            for post in stmt.query_map(bound, row_to_post)? {
                items.push(SyncItem::Post(post?.post));
            }

            let mut stmt = conn.prepare(
                "SELECT v.voter, v.target, v.direction, v.region, v.timestamp, v.signature
                 FROM votes v JOIN posts p ON p.cid = v.target
                 WHERE p.deleted = 0
                   AND (p.region = ?1 OR substr(p.region, 1, length(?1) + 1) = ?1 || '-')
                   AND (v.timestamp > ?2 OR (v.timestamp = ?2 AND v.pair_key > ?3))
                 ORDER BY v.timestamp, v.pair_key
                 LIMIT ?4",
            )?;
            for vote in stmt.query_map(bound, row_to_vote)? {
                items.push(SyncItem::Vote(vote?));
            }

            let mut stmt = conn.prepare(
                "SELECT r.reporter, r.target, r.reason, r.timestamp, r.signature
                 FROM reports r JOIN posts p ON p.cid = r.target
                 WHERE p.deleted = 0
                   AND (p.region = ?1 OR substr(p.region, 1, length(?1) + 1) = ?1 || '-')
                   AND (r.timestamp > ?2 OR (r.timestamp = ?2 AND r.pair_key > ?3))
                 ORDER BY r.timestamp, r.pair_key
                 LIMIT ?4",
            )?;
            for report in stmt.query_map(bound, row_to_report)? {
                items.push(SyncItem::Report(report?));
            }

            items.sort_by_key(SyncItem::cursor);
            items.truncate(limit);
            Ok(items)
        })
        .await
    }

    async fn load_checkpoint(&self, peer: &PeerId, region: &Region) -> Result<Option<SyncCursor>> {
        let peer = *peer;
        let region = region.to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT timestamp, item_key FROM checkpoints WHERE peer = ?1 AND region = ?2",
                params![peer.0.as_slice(), region],
                |row| Ok(SyncCursor::new(row.get(0)?, blob(row, 1)?)),
            )
            .optional()
        })
        .await
    }

    async fn save_checkpoint(
        &self,
        peer: &PeerId,
        region: &Region,
        cursor: &SyncCursor,
    ) -> Result<()> {
        let peer = *peer;
        let region = region.to_string();
        let cursor = *cursor;

        self.run(move |conn| {
            // Only ever move forward: (timestamp, key) must exceed the stored pair.
            conn.execute(
                "INSERT INTO checkpoints (peer, region, timestamp, item_key, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (peer, region) DO UPDATE SET
                    timestamp = excluded.timestamp,
                    item_key = excluded.item_key,
                    updated_at = excluded.updated_at
                 WHERE excluded.timestamp > checkpoints.timestamp
                    OR (excluded.timestamp = checkpoints.timestamp
                        AND excluded.item_key > checkpoints.item_key)",
                params![
                    peer.0.as_slice(),
                    region,
                    cursor.timestamp,
                    cursor.key.as_slice(),
                    now_millis(),
                ],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iceberg_core::{Keypair, PostBuilder};

    fn make_post(keypair: &Keypair, region: &str, created_at: i64) -> Post {
        PostBuilder::new(keypair.identity(), Region::new(region).unwrap())
            .title(format!("Alerta {created_at}"))
            .body("Deslizamento na encosta.")
            .created_at(created_at)
            .sign(keypair)
    }

    #[tokio::test]
    async fn test_insert_and_get_post() {
        let store = SqliteStore::open_memory().unwrap();
        let keypair = Keypair::generate();
        let post = make_post(&keypair, "BR-RJ", 1_700_000_000_000);
        let state = PostState {
            level: Level::Regional,
            peak_level: Level::Surface,
            up: 7,
            reports: 1,
            updated_at: 99,
            ..PostState::default()
        };

        assert_eq!(store.insert_post(&post, &state).await.unwrap(), InsertResult::Inserted);
        assert_eq!(
            store.insert_post(&post, &PostState::default()).await.unwrap(),
            InsertResult::AlreadyExists
        );

        let stored = store.get_post(&post.cid).await.unwrap().unwrap();
        assert_eq!(stored.post, post);
        assert_eq!(stored.state, state);
        assert!(store.get_post(&Cid::from_bytes([0; 32])).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_state() {
        let store = SqliteStore::open_memory().unwrap();
        let keypair = Keypair::generate();
        let post = make_post(&keypair, "BR", 1);
        store.insert_post(&post, &PostState::default()).await.unwrap();

        let state = PostState {
            deleted: true,
            updated_at: 5,
            ..PostState::default()
        };
        store.update_post_state(&post.cid, &state).await.unwrap();
        assert_eq!(store.get_post(&post.cid).await.unwrap().unwrap().state, state);
    }

    #[tokio::test]
    async fn test_vote_lww_and_ties() {
        let store = SqliteStore::open_memory().unwrap();
        let voter = Keypair::generate();
        let target = Cid::from_bytes([4; 32]);
        let region = Region::new("BR-SP").unwrap();
        let up = Vote::sign(&voter, target, Direction::Up, region.clone(), 100);
        let down = Vote::sign(&voter, target, Direction::Down, region, 100);
        let (winner, loser) = if up.supersedes(&down) { (up, down) } else { (down, up) };

        assert_eq!(store.upsert_vote(&loser).await.unwrap(), UpsertResult::Inserted);
        assert_eq!(store.upsert_vote(&winner).await.unwrap(), UpsertResult::Superseded);
        assert_eq!(store.upsert_vote(&loser).await.unwrap(), UpsertResult::Unchanged);
        assert_eq!(store.votes_for(&target).await.unwrap(), vec![winner]);
    }

    #[tokio::test]
    async fn test_reports_roundtrip() {
        let store = SqliteStore::open_memory().unwrap();
        let reporter = Keypair::generate();
        let target = Cid::from_bytes([4; 32]);
        let report = Report::sign(&reporter, target, "golpe", 10);
        assert_eq!(store.upsert_report(&report).await.unwrap(), UpsertResult::Inserted);
        assert_eq!(store.upsert_report(&report).await.unwrap(), UpsertResult::Unchanged);
        assert_eq!(store.reports_for(&target).await.unwrap(), vec![report]);
    }

    #[tokio::test]
    async fn test_list_posts_pages_in_order() {
        let store = SqliteStore::open_memory().unwrap();
        let keypair = Keypair::generate();
        let mut expected = Vec::new();
        for i in 0..5 {
            // Two posts per timestamp to exercise the CID tiebreak.
            for region in ["BR-SP", "BR-SP-SANTOS"] {
                let post = make_post(&keypair, region, 1_000 + i);
                store.insert_post(&post, &PostState::default()).await.unwrap();
                expected.push(PostCursor {
                    created_at: post.created_at(),
                    cid: post.cid,
                });
            }
        }
        let other = make_post(&keypair, "US", 1_002);
        store.insert_post(&other, &PostState::default()).await.unwrap();
        expected.sort();

        let filter = PostFilter::default().region(Region::new("BR-SP").unwrap());
        let mut seen = Vec::new();
        let mut after = None;
        loop {
            let page = store.list_posts(&filter, after, 3).await.unwrap();
            if page.is_empty() {
                break;
            }
            after = page.last().map(PostCursor::of);
            seen.extend(page.iter().map(PostCursor::of));
        }
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_list_posts_filters() {
        let store = SqliteStore::open_memory().unwrap();
        let alice = Keypair::from_seed(&[1; 32]);
        let bob = Keypair::from_seed(&[2; 32]);
        let a = make_post(&alice, "BR", 10);
        let b = make_post(&bob, "BR", 20);
        store.insert_post(&a, &PostState::default()).await.unwrap();
        let surface = PostState {
            level: Level::Surface,
            peak_level: Level::Surface,
            ..PostState::default()
        };
        store.insert_post(&b, &surface).await.unwrap();

        let by_alice = PostFilter::default().author(alice.identity());
        let posts = store.list_posts(&by_alice, None, 10).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].post, a);

        let high = PostFilter::default().min_level(Level::Regional);
        assert_eq!(store.list_posts(&high, None, 10).await.unwrap()[0].post, b);

        let recent = PostFilter::default().since(15);
        assert_eq!(store.list_posts(&recent, None, 10).await.unwrap().len(), 1);

        let tombstone = PostState {
            deleted: true,
            ..PostState::default()
        };
        store.update_post_state(&a.cid, &tombstone).await.unwrap();
        assert!(store.list_posts(&by_alice, None, 10).await.unwrap().is_empty());
        let with_deleted = by_alice.include_deleted();
        assert_eq!(store.list_posts(&with_deleted, None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sync_items_matches_memory_store() {
        use crate::memory::MemoryStore;

        let sqlite = SqliteStore::open_memory().unwrap();
        let memory = MemoryStore::new();
        let author = Keypair::from_seed(&[9; 32]);

        let mut posts = Vec::new();
        for (i, region) in ["BR-SP", "BR-RJ", "BR-SP-CAMPINAS", "BRX"].iter().enumerate() {
            let post = make_post(&author, region, 50);
            posts.push(post.clone());
            sqlite.insert_post(&post, &PostState::default()).await.unwrap();
            memory.insert_post(&post, &PostState::default()).await.unwrap();
            let voter = Keypair::from_seed(&[i as u8 + 20; 32]);
            let vote = Vote::sign(&voter, post.cid, Direction::Up, Region::new("BR").unwrap(), 50);
            sqlite.upsert_vote(&vote).await.unwrap();
            memory.upsert_vote(&vote).await.unwrap();
            let report = Report::sign(&voter, post.cid, "spam", 60);
            sqlite.upsert_report(&report).await.unwrap();
            memory.upsert_report(&report).await.unwrap();
        }

        let region = Region::new("BR-SP").unwrap();
        let mut after = SyncCursor::ORIGIN;
        let mut from_sqlite = Vec::new();
        loop {
            let page = sqlite.sync_items(&region, &after, 2).await.unwrap();
            let expected = memory.sync_items(&region, &after, 2).await.unwrap();
            assert_eq!(page, expected);
            match page.last() {
                Some(last) => after = last.cursor(),
                None => break,
            }
            from_sqlite.extend(page);
        }

        // Two posts in BR-SP, each with one vote and one report.
        assert_eq!(from_sqlite.len(), 6);
        assert!(from_sqlite.windows(2).all(|w| w[0].cursor() < w[1].cursor()));
    }

    #[tokio::test]
    async fn test_checkpoint_is_monotone() {
        let store = SqliteStore::open_memory().unwrap();
        let peer = PeerId::from_bytes([1; 32]);
        let region = Region::new("BR-RJ").unwrap();

        let first = SyncCursor::new(100, [2; 32]);
        store.save_checkpoint(&peer, &region, &first).await.unwrap();
        store
            .save_checkpoint(&peer, &region, &SyncCursor::new(100, [1; 32]))
            .await
            .unwrap();
        assert_eq!(store.load_checkpoint(&peer, &region).await.unwrap(), Some(first));

        let second = SyncCursor::new(200, [0; 32]);
        store.save_checkpoint(&peer, &region, &second).await.unwrap();
        assert_eq!(store.load_checkpoint(&peer, &region).await.unwrap(), Some(second));

        let other = Region::new("BR-SP").unwrap();
        assert_eq!(store.load_checkpoint(&peer, &other).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iceberg.db");
        let keypair = Keypair::generate();
        let post = make_post(&keypair, "BR", 1);
        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_post(&post, &PostState::default()).await.unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert!(store.get_post(&post.cid).await.unwrap().is_some());
    }

    #[test]
    fn test_garbage_file_is_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.db");
        std::fs::write(&path, vec![0xA5u8; 8192]).unwrap();
        assert!(matches!(
            SqliteStore::open(&path),
            Err(StoreError::Corrupted(_))
        ));
    }
}
