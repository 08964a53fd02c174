//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;

use iceberg_core::now_millis;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema v{current} is newer than supported v{CURRENT_VERSION}"
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
        tracing::debug!(from = current, to = CURRENT_VERSION, "schema migrated");
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Posts: immutable payload plus derived state
        CREATE TABLE posts (
            cid BLOB PRIMARY KEY,             -- 32 bytes, Blake3 of canonical payload
            author BLOB NOT NULL,             -- 32 bytes, Ed25519 public key
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            region TEXT NOT NULL,
            created_at INTEGER NOT NULL,      -- author-claimed timestamp (Unix ms)
            signature BLOB NOT NULL,          -- 64 bytes
            level INTEGER NOT NULL DEFAULT 0,
            peak_level INTEGER NOT NULL DEFAULT 0,
            up INTEGER NOT NULL DEFAULT 0,
            down INTEGER NOT NULL DEFAULT 0,
            regional_up INTEGER NOT NULL DEFAULT 0,
            regional_down INTEGER NOT NULL DEFAULT 0,
            reports INTEGER NOT NULL DEFAULT 0,
            deleted INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL,
            ingested_at INTEGER NOT NULL      -- local timestamp of ingestion
        );

        -- Effective vote per (voter, target)
        CREATE TABLE votes (
            pair_key BLOB PRIMARY KEY,        -- 32 bytes, Blake3 of (voter, target)
            voter BLOB NOT NULL,
            target BLOB NOT NULL,
            direction INTEGER NOT NULL,       -- +1 / -1
            region TEXT NOT NULL,             -- voter's region
            timestamp INTEGER NOT NULL,
            signature BLOB NOT NULL
        );

        -- Effective report per (reporter, target)
        CREATE TABLE reports (
            pair_key BLOB PRIMARY KEY,
            reporter BLOB NOT NULL,
            target BLOB NOT NULL,
            reason TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            signature BLOB NOT NULL
        );

        -- Sync checkpoints per (peer, region)
        CREATE TABLE checkpoints (
            peer BLOB NOT NULL,
            region TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            item_key BLOB NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (peer, region)
        );

        -- Indexes for common queries
        CREATE INDEX idx_posts_order ON posts(created_at, cid);
        CREATE INDEX idx_posts_region ON posts(region);
        CREATE INDEX idx_posts_author ON posts(author);
        CREATE INDEX idx_votes_target ON votes(target);
        CREATE INDEX idx_votes_order ON votes(timestamp, pair_key);
        CREATE INDEX idx_reports_target ON reports(target);
        CREATE INDEX idx_reports_order ON reports(timestamp, pair_key);
        "#,
    )?;

    Ok(())
}
