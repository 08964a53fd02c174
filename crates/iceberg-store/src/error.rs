//! Error types for the store module.

use iceberg_core::{Cid, ValidationError};
use thiserror::Error;

/// Errors from a storage backend. All of them are fatal for the node.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The database failed its integrity check.
    #[error("database corrupted: {0}")]
    Corrupted(String),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Record serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors from the content store.
#[derive(Debug, Error)]
pub enum ContentError {
    /// The item failed CID, signature or structural checks. Never persisted.
    #[error("integrity violation: {0}")]
    IntegrityViolation(#[from] ValidationError),

    /// No post with this CID.
    #[error("post not found: {0}")]
    NotFound(Cid),

    /// Legacy posts cannot be deleted.
    #[error("post {0} is legacy and cannot be deleted")]
    LegacyImmutable(Cid),

    /// Only the author may delete a post.
    #[error("only the author may delete post {0}")]
    NotAuthor(Cid),

    /// Backend failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ContentError {
    /// Backend failures cannot be recovered in-process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ContentError::Store(_))
    }
}

/// Result type for content store operations.
pub type ContentResult<T> = std::result::Result<T, ContentError>;
