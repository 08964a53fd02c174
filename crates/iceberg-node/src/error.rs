//! Error types for the node facade.

use iceberg_core::Cid;
use iceberg_leveling::LevelingError;
use iceberg_store::ContentError;
use iceberg_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The operation needs a network connection.
    #[error("not connected to the network")]
    NotConnected,

    /// Sync or transport error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Content store error.
    #[error(transparent)]
    Content(#[from] ContentError),

    /// The author is posting too fast.
    #[error("rate limited: {0}")]
    RateLimited(LevelingError),

    /// Authors cannot vote on their own posts.
    #[error("cannot vote on own post {0}")]
    SelfVote(Cid),

    #[error("invalid region: {0}")]
    InvalidRegion(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// A fatal store failure was observed earlier; the node stopped syncing.
    #[error("store failure: {0}")]
    StoreFailure(String),
}

impl NodeError {
    /// HTTP-equivalent status for the boundary layer.
    pub fn status_code(&self) -> u16 {
        match self {
            NodeError::NotConnected
            | NodeError::SelfVote(_)
            | NodeError::InvalidRegion(_) => 400,
            NodeError::RateLimited(_) => 429,
            NodeError::Content(ContentError::NotFound(_)) => 404,
            NodeError::Content(ContentError::NotAuthor(_)) => 403,
            NodeError::Content(ContentError::LegacyImmutable(_)) => 409,
            NodeError::Content(ContentError::IntegrityViolation(_)) => 422,
            NodeError::Content(ContentError::Store(_)) | NodeError::Config(_) => 500,
            NodeError::Sync(_) => 502,
            NodeError::StoreFailure(_) => 503,
        }
    }
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(NodeError::NotConnected.status_code(), 400);
        assert_eq!(
            NodeError::RateLimited(LevelingError::TooSoon { wait_secs: 3 }).status_code(),
            429
        );
        let cid = Cid::from_bytes([1; 32]);
        assert_eq!(NodeError::Content(ContentError::NotFound(cid)).status_code(), 404);
        assert_eq!(
            NodeError::Content(ContentError::LegacyImmutable(cid)).status_code(),
            409
        );
        assert_eq!(NodeError::StoreFailure("disk".into()).status_code(), 503);
    }
}
