//! Error types for the sync module.

use thiserror::Error;

use iceberg_store::ContentError;

use crate::messages::SyncErrorCode;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network-level failure: the frame could not be delivered or received.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The peer sent something malformed or out of contract.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Timeout waiting for the peer.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Protocol version mismatch with peer.
    #[error("protocol version mismatch: local={local}, peer={peer}")]
    VersionMismatch { local: u8, peer: u8 },

    /// Peer sent an error message.
    #[error("peer error ({code:?}): {message}")]
    PeerError { code: SyncErrorCode, message: String },

    /// Applying content locally failed.
    #[error("content error: {0}")]
    Content(#[from] ContentError),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// No transport session exists.
    #[error("not connected: {0}")]
    NotConnected(String),
}

impl SyncError {
    /// Worth another attempt after a backoff delay.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::TransportFailure(_) | SyncError::Timeout(_) => true,
            SyncError::PeerError { code, .. } => matches!(
                code,
                SyncErrorCode::RateLimited | SyncErrorCode::InternalError | SyncErrorCode::Unknown
            ),
            _ => false,
        }
    }

    /// The local store failed; the node cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Content(e) if e.is_fatal())
    }
}

impl From<ciborium::de::Error<std::io::Error>> for SyncError {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        SyncError::ProtocolViolation(format!("undecodable frame: {e}"))
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;
    use iceberg_store::StoreError;

    #[test]
    fn test_classification() {
        assert!(SyncError::Timeout("batch".into()).is_retryable());
        assert!(SyncError::TransportFailure("gone".into()).is_retryable());
        assert!(!SyncError::ProtocolViolation("bad".into()).is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());

        let fatal = SyncError::Content(ContentError::Store(StoreError::Corrupted("x".into())));
        assert!(fatal.is_fatal());
        assert!(!fatal.is_retryable());
        assert!(!SyncError::Timeout("batch".into()).is_fatal());
    }
}
