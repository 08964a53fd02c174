//! Error types for the Iceberg core primitives.

use thiserror::Error;

use crate::types::Cid;

/// Errors raised while constructing or verifying primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid region code {0:?}")]
    InvalidRegion(String),

    #[error("invalid level: {0}")]
    InvalidLevel(u8),

    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Validation errors for posts, votes and reports received from anyone.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The declared CID does not match the hash of the payload.
    #[error("CID mismatch: declared {declared}, computed {computed}")]
    CidMismatch { declared: Cid, computed: Cid },

    #[error("signature verification failed")]
    SignatureFailed,

    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("{field} exceeds {max} bytes (got {len})")]
    FieldTooLong {
        field: &'static str,
        max: usize,
        len: usize,
    },

    #[error("timestamp {0} is out of range")]
    TimestampOutOfRange(i64),

    #[error("timestamp {timestamp} is past the acceptance horizon {horizon}")]
    TimestampInFuture { timestamp: i64, horizon: i64 },

    #[error("structural error: {0}")]
    StructuralError(String),
}

impl From<CoreError> for ValidationError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidSignature | CoreError::InvalidPublicKey => {
                ValidationError::SignatureFailed
            }
            other => ValidationError::StructuralError(other.to_string()),
        }
    }
}
