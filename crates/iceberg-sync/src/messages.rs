//! Sync protocol message types and their wire codec.
//!
//! Every frame on the wire is one CBOR-encoded [`SyncMessage`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use iceberg_core::{PeerId, Region, SyncCursor, SyncItem};

use crate::error::{Result, SyncError};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Correlates a [`SyncMessage::SyncBatch`] with the request it answers.
pub type RequestId = u64;

/// Message size limits.
pub mod limits {
    /// Max regions advertised in Hello.
    pub const MAX_REGIONS: usize = 64;
    /// Max items in one SyncBatch, and the ceiling for SyncRequest.limit.
    pub const MAX_BATCH_ITEMS: usize = 500;
    /// Max bytes in an Error message.
    pub const MAX_ERROR_MESSAGE: usize = 1024;
    /// Max encoded frame size.
    pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;
}

/// Sync protocol messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncMessage {
    /// Introduce yourself and the regions you carry.
    Hello {
        /// This node's identity.
        peer_id: PeerId,
        /// Protocol version for compatibility checking.
        protocol_version: u8,
        /// Regions of interest. Empty means everything.
        regions: Vec<Region>,
        /// Whether the receiver should answer with its own Hello.
        reply: bool,
    },

    /// Ask for items of a region strictly after a cursor.
    SyncRequest {
        request_id: RequestId,
        region: Region,
        after: SyncCursor,
        limit: u32,
    },

    /// Items in ascending cursor order.
    SyncBatch {
        request_id: RequestId,
        items: Vec<SyncItem>,
        /// More items exist past the last one.
        has_more: bool,
    },

    /// Error condition, optionally tied to a request.
    Error {
        request_id: Option<RequestId>,
        /// Error code for programmatic handling.
        code: SyncErrorCode,
        /// Human-readable description.
        message: String,
    },
}

impl SyncMessage {
    /// Check if this message respects size limits.
    pub fn validate_limits(&self) -> std::result::Result<(), &'static str> {
        match self {
            SyncMessage::Hello { regions, .. } => {
                if regions.len() > limits::MAX_REGIONS {
                    return Err("too many regions");
                }
            }
            SyncMessage::SyncRequest { limit, .. } => {
                if *limit == 0 {
                    return Err("zero limit");
                }
            }
            SyncMessage::SyncBatch { items, .. } => {
                if items.len() > limits::MAX_BATCH_ITEMS {
                    return Err("too many items");
                }
            }
            SyncMessage::Error { message, .. } => {
                if message.len() > limits::MAX_ERROR_MESSAGE {
                    return Err("error message too long");
                }
            }
        }
        Ok(())
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::Hello { .. } => "hello",
            SyncMessage::SyncRequest { .. } => "sync_request",
            SyncMessage::SyncBatch { .. } => "sync_batch",
            SyncMessage::Error { .. } => "error",
        }
    }

    /// Build an error reply, truncating the description to fit.
    pub fn error(request_id: Option<RequestId>, code: SyncErrorCode, message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.len() > limits::MAX_ERROR_MESSAGE {
            let mut end = limits::MAX_ERROR_MESSAGE;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            message.truncate(end);
        }
        SyncMessage::Error {
            request_id,
            code,
            message,
        }
    }

    /// Encode into a wire frame.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| SyncError::ProtocolViolation(format!("unencodable message: {e}")))?;
        if buf.len() > limits::MAX_FRAME_BYTES {
            return Err(SyncError::ProtocolViolation(format!(
                "frame of {} bytes exceeds {}",
                buf.len(),
                limits::MAX_FRAME_BYTES
            )));
        }
        Ok(Bytes::from(buf))
    }

    /// Decode a wire frame, enforcing size limits.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        if frame.len() > limits::MAX_FRAME_BYTES {
            return Err(SyncError::ProtocolViolation(format!(
                "frame of {} bytes exceeds {}",
                frame.len(),
                limits::MAX_FRAME_BYTES
            )));
        }
        let message: SyncMessage = ciborium::from_reader(frame)?;
        message
            .validate_limits()
            .map_err(|e| SyncError::ProtocolViolation(e.into()))?;
        Ok(message)
    }
}

/// Error codes for sync protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum SyncErrorCode {
    /// Unknown/unspecified error.
    Unknown = 0,
    /// Protocol version mismatch.
    VersionMismatch = 1,
    /// Message too large.
    MessageTooLarge = 2,
    /// Invalid message format.
    InvalidMessage = 3,
    /// Rate limited.
    RateLimited = 4,
    /// Internal error on peer.
    InternalError = 6,
}

#[cfg(test)]
mod tests {
    use super::*;
    use iceberg_core::{Keypair, PostBuilder};

    fn hello(regions: Vec<Region>) -> SyncMessage {
        SyncMessage::Hello {
            peer_id: PeerId::from_bytes([0xAA; 32]),
            protocol_version: PROTOCOL_VERSION,
            regions,
            reply: true,
        }
    }

    #[test]
    fn test_message_limits_valid() {
        assert!(hello(vec![]).validate_limits().is_ok());
    }

    #[test]
    fn test_message_limits_exceeded() {
        let region = Region::new("BR").unwrap();
        assert!(hello(vec![region; 65]).validate_limits().is_err());

        let zero = SyncMessage::SyncRequest {
            request_id: 1,
            region: Region::new("BR").unwrap(),
            after: SyncCursor::ORIGIN,
            limit: 0,
        };
        assert!(zero.validate_limits().is_err());
    }

    #[test]
    fn test_batch_survives_the_wire() {
        let keypair = Keypair::from_seed(&[7; 32]);
        let post = PostBuilder::new(keypair.identity(), Region::new("BR-SP").unwrap())
            .title("hello")
            .body("world")
            .created_at(1_000)
            .sign(&keypair);
        let msg = SyncMessage::SyncBatch {
            request_id: 9,
            items: vec![SyncItem::Post(post)],
            has_more: false,
        };

        let frame = msg.encode().unwrap();
        assert_eq!(SyncMessage::decode(&frame).unwrap(), msg);
    }

    #[test]
    fn test_garbage_frame_is_protocol_violation() {
        let err = SyncMessage::decode(&[0xff, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, SyncError::ProtocolViolation(_)));
    }

    #[test]
    fn test_error_message_truncated() {
        let msg = SyncMessage::error(None, SyncErrorCode::Unknown, "é".repeat(1000));
        assert!(msg.validate_limits().is_ok());
    }

    proptest::proptest! {
        #[test]
        fn prop_decode_never_panics(frame in proptest::collection::vec(proptest::num::u8::ANY, 0..512)) {
            let _ = SyncMessage::decode(&frame);
        }
    }
}
