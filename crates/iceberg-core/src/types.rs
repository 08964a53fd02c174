//! Strong identifier types.
//!
//! All identifiers are 32-byte newtypes so a CID can never be passed where a
//! peer id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id32 {
    ($(#[$meta:meta])* $name:ident, $debug:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(#[serde(with = "crate::serde_bytes")] pub [u8; 32]);

        impl $name {
            /// Create from raw bytes.
            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// Get the raw bytes.
            pub const fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Convert to hex string.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse from hex string.
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let bytes = hex::decode(s)?;
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| hex::FromHexError::InvalidStringLength)?;
                Ok(Self(arr))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($debug, "({})"), &self.to_hex()[..16])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", &self.to_hex()[..16])
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = std::array::TryFromSliceError;

            fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
                let arr: [u8; 32] = slice.try_into()?;
                Ok(Self(arr))
            }
        }
    };
}

id32!(
    /// Content identifier of a post: Blake3(domain || canonical payload).
    ///
    /// Two posts with byte-identical payloads share a CID, which is what makes
    /// ingestion idempotent.
    Cid,
    "Cid"
);

id32!(
    /// Identifier of a node on the peer network.
    PeerId,
    "PeerId"
);

id32!(
    /// Uniqueness key of a vote or report: one effective record per
    /// (actor, target) pair.
    PairKey,
    "PairKey"
);

impl PeerId {
    /// Generate a random peer id.
    pub fn random() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cid_hex_roundtrip() {
        let cid = Cid::from_bytes([0x42; 32]);
        let recovered = Cid::from_hex(&cid.to_hex()).unwrap();
        assert_eq!(cid, recovered);
    }

    #[test]
    fn test_cid_display_is_short_hex() {
        let cid = Cid::from_bytes([0xab; 32]);
        assert_eq!(format!("{}", cid), "abababababababab");
        assert!(format!("{:?}", cid).starts_with("Cid("));
    }

    #[test]
    fn test_from_hex_rejects_wrong_length() {
        assert!(PeerId::from_hex("abcd").is_err());
    }

    #[test]
    fn test_json_uses_hex() {
        let peer = PeerId::from_bytes([0x01; 32]);
        let json = serde_json::to_string(&peer).unwrap();
        assert_eq!(json, format!("\"{}\"", "01".repeat(32)));
        let back: PeerId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, peer);
    }

    #[test]
    fn test_cbor_uses_byte_string() {
        let cid = Cid::from_bytes([0x07; 32]);
        let mut buf = Vec::new();
        ciborium::into_writer(&cid, &mut buf).unwrap();
        // major type 2, one-byte length 32, then the raw bytes
        assert_eq!(&buf[..2], &[0x58, 32]);
        let back: Cid = ciborium::from_reader(buf.as_slice()).unwrap();
        assert_eq!(back, cid);
    }

    #[test]
    fn test_random_peer_ids_differ() {
        assert_ne!(PeerId::random(), PeerId::random());
    }
}
