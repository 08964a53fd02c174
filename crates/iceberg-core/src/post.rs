//! Posts: immutable signed payloads plus locally derived state.
//!
//! The payload never changes after creation. Everything that evolves as
//! votes and reports arrive lives in [`PostState`].

use serde::{Deserialize, Serialize};

use crate::canonical::{domain_message, post_payload_bytes, CID_DOMAIN, POST_SIGN_DOMAIN};
use crate::crypto::{Blake3Hash, Identity, Keypair, Signature};
use crate::error::CoreError;
use crate::region::Region;
use crate::types::Cid;

/// Trust level of a post.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum Level {
    /// Freshly published, visible locally.
    #[default]
    Wild = 0,
    /// Validated by voters inside the post's region.
    Regional = 1,
    /// Validated network-wide.
    Surface = 2,
    /// Permanent: cannot be demoted or deleted.
    Legacy = 3,
}

impl Level {
    /// Convert to u8 for storage.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Try to parse from u8.
    pub fn from_u8(value: u8) -> Result<Self, CoreError> {
        match value {
            0 => Ok(Self::Wild),
            1 => Ok(Self::Regional),
            2 => Ok(Self::Surface),
            3 => Ok(Self::Legacy),
            other => Err(CoreError::InvalidLevel(other)),
        }
    }

    /// The next level up, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Wild => Some(Self::Regional),
            Self::Regional => Some(Self::Surface),
            Self::Surface => Some(Self::Legacy),
            Self::Legacy => None,
        }
    }

    /// One step down, saturating at Wild.
    pub fn demoted(self) -> Self {
        match self {
            Self::Wild | Self::Regional => Self::Wild,
            Self::Surface => Self::Regional,
            Self::Legacy => Self::Surface,
        }
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Wild => "wild",
            Self::Regional => "regional",
            Self::Surface => "surface",
            Self::Legacy => "legacy",
        }
    }
}

/// The immutable part of a post. Its canonical encoding defines the CID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostPayload {
    /// The author's identity.
    pub author: Identity,
    /// Short headline.
    pub title: String,
    /// Full text.
    pub body: String,
    /// Region the post is about.
    pub region: Region,
    /// Author-claimed creation time (Unix milliseconds).
    pub created_at: i64,
}

impl PostPayload {
    /// Compute the content identifier of this payload.
    pub fn cid(&self) -> Cid {
        let canonical = post_payload_bytes(self);
        Cid(Blake3Hash::hash_domain(CID_DOMAIN, &[&canonical]).0)
    }

    /// The message the author signs.
    pub fn signing_message(&self) -> Vec<u8> {
        domain_message(POST_SIGN_DOMAIN, &post_payload_bytes(self))
    }
}

/// A post as it travels between nodes: payload, declared CID, signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub payload: PostPayload,
    /// CID as declared by the sender. Checked against the payload on ingest.
    pub cid: Cid,
    pub signature: Signature,
}

impl Post {
    /// Sign a payload, filling in its CID.
    pub fn sign(payload: PostPayload, keypair: &Keypair) -> Self {
        let signature = keypair.sign(&payload.signing_message());
        let cid = payload.cid();
        Self {
            payload,
            cid,
            signature,
        }
    }

    /// Recompute the CID from the payload.
    pub fn compute_cid(&self) -> Cid {
        self.payload.cid()
    }

    pub fn author(&self) -> &Identity {
        &self.payload.author
    }

    pub fn region(&self) -> &Region {
        &self.payload.region
    }

    pub fn created_at(&self) -> i64 {
        self.payload.created_at
    }
}

/// Builder for locally authored posts.
pub struct PostBuilder {
    author: Identity,
    region: Region,
    title: String,
    body: String,
    created_at: i64,
}

impl PostBuilder {
    /// Start building a post.
    pub fn new(author: Identity, region: Region) -> Self {
        Self {
            author,
            region,
            title: String::new(),
            body: String::new(),
            created_at: 0,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn created_at(mut self, ts: i64) -> Self {
        self.created_at = ts;
        self
    }

    /// Build and sign the post.
    pub fn sign(self, keypair: &Keypair) -> Post {
        let payload = PostPayload {
            author: self.author,
            title: self.title,
            body: self.body,
            region: self.region,
            created_at: self.created_at,
        };
        Post::sign(payload, keypair)
    }
}

/// Mutable, locally derived state of a post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostState {
    /// Effective level after report demotion.
    pub level: Level,
    /// Highest level ever earned. Never decreases.
    pub peak_level: Level,
    /// Network-wide upvotes.
    pub up: u32,
    /// Network-wide downvotes.
    pub down: u32,
    /// Upvotes cast from within the post's region.
    pub regional_up: u32,
    /// Downvotes cast from within the post's region.
    pub regional_down: u32,
    /// Effective reports.
    pub reports: u32,
    /// Tombstone flag. A deleted post is never resurrected by re-delivery.
    pub deleted: bool,
    /// Local time of the last change (Unix ms).
    pub updated_at: i64,
}

impl PostState {
    /// Network-wide net score.
    pub fn score(&self) -> i64 {
        i64::from(self.up) - i64::from(self.down)
    }

    /// Net score among voters inside the post's region.
    pub fn regional_score(&self) -> i64 {
        i64::from(self.regional_up) - i64::from(self.regional_down)
    }
}

/// A post together with its derived state, as held by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPost {
    pub post: Post,
    pub state: PostState,
}

impl StoredPost {
    pub fn cid(&self) -> Cid {
        self.post.cid
    }

    pub fn level(&self) -> Level {
        self.state.level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(keypair: &Keypair) -> Post {
        PostBuilder::new(keypair.identity(), Region::new("BR-SP").unwrap())
            .title("Falta de luz")
            .body("Bairro inteiro sem energia desde ontem.")
            .created_at(1_736_870_400_000)
            .sign(keypair)
    }

    #[test]
    fn test_builder_fills_cid() {
        let kp = Keypair::from_seed(&[0x42; 32]);
        let post = sample(&kp);
        assert_eq!(post.cid, post.compute_cid());
    }

    #[test]
    fn test_identical_payloads_collide() {
        let kp = Keypair::from_seed(&[0x42; 32]);
        assert_eq!(sample(&kp).cid, sample(&kp).cid);
    }

    #[test]
    fn test_cid_excludes_signature() {
        let kp = Keypair::from_seed(&[0x42; 32]);
        let mut post = sample(&kp);
        let cid = post.cid;
        post.signature = Signature::ZERO;
        assert_eq!(post.compute_cid(), cid);
    }

    #[test]
    fn test_level_ladder() {
        assert_eq!(Level::Wild.next(), Some(Level::Regional));
        assert_eq!(Level::Legacy.next(), None);
        assert_eq!(Level::Wild.demoted(), Level::Wild);
        assert_eq!(Level::Surface.demoted(), Level::Regional);
        assert!(Level::Wild < Level::Legacy);
        for raw in 0..=3u8 {
            assert_eq!(Level::from_u8(raw).unwrap().to_u8(), raw);
        }
        assert!(Level::from_u8(4).is_err());
    }

    #[test]
    fn test_scores() {
        let state = PostState {
            up: 3,
            down: 5,
            regional_up: 2,
            ..Default::default()
        };
        assert_eq!(state.score(), -2);
        assert_eq!(state.regional_score(), 2);
    }
}
