//! Votes and reports: signed, per-(actor, target) records resolved
//! last-writer-wins.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::canonical::{
    domain_message, report_body_bytes, vote_body_bytes, REPORT_KEY_DOMAIN, REPORT_SIGN_DOMAIN,
    VOTE_KEY_DOMAIN, VOTE_SIGN_DOMAIN,
};
use crate::crypto::{Blake3Hash, Identity, Keypair, Signature};
use crate::region::Region;
use crate::types::{Cid, PairKey};

/// Direction of a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Signed unit value (+1 / -1) used in the canonical encoding.
    pub fn as_i8(self) -> i8 {
        match self {
            Direction::Up => 1,
            Direction::Down => -1,
        }
    }

    pub fn from_i8(value: i8) -> Option<Self> {
        match value {
            1 => Some(Direction::Up),
            -1 => Some(Direction::Down),
            _ => None,
        }
    }
}

/// A signed vote on a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub voter: Identity,
    pub target: Cid,
    pub direction: Direction,
    /// The voter's own region. Drives the regional tally.
    pub region: Region,
    pub timestamp: i64,
    pub signature: Signature,
}

impl Vote {
    /// Create and sign a vote.
    pub fn sign(
        keypair: &Keypair,
        target: Cid,
        direction: Direction,
        region: Region,
        timestamp: i64,
    ) -> Self {
        let mut vote = Self {
            voter: keypair.identity(),
            target,
            direction,
            region,
            timestamp,
            signature: Signature::ZERO,
        };
        vote.signature = keypair.sign(&vote.signing_message());
        vote
    }

    /// The message the voter signs.
    pub fn signing_message(&self) -> Vec<u8> {
        domain_message(VOTE_SIGN_DOMAIN, &vote_body_bytes(self))
    }
}

/// A signed abuse report against a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub reporter: Identity,
    pub target: Cid,
    pub reason: String,
    pub timestamp: i64,
    pub signature: Signature,
}

impl Report {
    /// Create and sign a report.
    pub fn sign(keypair: &Keypair, target: Cid, reason: impl Into<String>, timestamp: i64) -> Self {
        let mut report = Self {
            reporter: keypair.identity(),
            target,
            reason: reason.into(),
            timestamp,
            signature: Signature::ZERO,
        };
        report.signature = keypair.sign(&report.signing_message());
        report
    }

    /// The message the reporter signs.
    pub fn signing_message(&self) -> Vec<u8> {
        domain_message(REPORT_SIGN_DOMAIN, &report_body_bytes(self))
    }
}

/// Common view of records that are unique per (actor, target) pair.
pub trait Attested {
    /// Who cast the record.
    fn actor(&self) -> &Identity;
    /// The post the record is about.
    fn target(&self) -> &Cid;
    /// Author-claimed time (Unix ms).
    fn timestamp(&self) -> i64;
    /// Digest of the signed body, used to break timestamp ties.
    fn digest(&self) -> Blake3Hash;
    /// Key shared by every record from the same actor on the same target.
    fn pair_key(&self) -> PairKey;

    /// Last-writer-wins ordering: later timestamp wins, equal timestamps are
    /// decided by the larger digest so every node picks the same winner.
    fn lww_cmp(&self, other: &Self) -> Ordering
    where
        Self: Sized,
    {
        self.timestamp()
            .cmp(&other.timestamp())
            .then_with(|| self.digest().cmp(&other.digest()))
    }

    /// True if `self` replaces `other` as the effective record.
    fn supersedes(&self, other: &Self) -> bool
    where
        Self: Sized,
    {
        self.lww_cmp(other) == Ordering::Greater
    }
}

impl Attested for Vote {
    fn actor(&self) -> &Identity {
        &self.voter
    }

    fn target(&self) -> &Cid {
        &self.target
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn digest(&self) -> Blake3Hash {
        Blake3Hash::hash(&vote_body_bytes(self))
    }

    fn pair_key(&self) -> PairKey {
        PairKey(Blake3Hash::hash_domain(VOTE_KEY_DOMAIN, &[&self.voter.0, &self.target.0]).0)
    }
}

impl Attested for Report {
    fn actor(&self) -> &Identity {
        &self.reporter
    }

    fn target(&self) -> &Cid {
        &self.target
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn digest(&self) -> Blake3Hash {
        Blake3Hash::hash(&report_body_bytes(self))
    }

    fn pair_key(&self) -> PairKey {
        PairKey(
            Blake3Hash::hash_domain(REPORT_KEY_DOMAIN, &[&self.reporter.0, &self.target.0]).0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> Region {
        Region::new("BR-SP").unwrap()
    }

    #[test]
    fn test_pair_key_ignores_direction_and_time() {
        let kp = Keypair::from_seed(&[1; 32]);
        let target = Cid::from_bytes([9; 32]);
        let a = Vote::sign(&kp, target, Direction::Up, region(), 1);
        let b = Vote::sign(&kp, target, Direction::Down, region(), 2);
        assert_eq!(a.pair_key(), b.pair_key());
    }

    #[test]
    fn test_vote_and_report_keys_differ() {
        let kp = Keypair::from_seed(&[1; 32]);
        let target = Cid::from_bytes([9; 32]);
        let vote = Vote::sign(&kp, target, Direction::Up, region(), 1);
        let report = Report::sign(&kp, target, "spam", 1);
        assert_ne!(vote.pair_key(), report.pair_key());
    }

    #[test]
    fn test_later_vote_supersedes() {
        let kp = Keypair::from_seed(&[1; 32]);
        let target = Cid::from_bytes([9; 32]);
        let early = Vote::sign(&kp, target, Direction::Up, region(), 100);
        let late = Vote::sign(&kp, target, Direction::Down, region(), 200);
        assert!(late.supersedes(&early));
        assert!(!early.supersedes(&late));
    }

    #[test]
    fn test_timestamp_tie_is_decided_by_digest() {
        let kp = Keypair::from_seed(&[1; 32]);
        let target = Cid::from_bytes([9; 32]);
        let up = Vote::sign(&kp, target, Direction::Up, region(), 100);
        let down = Vote::sign(&kp, target, Direction::Down, region(), 100);
        // Exactly one of them wins, regardless of which is compared first.
        assert_ne!(up.supersedes(&down), down.supersedes(&up));
    }

    #[test]
    fn test_identical_vote_does_not_supersede_itself() {
        let kp = Keypair::from_seed(&[1; 32]);
        let vote = Vote::sign(&kp, Cid::from_bytes([9; 32]), Direction::Up, region(), 100);
        assert!(!vote.supersedes(&vote.clone()));
    }

    #[test]
    fn test_signatures_verify() {
        let kp = Keypair::from_seed(&[1; 32]);
        let vote = Vote::sign(&kp, Cid::from_bytes([9; 32]), Direction::Up, region(), 100);
        kp.identity()
            .verify(&vote.signing_message(), &vote.signature)
            .unwrap();
        let report = Report::sign(&kp, Cid::from_bytes([9; 32]), "fake news", 100);
        kp.identity()
            .verify(&report.signing_message(), &report.signature)
            .unwrap();
    }

    #[test]
    fn test_direction_roundtrip() {
        assert_eq!(Direction::from_i8(Direction::Up.as_i8()), Some(Direction::Up));
        assert_eq!(Direction::from_i8(Direction::Down.as_i8()), Some(Direction::Down));
        assert_eq!(Direction::from_i8(0), None);
    }
}
