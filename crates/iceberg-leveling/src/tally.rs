//! Vote and report tallies.
//!
//! A tally is computed from the full set of records known for a post, not
//! from a stream of events, so the result does not depend on arrival order.

use std::collections::HashMap;

use iceberg_core::{Attested, Direction, PairKey, Post, Report, Vote};

/// Effective counts for one post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub up: u32,
    pub down: u32,
    /// Votes cast by voters whose region lies within the post's region.
    pub regional_up: u32,
    pub regional_down: u32,
    pub reports: u32,
}

impl Tally {
    /// Tally the effective records for `post`.
    ///
    /// Records targeting other posts are ignored. When an actor has more
    /// than one record for the post, only the last-writer-wins record counts.
    pub fn from_records(post: &Post, votes: &[Vote], reports: &[Report]) -> Self {
        let mut tally = Tally::default();

        for vote in effective(post, votes) {
            let regional = vote.region.is_within(post.region());
            match vote.direction {
                Direction::Up => {
                    tally.up += 1;
                    if regional {
                        tally.regional_up += 1;
                    }
                }
                Direction::Down => {
                    tally.down += 1;
                    if regional {
                        tally.regional_down += 1;
                    }
                }
            }
        }

        tally.reports = effective(post, reports).count() as u32;
        tally
    }

    /// Net network-wide score.
    pub fn score(&self) -> i64 {
        i64::from(self.up) - i64::from(self.down)
    }

    /// Net score within the post's region.
    pub fn regional_score(&self) -> i64 {
        i64::from(self.regional_up) - i64::from(self.regional_down)
    }

    pub fn votes(&self) -> u32 {
        self.up + self.down
    }

    pub fn regional_votes(&self) -> u32 {
        self.regional_up + self.regional_down
    }
}

/// The winning record per actor for the given post.
fn effective<'a, T: Attested>(post: &Post, records: &'a [T]) -> impl Iterator<Item = &'a T> {
    let mut winners: HashMap<PairKey, &'a T> = HashMap::new();
    for record in records.iter().filter(|r| r.target() == &post.cid) {
        winners
            .entry(record.pair_key())
            .and_modify(|current| {
                if record.supersedes(*current) {
                    *current = record;
                }
            })
            .or_insert(record);
    }
    winners.into_values()
}

#[cfg(test)]
mod tests {
    use super::*;
    use iceberg_core::{Cid, Keypair, PostBuilder, Region};

    fn region(code: &str) -> Region {
        Region::new(code).unwrap()
    }

    fn post() -> Post {
        let author = Keypair::from_seed(&[7; 32]);
        PostBuilder::new(author.identity(), region("BR-SP"))
            .title("Feira livre")
            .body("Domingo na praça.")
            .created_at(1_000)
            .sign(&author)
    }

    #[test]
    fn test_regional_split() {
        let post = post();
        let local = Keypair::from_seed(&[1; 32]);
        let city = Keypair::from_seed(&[2; 32]);
        let remote = Keypair::from_seed(&[3; 32]);
        let votes = vec![
            Vote::sign(&local, post.cid, Direction::Up, region("BR-SP"), 10),
            Vote::sign(&city, post.cid, Direction::Up, region("BR-SP-CAMPINAS"), 11),
            Vote::sign(&remote, post.cid, Direction::Down, region("BR-RJ"), 12),
        ];

        let tally = Tally::from_records(&post, &votes, &[]);
        assert_eq!(tally.score(), 1);
        assert_eq!(tally.votes(), 3);
        assert_eq!(tally.regional_score(), 2);
        assert_eq!(tally.regional_votes(), 2);
    }

    #[test]
    fn test_last_writer_wins_per_voter() {
        let post = post();
        let voter = Keypair::from_seed(&[1; 32]);
        let first = Vote::sign(&voter, post.cid, Direction::Up, region("BR-SP"), 10);
        let second = Vote::sign(&voter, post.cid, Direction::Down, region("BR-SP"), 20);

        for votes in [
            vec![first.clone(), second.clone()],
            vec![second.clone(), first.clone()],
        ] {
            let tally = Tally::from_records(&post, &votes, &[]);
            assert_eq!((tally.up, tally.down), (0, 1));
        }
    }

    #[test]
    fn test_duplicates_and_foreign_targets_ignored() {
        let post = post();
        let voter = Keypair::from_seed(&[1; 32]);
        let vote = Vote::sign(&voter, post.cid, Direction::Up, region("BR"), 10);
        let elsewhere = Vote::sign(&voter, Cid::from_bytes([0; 32]), Direction::Up, region("BR"), 10);
        let report = Report::sign(&voter, post.cid, "off-topic", 11);

        let tally = Tally::from_records(
            &post,
            &[vote.clone(), vote, elsewhere],
            &[report.clone(), report],
        );
        assert_eq!(tally.up, 1);
        assert_eq!(tally.reports, 1);
        // A vote from the parent region is not regional.
        assert_eq!(tally.regional_up, 0);
    }
}
