//! Proptest generators for property-based testing.

use proptest::prelude::*;

use iceberg_core::{Cid, Direction, Keypair, Post, PostBuilder, Region, Vote};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random Cid.
pub fn cid() -> impl Strategy<Value = Cid> {
    any::<[u8; 32]>().prop_map(Cid::from_bytes)
}

/// Generate a reasonable timestamp.
pub fn timestamp() -> impl Strategy<Value = i64> {
    0i64..=1_900_000_000_000i64
}

pub fn direction() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Up), Just(Direction::Down)]
}

/// Generate a valid region code of one to three segments.
pub fn region() -> impl Strategy<Value = Region> {
    prop::collection::vec("[A-Z][A-Z0-9_]{0,7}", 1..=3).prop_map(|segments| {
        Region::new(segments.join("-")).unwrap_or_else(|e| panic!("generated region: {e}"))
    })
}

/// Parameters for generating a post.
#[derive(Debug, Clone)]
pub struct PostParams {
    pub keypair: Keypair,
    pub title: String,
    pub body: String,
    pub region: Region,
    pub created_at: i64,
}

impl Arbitrary for PostParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            any::<[u8; 32]>(),
            "[A-Za-z0-9][ -~]{0,79}",
            "[A-Za-z0-9][ -~]{0,399}",
            region(),
            timestamp(),
        )
            .prop_map(|(seed, title, body, region, created_at)| PostParams {
                keypair: Keypair::from_seed(&seed),
                title,
                body,
                region,
                created_at,
            })
            .boxed()
    }
}

/// Generate a post from parameters.
pub fn post_from_params(params: &PostParams) -> Post {
    PostBuilder::new(params.keypair.identity(), params.region.clone())
        .title(params.title.clone())
        .body(params.body.clone())
        .created_at(params.created_at)
        .sign(&params.keypair)
}

/// A signed vote on `target` by a random voter.
pub fn vote_on(target: Cid) -> impl Strategy<Value = Vote> {
    (keypair(), direction(), region(), timestamp()).prop_map(move |(kp, dir, region, ts)| {
        Vote::sign(&kp, target, dir, region, ts)
    })
}
