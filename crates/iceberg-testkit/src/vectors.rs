//! Golden test vectors for deterministic verification.
//!
//! A post's CID is its identity on the network. These vectors pin the
//! canonical encoding so that any change to it shows up as a test failure
//! rather than as a silent network split.

use iceberg_core::{Keypair, Post, PostBuilder, Region};

/// A golden test vector.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// Seed for deterministic key generation.
    pub seed: [u8; 32],
    pub title: &'static str,
    pub body: &'static str,
    pub region: &'static str,
    /// Creation time (Unix milliseconds).
    pub created_at: i64,
    /// Expected CID (hex). Empty until pinned from a reference build.
    pub expected_cid: &'static str,
}

/// Get all golden test vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "Country-level post",
            seed: [0x42; 32],
            title: "Hello Brazil",
            body: "First post on the network",
            region: "BR",
            created_at: 1_736_870_400_000, // 2025-01-14T16:00:00Z
            expected_cid: "",
        },
        GoldenVector {
            name: "City-level post",
            seed: [0x42; 32],
            title: "Ponte quebrada",
            body: "A ponte da marginal caiu de novo",
            region: "BR-SP-SAO_PAULO",
            created_at: 1_736_870_401_000,
            expected_cid: "",
        },
        GoldenVector {
            name: "Epoch post with unicode body",
            seed: [0x00; 32],
            title: "t",
            body: "água, café e pão",
            region: "PT",
            created_at: 0,
            expected_cid: "",
        },
    ]
}

/// Build and sign the post described by a vector.
///
/// # Panics
///
/// If the vector's region is invalid.
pub fn post_from_vector(vector: &GoldenVector) -> Post {
    let keypair = Keypair::from_seed(&vector.seed);
    let region = Region::new(vector.region)
        .unwrap_or_else(|e| panic!("vector {:?}: {e}", vector.name));

    PostBuilder::new(keypair.identity(), region)
        .title(vector.title)
        .body(vector.body)
        .created_at(vector.created_at)
        .sign(&keypair)
}

/// Check every vector: `(name, matches, computed cid hex)`.
///
/// Vectors with no pinned CID always match and report what was computed.
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    all_vectors()
        .iter()
        .map(|v| {
            let hex = post_from_vector(v).cid.to_hex();
            let matches = v.expected_cid.is_empty() || hex == v.expected_cid;
            (v.name.to_string(), matches, hex)
        })
        .collect()
}
