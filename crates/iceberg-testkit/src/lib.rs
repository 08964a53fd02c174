//! # Iceberg Testkit
//!
//! Testing utilities for the Iceberg node.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Fixed posts whose CIDs must never change
//! - **Generators**: Proptest strategies for posts, votes and regions
//! - **Fixtures**: Helpers for seeding a content store
//!
//! ## Golden Vectors
//!
//! ```rust
//! use iceberg_testkit::vectors::{all_vectors, post_from_vector};
//!
//! for vector in all_vectors() {
//!     let post = post_from_vector(&vector);
//!     println!("{}: {}", vector.name, post.cid.to_hex());
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use iceberg_testkit::generators::{post_from_params, PostParams};
//!
//! proptest! {
//!     #[test]
//!     fn cid_is_deterministic(params: PostParams) {
//!         prop_assert_eq!(post_from_params(&params).cid, post_from_params(&params).cid);
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use iceberg_testkit::fixtures::TestFixture;
//!
//! let fixture = TestFixture::new();
//! let post = fixture.make_post("BR-SP", "Title", 1_000);
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{voters, TestFixture};
pub use generators::{post_from_params, PostParams};
pub use vectors::{all_vectors, post_from_vector, verify_all_vectors, GoldenVector};
