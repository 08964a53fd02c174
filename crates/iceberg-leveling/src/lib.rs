//! # Iceberg Leveling
//!
//! Decides the trust level of a post from the votes and reports known for it.
//!
//! ## Overview
//!
//! Levels are never stored as an event log. Every recomputation starts from
//! the complete set of effective records, so two nodes holding the same
//! records reach the same level no matter in which order the records
//! arrived.
//!
//! ## Key Concepts
//!
//! - **Wild → Regional**: net score among voters inside the post's region
//! - **Regional → Surface**: net score across the whole network
//! - **Surface → Legacy**: network score plus a minimum age, with no report pressure
//! - **Demotion**: enough reports push a non-Legacy post one step below its peak
//!
//! Legacy posts cannot be demoted or deleted.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use iceberg_leveling::{ConsensusRules, LevelingEngine};
//!
//! let rules = ConsensusRules::from_json(r#"{ "spam": { "reportThreshold": 3 } }"#).unwrap();
//! let engine = LevelingEngine::new(rules).unwrap();
//! // let decision = engine.recompute(&post, &state, &votes, &reports, now);
//! ```

pub mod engine;
pub mod error;
pub mod rules;
pub mod tally;

pub use engine::{can_delete, progress, recompute, LevelDecision, LevelingEngine, NextLevel, Progress};
pub use error::{LevelingError, Result};
pub use rules::{ConsensusRules, LevelRules, PromotionRules, SpamRules, Threshold};
pub use tally::Tally;
