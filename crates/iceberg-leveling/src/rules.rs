//! Consensus rules: promotion thresholds, report threshold and spam limits.
//!
//! The JSON layout matches `consensus_rules.json`:
//!
//! ```json
//! {
//!   "levels": {
//!     "promotion": {
//!       "wildToRegional":    { "minScore": 5,   "minVotes": 3 },
//!       "regionalToSurface": { "minScore": 20,  "minVotes": 10 },
//!       "surfaceToLegacy":   { "minScore": 100, "minVotes": 50, "minAgeHours": 168 }
//!     }
//!   },
//!   "spam": { "minIntervalSeconds": 60, "maxPostsPerHour": 10, "reportThreshold": 5 }
//! }
//! ```
//!
//! Every field is optional; missing fields take the defaults above. Unknown
//! sections are ignored.

use serde::{Deserialize, Serialize};

use iceberg_core::Level;

use crate::error::{LevelingError, Result};

const HOUR_MS: i64 = 60 * 60 * 1000;

/// Requirements for one promotion step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Threshold {
    /// Minimum net score (up - down), inclusive.
    pub min_score: i64,
    /// Minimum number of effective votes, inclusive.
    pub min_votes: u32,
    /// Minimum post age in hours, inclusive.
    #[serde(default)]
    pub min_age_hours: u64,
}

impl Threshold {
    pub const fn new(min_score: i64, min_votes: u32, min_age_hours: u64) -> Self {
        Self {
            min_score,
            min_votes,
            min_age_hours,
        }
    }

    pub fn min_age_ms(&self) -> i64 {
        (self.min_age_hours as i64).saturating_mul(HOUR_MS)
    }

    /// True when every requirement is met.
    pub fn is_met(&self, score: i64, votes: u32, age_ms: i64) -> bool {
        score >= self.min_score && votes >= self.min_votes && age_ms >= self.min_age_ms()
    }
}

/// One threshold per promotion step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PromotionRules {
    /// Evaluated against the regional tally.
    pub wild_to_regional: Threshold,
    /// Evaluated against the network-wide tally.
    pub regional_to_surface: Threshold,
    /// Evaluated against the network-wide tally, plus age and reports.
    pub surface_to_legacy: Threshold,
}

impl Default for PromotionRules {
    fn default() -> Self {
        Self {
            wild_to_regional: Threshold::new(5, 3, 0),
            regional_to_surface: Threshold::new(20, 10, 0),
            surface_to_legacy: Threshold::new(100, 50, 7 * 24),
        }
    }
}

impl PromotionRules {
    /// Threshold for entering `level`. Wild has none.
    pub fn threshold_for(&self, level: Level) -> Option<&Threshold> {
        match level {
            Level::Wild => None,
            Level::Regional => Some(&self.wild_to_regional),
            Level::Surface => Some(&self.regional_to_surface),
            Level::Legacy => Some(&self.surface_to_legacy),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LevelRules {
    pub promotion: PromotionRules,
}

/// Anti-spam limits for locally authored posts, plus the report threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SpamRules {
    pub min_interval_seconds: u64,
    pub max_posts_per_hour: u32,
    /// Reports at or above this count demote a post one step and block Legacy.
    pub report_threshold: u32,
}

impl Default for SpamRules {
    fn default() -> Self {
        Self {
            min_interval_seconds: 60,
            max_posts_per_hour: 10,
            report_threshold: 5,
        }
    }
}

impl SpamRules {
    /// Check whether an author may publish at `now`, given the creation times
    /// of their previous posts (any order).
    pub fn check(&self, previous_posts: &[i64], now: i64) -> Result<()> {
        let hour_ago = now - HOUR_MS;
        let recent: Vec<i64> = previous_posts
            .iter()
            .copied()
            .filter(|ts| *ts > hour_ago)
            .collect();

        if recent.len() >= self.max_posts_per_hour as usize {
            return Err(LevelingError::TooManyPosts {
                limit: self.max_posts_per_hour,
            });
        }

        if let Some(last) = recent.iter().max() {
            let elapsed_ms = (now - last).max(0);
            let interval_ms = (self.min_interval_seconds as i64).saturating_mul(1000);
            if elapsed_ms < interval_ms {
                let wait_ms = interval_ms - elapsed_ms;
                return Err(LevelingError::TooSoon {
                    wait_secs: ((wait_ms + 999) / 1000) as u64,
                });
            }
        }

        Ok(())
    }
}

/// The complete rule set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConsensusRules {
    pub levels: LevelRules,
    pub spam: SpamRules,
}

impl ConsensusRules {
    /// Parse rules from JSON, filling gaps with defaults, and validate them.
    pub fn from_json(json: &str) -> Result<Self> {
        let rules: ConsensusRules = serde_json::from_str(json)?;
        rules.validate()?;
        Ok(rules)
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<()> {
        let p = &self.levels.promotion;
        if p.regional_to_surface.min_score < p.wild_to_regional.min_score
            || p.surface_to_legacy.min_score < p.regional_to_surface.min_score
        {
            return Err(LevelingError::InconsistentRules(
                "promotion scores must not decrease with level".into(),
            ));
        }
        if self.spam.report_threshold == 0 {
            return Err(LevelingError::InconsistentRules(
                "reportThreshold must be at least 1".into(),
            ));
        }
        if self.spam.max_posts_per_hour == 0 {
            return Err(LevelingError::InconsistentRules(
                "maxPostsPerHour must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn promotion(&self) -> &PromotionRules {
        &self.levels.promotion
    }

    pub fn report_threshold(&self) -> u32 {
        self.spam.report_threshold
    }
}
