//! Level recomputation.
//!
//! [`recompute`] is a pure function of the post, its previously stored
//! state, the full set of known votes and reports, and the current time.
//!
//! Rules, applied in order:
//!
//! 1. Walk the promotion ladder from Wild. Wild→Regional uses the regional
//!    tally; Regional→Surface and Surface→Legacy use the network-wide tally.
//!    Surface→Legacy also needs the minimum age and fewer reports than the
//!    report threshold. Every comparison is inclusive.
//! 2. The peak level is the maximum of the stored peak and the level just
//!    earned. It never decreases.
//! 3. Legacy is final. Below Legacy, reports at or above the threshold
//!    demote the effective level one step below the peak.

use iceberg_core::{Level, Post, PostState, Report, Vote};

use crate::error::Result;
use crate::rules::{ConsensusRules, Threshold};
use crate::tally::Tally;

/// Outcome of a recomputation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelDecision {
    /// The new derived state.
    pub state: PostState,
    /// Effective level before recomputation.
    pub previous: Level,
    /// True if anything in the derived state changed.
    pub changed: bool,
}

impl LevelDecision {
    pub fn level(&self) -> Level {
        self.state.level
    }

    /// The level transition, if the effective level moved.
    pub fn level_change(&self) -> Option<(Level, Level)> {
        (self.previous != self.state.level).then_some((self.previous, self.state.level))
    }
}

/// What a post still needs to reach the next level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub current: Level,
    /// `None` once the post is Legacy.
    pub next: Option<NextLevel>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextLevel {
    pub level: Level,
    /// Additional net score needed (0 if already met).
    pub score_needed: i64,
    /// Additional votes needed (0 if already met).
    pub votes_needed: u32,
    /// Milliseconds until the post is old enough.
    pub age_remaining_ms: i64,
    /// Reports currently block promotion.
    pub blocked_by_reports: bool,
}

/// Holds the active rule set.
#[derive(Debug, Clone, Default)]
pub struct LevelingEngine {
    rules: ConsensusRules,
}

impl LevelingEngine {
    pub fn new(rules: ConsensusRules) -> Result<Self> {
        rules.validate()?;
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &ConsensusRules {
        &self.rules
    }

    pub fn recompute(
        &self,
        post: &Post,
        current: &PostState,
        votes: &[Vote],
        reports: &[Report],
        now: i64,
    ) -> LevelDecision {
        recompute(post, current, votes, reports, now, &self.rules)
    }

    pub fn progress(&self, post: &Post, state: &PostState, now: i64) -> Progress {
        progress(post, state, now, &self.rules)
    }

    /// Whether the author may delete a post in this state.
    pub fn can_delete(&self, state: &PostState) -> bool {
        can_delete(state)
    }
}

/// Recompute the derived state of `post`.
pub fn recompute(
    post: &Post,
    current: &PostState,
    votes: &[Vote],
    reports: &[Report],
    now: i64,
    rules: &ConsensusRules,
) -> LevelDecision {
    let tally = Tally::from_records(post, votes, reports);
    let age_ms = now.saturating_sub(post.created_at()).max(0);

    let earned = earned_level(&tally, age_ms, rules);
    let peak_level = current.peak_level.max(earned);
    let level = effective_level(peak_level, tally.reports, rules);

    let mut state = PostState {
        level,
        peak_level,
        up: tally.up,
        down: tally.down,
        regional_up: tally.regional_up,
        regional_down: tally.regional_down,
        reports: tally.reports,
        deleted: current.deleted,
        updated_at: current.updated_at,
    };

    let changed = state != *current;
    if changed {
        state.updated_at = now;
    }

    LevelDecision {
        state,
        previous: current.level,
        changed,
    }
}

/// Requirements for the next promotion step.
pub fn progress(post: &Post, state: &PostState, now: i64, rules: &ConsensusRules) -> Progress {
    let next = state.level.next().and_then(|level| {
        let threshold = rules.promotion().threshold_for(level)?;
        let (score, votes) = if level == Level::Regional {
            (state.regional_score(), state.regional_up + state.regional_down)
        } else {
            (state.score(), state.up + state.down)
        };
        let age_ms = now.saturating_sub(post.created_at()).max(0);
        Some(NextLevel {
            level,
            score_needed: (threshold.min_score - score).max(0),
            votes_needed: threshold.min_votes.saturating_sub(votes),
            age_remaining_ms: (threshold.min_age_ms() - age_ms).max(0),
            blocked_by_reports: state.reports >= rules.report_threshold(),
        })
    });

    Progress {
        current: state.level,
        next,
    }
}

/// Legacy posts can never be deleted.
pub fn can_delete(state: &PostState) -> bool {
    state.peak_level < Level::Legacy && state.level < Level::Legacy
}

fn earned_level(tally: &Tally, age_ms: i64, rules: &ConsensusRules) -> Level {
    let promotion = rules.promotion();
    let mut level = Level::Wild;

    while let Some(next) = level.next() {
        let Some(threshold) = promotion.threshold_for(next) else {
            break;
        };
        if !step_met(next, threshold, tally, age_ms, rules) {
            break;
        }
        level = next;
    }

    level
}

fn step_met(
    next: Level,
    threshold: &Threshold,
    tally: &Tally,
    age_ms: i64,
    rules: &ConsensusRules,
) -> bool {
    match next {
        Level::Wild => true,
        Level::Regional => threshold.is_met(tally.regional_score(), tally.regional_votes(), age_ms),
        Level::Surface => threshold.is_met(tally.score(), tally.votes(), age_ms),
        Level::Legacy => {
            tally.reports < rules.report_threshold()
                && threshold.is_met(tally.score(), tally.votes(), age_ms)
        }
    }
}

fn effective_level(peak: Level, reports: u32, rules: &ConsensusRules) -> Level {
    if peak == Level::Legacy {
        Level::Legacy
    } else if reports >= rules.report_threshold() {
        peak.demoted()
    } else {
        peak
    }
}
