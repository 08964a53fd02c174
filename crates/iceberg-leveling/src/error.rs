//! Error types for the leveling engine.

use thiserror::Error;

/// Errors that can occur while loading rules or gating local writes.
#[derive(Debug, Error)]
pub enum LevelingError {
    /// Rules file could not be parsed.
    #[error("invalid rules: {0}")]
    InvalidRules(String),

    /// Rules parsed but are inconsistent.
    #[error("inconsistent rules: {0}")]
    InconsistentRules(String),

    /// Author exceeded the hourly post limit.
    #[error("limit of {limit} posts per hour reached")]
    TooManyPosts { limit: u32 },

    /// Author posted again before the minimum interval elapsed.
    #[error("wait {wait_secs}s before posting again")]
    TooSoon { wait_secs: u64 },
}

impl From<serde_json::Error> for LevelingError {
    fn from(e: serde_json::Error) -> Self {
        LevelingError::InvalidRules(e.to_string())
    }
}

/// Result type for leveling operations.
pub type Result<T> = std::result::Result<T, LevelingError>;
