//! Validation of items received from any source: integrity, signatures and
//! field limits.

use crate::error::ValidationError;
use crate::item::SyncItem;
use crate::post::Post;
use crate::vote::{Report, Vote};

/// Maximum title length in bytes.
pub const MAX_TITLE_BYTES: usize = 300;
/// Maximum body length in bytes.
pub const MAX_BODY_BYTES: usize = 40_000;
/// Maximum report reason length in bytes.
pub const MAX_REASON_BYTES: usize = 500;
/// How far past local time an item may be dated by default.
pub const DEFAULT_MAX_CLOCK_SKEW_MS: i64 = 10 * 60 * 1000;

/// Validate a post.
///
/// This performs:
/// - CID recomputation (`CidMismatch` means the payload was tampered with)
/// - Field limits
/// - Author signature verification
pub fn validate_post(post: &Post) -> Result<(), ValidationError> {
    let computed = post.compute_cid();
    if computed != post.cid {
        return Err(ValidationError::CidMismatch {
            declared: post.cid,
            computed,
        });
    }

    check_text("title", &post.payload.title, MAX_TITLE_BYTES)?;
    check_text("body", &post.payload.body, MAX_BODY_BYTES)?;
    check_timestamp(post.payload.created_at)?;

    post.payload
        .author
        .verify(&post.payload.signing_message(), &post.signature)
        .map_err(|_| ValidationError::SignatureFailed)
}

/// Validate a vote's signature and timestamp.
pub fn validate_vote(vote: &Vote) -> Result<(), ValidationError> {
    check_timestamp(vote.timestamp)?;
    vote.voter
        .verify(&vote.signing_message(), &vote.signature)
        .map_err(|_| ValidationError::SignatureFailed)
}

/// Validate a report's reason, signature and timestamp.
pub fn validate_report(report: &Report) -> Result<(), ValidationError> {
    check_text("reason", &report.reason, MAX_REASON_BYTES)?;
    check_timestamp(report.timestamp)?;
    report
        .reporter
        .verify(&report.signing_message(), &report.signature)
        .map_err(|_| ValidationError::SignatureFailed)
}

/// Validate any replicated item.
pub fn validate_item(item: &SyncItem) -> Result<(), ValidationError> {
    match item {
        SyncItem::Post(p) => validate_post(p),
        SyncItem::Vote(v) => validate_vote(v),
        SyncItem::Report(r) => validate_report(r),
    }
}

/// Reject a timestamp after `horizon`, the latest acceptable time (local
/// time plus the allowed clock skew).
///
/// Sync checkpoints follow item timestamps; an item dated far ahead would
/// pin them past everything honest peers write.
pub fn check_horizon(timestamp: i64, horizon: i64) -> Result<(), ValidationError> {
    if timestamp > horizon {
        return Err(ValidationError::TimestampInFuture { timestamp, horizon });
    }
    Ok(())
}

fn check_text(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField { field });
    }
    if value.len() > max {
        return Err(ValidationError::FieldTooLong {
            field,
            max,
            len: value.len(),
        });
    }
    Ok(())
}

fn check_timestamp(ts: i64) -> Result<(), ValidationError> {
    // Cursors use i64::MIN as the origin sentinel.
    if ts < 0 {
        return Err(ValidationError::TimestampOutOfRange(ts));
    }
    Ok(())
}
