//! Hierarchical region codes.
//!
//! A region is a `-`-separated path of segments from broad to narrow:
//! `BR`, `BR-SP`, `BR-SP-SAO_PAULO`. Segments use uppercase ASCII letters,
//! digits and `_`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// Maximum encoded length of a region code.
pub const MAX_REGION_LEN: usize = 64;

/// A validated region code.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Region(String);

impl Region {
    /// Parse and validate a region code.
    pub fn new(code: impl Into<String>) -> Result<Self, CoreError> {
        let code = code.into();
        if code.is_empty() || code.len() > MAX_REGION_LEN {
            return Err(CoreError::InvalidRegion(code));
        }
        let valid_segments = code.split('-').all(|segment| {
            !segment.is_empty()
                && segment
                    .bytes()
                    .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
        });
        if !valid_segments {
            return Err(CoreError::InvalidRegion(code));
        }
        Ok(Self(code))
    }

    /// The code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if `self` equals `ancestor` or lies beneath it in the hierarchy.
    pub fn is_within(&self, ancestor: &Region) -> bool {
        match self.0.strip_prefix(ancestor.as_str()) {
            Some("") => true,
            Some(rest) => rest.starts_with('-'),
            None => false,
        }
    }

    /// The enclosing region, if any.
    pub fn parent(&self) -> Option<Region> {
        self.0
            .rsplit_once('-')
            .map(|(parent, _)| Region(parent.to_string()))
    }

    /// Number of segments (`BR-SP` has depth 2).
    pub fn depth(&self) -> usize {
        self.0.split('-').count()
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Region({})", self.0)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Region {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Region::new(s)
    }
}

impl TryFrom<String> for Region {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Region::new(value)
    }
}

impl From<Region> for String {
    fn from(region: Region) -> Self {
        region.0
    }
}
