//! Dotted version strings.
//!
//! Versions are compared segment by segment after dropping any `-suffix`
//! pre-release tag. The shorter sequence is zero-padded on the right, so
//! `1.2` and `1.2.0` are equal.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::VersionError;

/// A parsed dotted version, e.g. `15.2.3`.
#[derive(Debug, Clone)]
pub struct Version {
    segments: Vec<u64>,
}

impl Version {
    /// Parse a version string, ignoring surrounding whitespace and any
    /// pre-release suffix after the first `-`.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let trimmed = input.trim();
        let numeric = trimmed.split('-').next().unwrap_or_default();

        let segments = numeric
            .split('.')
            .map(|segment| {
                segment
                    .parse::<u64>()
                    .map_err(|_| VersionError::InvalidSegment {
                        version: input.to_string(),
                        segment: segment.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { segments })
    }

    /// The numeric segments.
    pub fn segments(&self) -> &[u64] {
        &self.segments
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.segments.len().max(other.segments.len());
        for idx in 0..len {
            let a = self.segments.get(idx).copied().unwrap_or(0);
            let b = other.segments.get(idx).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                decided => return decided,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Padded equality, so it has to agree with `Ord` rather than derive.
impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in &self.segments {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{}", segment)?;
            first = false;
        }
        Ok(())
    }
}

/// Compare two version strings.
///
/// Returns `Ordering::Greater` if `a` is newer than `b`.
pub fn compare(a: &str, b: &str) -> Result<Ordering, VersionError> {
    Ok(Version::parse(a)?.cmp(&Version::parse(b)?))
}

/// True if `to_check` is at least `version`.
pub fn min_version(version: &str, to_check: &str) -> Result<bool, VersionError> {
    Ok(compare(to_check, version)? != Ordering::Less)
}

/// True if `to_check` is at most `version`.
pub fn max_version(version: &str, to_check: &str) -> Result<bool, VersionError> {
    Ok(compare(to_check, version)? != Ordering::Greater)
}
