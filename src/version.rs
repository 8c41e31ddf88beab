use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::location::compile;

/// Bytes at the head of the target searched for the version banner.
const BANNER_SCAN_BYTES: usize = 4096;

static VERSION_BANNER: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?m)^//\s*Version:\s*(\d+)\.(\d+)\.(\d+)"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        let core = text.trim().trim_start_matches('v');
        let core = core.split(['-', '+']).next()?;
        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().unwrap_or("0").parse().ok()?;
        let patch = parts.next().unwrap_or("0").parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(major, minor, patch))
    }

    /// Reads the `// Version: X.Y.Z` banner near the top of a bundle.
    pub fn detect(source: &str) -> Option<Self> {
        let mut end = source.len().min(BANNER_SCAN_BYTES);
        while !source.is_char_boundary(end) {
            end -= 1;
        }
        let caps = VERSION_BANNER.captures(&source[..end])?;
        Some(Self::new(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
        ))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Inclusive minimum, exclusive maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRange {
    pub min: Option<Version>,
    pub max: Option<Version>,
}

impl VersionRange {
    pub const ANY: Self = Self {
        min: None,
        max: None,
    };

    pub const fn from(min: Version) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    pub const fn between(min: Version, max: Version) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    /// An unknown target version is treated as in range.
    pub fn contains(&self, version: Option<Version>) -> bool {
        let Some(version) = version else {
            return true;
        };
        self.min.is_none_or(|min| version >= min) && self.max.is_none_or(|max| version < max)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.min, self.max) {
            (None, None) => f.write_str("*"),
            (Some(min), None) => write!(f, ">={min}"),
            (None, Some(max)) => write!(f, "<{max}"),
            (Some(min), Some(max)) => write!(f, ">={min}, <{max}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_partial_and_prefixed_versions() {
        assert_eq!(Version::parse("v1.2"), Some(Version::new(1, 2, 0)));
        assert_eq!(Version::parse("2.0.14-beta.1"), Some(Version::new(2, 0, 14)));
        assert_eq!(Version::parse("1.2.3.4"), None);
        assert_eq!(Version::parse("abc"), None);
    }

    #[test]
    fn detect_reads_banner_comment() {
        let source = "#!/usr/bin/env node\n// (c) vendor\n\n// Version: 1.0.71\nvar a=1;";
        assert_eq!(Version::detect(source), Some(Version::new(1, 0, 71)));
        assert_eq!(Version::detect("var a=1;"), None);
    }

    #[test]
    fn range_bounds_are_inclusive_then_exclusive() {
        let range = VersionRange::between(Version::new(1, 0, 0), Version::new(2, 0, 0));
        assert!(range.contains(Some(Version::new(1, 0, 0))));
        assert!(range.contains(Some(Version::new(1, 9, 9))));
        assert!(!range.contains(Some(Version::new(2, 0, 0))));
        assert!(!range.contains(Some(Version::new(0, 9, 0))));
        assert!(range.contains(None));
        assert_eq!(range.to_string(), ">=1.0.0, <2.0.0");
    }
}
