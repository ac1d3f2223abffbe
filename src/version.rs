// src/version.rs

//! Application version parsing and ordering
//!
//! Release tags in the wild look like `v1.4`, `2.0.1` or `3.1.0-rc.1`. They
//! are normalised to semver by stripping a leading `v` and padding missing
//! minor/patch components with zero, then compared with semver precedence.

use semver::Version;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// A parsed application version
#[derive(Debug, Clone)]
pub struct AppVersion {
    raw: String,
    parsed: Version,
}

impl AppVersion {
    /// Parse a release tag
    ///
    /// - "1" → 1.0.0
    /// - "v1.4" → 1.4.0
    /// - "2.0.1-rc.1" → 2.0.1-rc.1
    pub fn parse(s: &str) -> Result<Self, String> {
        let trimmed = s.trim();
        let body = trimmed.strip_prefix(['v', 'V']).unwrap_or(trimmed);
        if body.is_empty() {
            return Err(format!("empty version '{}'", s));
        }

        // Split off pre-release/build metadata before padding the core
        let split_at = body.find(['-', '+']).unwrap_or(body.len());
        let (core, suffix) = body.split_at(split_at);

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() > 3 || parts.iter().any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit())) {
            return Err(format!("'{}' is not a dotted numeric version", s));
        }

        let mut padded = parts.clone();
        while padded.len() < 3 {
            padded.push("0");
        }

        let parsed = Version::parse(&format!("{}{}", padded.join("."), suffix))
            .map_err(|e| format!("invalid version '{}': {}", s, e))?;

        Ok(Self {
            raw: trimmed.to_string(),
            parsed,
        })
    }

    /// `0.0.0`, the version of an application with no recorded install
    pub fn zero() -> Self {
        Self {
            raw: "0.0.0".to_string(),
            parsed: Version::new(0, 0, 0),
        }
    }

    /// The tag as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether this version falls in the half-open upgrade range `(from, to]`
    pub fn in_upgrade_range(&self, from: &AppVersion, to: &AppVersion) -> bool {
        self > from && self <= to
    }
}

impl FromStr for AppVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for AppVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

// Equality follows the parsed version so `2.0` and `2.0.0` are the same release
impl PartialEq for AppVersion {
    fn eq(&self, other: &Self) -> bool {
        self.parsed == other.parsed
    }
}

impl Eq for AppVersion {}

impl Hash for AppVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.parsed.hash(state);
    }
}

impl Ord for AppVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parsed.cmp(&other.parsed)
    }
}

impl PartialOrd for AppVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> AppVersion {
        AppVersion::parse(s).unwrap()
    }

    #[test]
    fn test_parse_pads_short_versions() {
        assert_eq!(v("1"), v("1.0.0"));
        assert_eq!(v("v1.4"), v("1.4.0"));
        assert_eq!(v("v1.4").as_str(), "v1.4");
    }

    #[test]
    fn test_equality_agrees_with_ordering() {
        use std::collections::HashSet;

        assert_eq!(v("2.0").cmp(&v("2.0.0")), Ordering::Equal);
        assert_eq!(v("2.0"), v("v2.0.0"));
        let set: HashSet<AppVersion> = [v("2"), v("2.0"), v("2.0.0")].into_iter().collect();
        assert_eq!(set.len(), 1);
        assert_ne!(v("2.0.0-rc.1"), v("2.0.0"));
    }

    #[test]
    fn test_parse_keeps_prerelease() {
        assert!(v("2.0.0-rc.1") < v("2.0.0"));
        assert!(v("2.0-rc.1") < v("2.0"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(AppVersion::parse("").is_err());
        assert!(AppVersion::parse("latest").is_err());
        assert!(AppVersion::parse("1..2").is_err());
        assert!(AppVersion::parse("1.2.3.4").is_err());
    }

    #[test]
    fn test_numeric_ordering() {
        assert!(v("1.10.0") > v("1.9.3"));
        assert!(v("0.9") < v("1.0"));
    }

    #[test]
    fn test_upgrade_range_is_half_open() {
        let from = v("1.0.0");
        let to = v("1.2.0");
        assert!(!v("1.0.0").in_upgrade_range(&from, &to));
        assert!(v("1.1.0").in_upgrade_range(&from, &to));
        assert!(v("1.2.0").in_upgrade_range(&from, &to));
        assert!(!v("1.3.0").in_upgrade_range(&from, &to));
    }
}
