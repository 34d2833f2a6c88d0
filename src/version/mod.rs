// src/version/mod.rs

//! Version handling and constraint satisfaction for package dependencies
//!
//! Scientific software versions are dotted, mostly-numeric strings that are
//! frequently not semver-compliant ("2.1", "1.2.11b", "2021.06"). Versions
//! compare component-wise with numeric components ordered numerically and
//! alphabetic suffixes ordered lexically; semver comparison is used when both
//! sides parse cleanly.

use semver::Version as SemVersion;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// One dot-separated component of a version string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Component {
    Num(u64),
    Alpha(String),
}

impl Component {
    fn compare(&self, other: &Component) -> Ordering {
        match (self, other) {
            (Component::Num(a), Component::Num(b)) => a.cmp(b),
            (Component::Alpha(a), Component::Alpha(b)) => a.cmp(b),
            // Numeric components sort after alphabetic ones: "1.2" > "1.rc1"
            (Component::Num(_), Component::Alpha(_)) => Ordering::Greater,
            (Component::Alpha(_), Component::Num(_)) => Ordering::Less,
        }
    }
}

/// A parsed package version
#[derive(Debug, Clone, Eq)]
pub struct Version {
    raw: String,
    components: Vec<Component>,
}

impl Version {
    /// Parse a version string
    ///
    /// Components are split on '.', '-' and '_'; runs of digits and runs of
    /// letters within one component are split further, so "1.2rc1" parses as
    /// [1, 2, "rc", 1].
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::Parse("empty version string".to_string()));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        {
            return Err(Error::Parse(format!("invalid version string '{}'", s)));
        }

        let mut components = Vec::new();
        for piece in s.split(['.', '-', '_']) {
            if piece.is_empty() {
                return Err(Error::Parse(format!("invalid version string '{}'", s)));
            }
            let mut rest = piece;
            while !rest.is_empty() {
                let digit = rest.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false);
                let end = rest
                    .find(|c: char| c.is_ascii_digit() != digit)
                    .unwrap_or(rest.len());
                let (chunk, tail) = rest.split_at(end);
                if digit {
                    let n = chunk.parse::<u64>().map_err(|e| {
                        Error::Parse(format!("invalid numeric component in '{}': {}", s, e))
                    })?;
                    components.push(Component::Num(n));
                } else {
                    components.push(Component::Alpha(chunk.to_string()));
                }
                rest = tail;
            }
        }

        Ok(Self {
            raw: s.to_string(),
            components,
        })
    }

    /// The original version string
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Try semver comparison first, mirroring how upstream repositories order
    /// releases; fall back to component-wise comparison otherwise.
    pub fn compare(&self, other: &Version) -> Ordering {
        if let (Ok(a), Ok(b)) = (SemVersion::parse(&self.raw), SemVersion::parse(&other.raw)) {
            return a.cmp(&b);
        }

        let mut left = self.components.iter();
        let mut right = other.components.iter();
        loop {
            match (left.next(), right.next()) {
                (Some(a), Some(b)) => match a.compare(b) {
                    Ordering::Equal => continue,
                    ord => return ord,
                },
                // "1.2" < "1.2.1"
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (None, None) => return self.raw.cmp(&other.raw),
            }
        }
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl std::hash::Hash for Version {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Version constraint operators
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    /// Any version is acceptable
    Any,
    /// Exact version match
    Exact(Version),
    /// Greater than
    GreaterThan(Version),
    /// Greater than or equal
    GreaterOrEqual(Version),
    /// Less than
    LessThan(Version),
    /// Less than or equal
    LessOrEqual(Version),
    /// Not equal
    NotEqual(Version),
    /// Both constraints must hold (for ranges like ">=1.0,<2.0")
    And(Box<VersionConstraint>, Box<VersionConstraint>),
}

impl Default for VersionConstraint {
    fn default() -> Self {
        VersionConstraint::Any
    }
}

impl VersionConstraint {
    /// Parse a version constraint string
    ///
    /// Examples:
    /// - ">=1.2.3" → GreaterOrEqual(1.2.3)
    /// - "<2.0" → LessThan(2.0)
    /// - "1.5.0" → Exact(1.5.0)
    /// - ">=1.0,<2.0" → And(GreaterOrEqual(1.0), LessThan(2.0))
    /// - "" or "*" → Any
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        if s.is_empty() || s == "*" {
            return Ok(VersionConstraint::Any);
        }

        if s.contains(',') {
            let parts: Vec<&str> = s.split(',').map(|p| p.trim()).collect();
            if parts.len() != 2 {
                return Err(Error::Parse(format!(
                    "compound constraint '{}' must have exactly two parts",
                    s
                )));
            }
            let left = Self::parse(parts[0])?;
            let right = Self::parse(parts[1])?;
            return Ok(VersionConstraint::And(Box::new(left), Box::new(right)));
        }

        if let Some(rest) = s.strip_prefix(">=") {
            Ok(VersionConstraint::GreaterOrEqual(Version::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix("<=") {
            Ok(VersionConstraint::LessOrEqual(Version::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix("!=") {
            Ok(VersionConstraint::NotEqual(Version::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix('>') {
            Ok(VersionConstraint::GreaterThan(Version::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix('<') {
            Ok(VersionConstraint::LessThan(Version::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix('=') {
            Ok(VersionConstraint::Exact(Version::parse(rest)?))
        } else {
            Ok(VersionConstraint::Exact(Version::parse(s)?))
        }
    }

    /// Check whether a version satisfies this constraint
    pub fn satisfies(&self, version: &Version) -> bool {
        match self {
            VersionConstraint::Any => true,
            VersionConstraint::Exact(v) => version == v,
            VersionConstraint::GreaterThan(v) => version > v,
            VersionConstraint::GreaterOrEqual(v) => version >= v,
            VersionConstraint::LessThan(v) => version < v,
            VersionConstraint::LessOrEqual(v) => version <= v,
            VersionConstraint::NotEqual(v) => version != v,
            VersionConstraint::And(left, right) => {
                left.satisfies(version) && right.satisfies(version)
            }
        }
    }

    /// Merge two constraints into one that requires both
    pub fn intersect(&self, other: &VersionConstraint) -> VersionConstraint {
        match (self, other) {
            (VersionConstraint::Any, c) | (c, VersionConstraint::Any) => c.clone(),
            (a, b) if a == b => a.clone(),
            (a, b) => VersionConstraint::And(Box::new(a.clone()), Box::new(b.clone())),
        }
    }

    /// True when this constraint restricts the version at all
    pub fn is_any(&self) -> bool {
        matches!(self, VersionConstraint::Any)
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Any => write!(f, "*"),
            VersionConstraint::Exact(v) => write!(f, "={}", v),
            VersionConstraint::GreaterThan(v) => write!(f, ">{}", v),
            VersionConstraint::GreaterOrEqual(v) => write!(f, ">={}", v),
            VersionConstraint::LessThan(v) => write!(f, "<{}", v),
            VersionConstraint::LessOrEqual(v) => write!(f, "<={}", v),
            VersionConstraint::NotEqual(v) => write!(f, "!={}", v),
            VersionConstraint::And(left, right) => write!(f, "{},{}", left, right),
        }
    }
}

impl FromStr for VersionConstraint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_version_parse_simple() {
        let version = v("1.2.3");
        assert_eq!(version.as_str(), "1.2.3");
    }

    #[test]
    fn test_version_parse_rejects_garbage() {
        assert!(Version::parse("").is_err());
        assert!(Version::parse("1..2").is_err());
        assert!(Version::parse("1.2/3").is_err());
    }

    #[test]
    fn test_version_compare_numeric() {
        assert!(v("1.2.3") < v("1.2.4"));
        assert!(v("1.10") > v("1.9"));
        assert!(v("2.0") > v("1.99.99"));
    }

    #[test]
    fn test_version_compare_mixed_length() {
        assert!(v("1.2") < v("1.2.1"));
        assert!(v("2.1") > v("2.0.99"));
    }

    #[test]
    fn test_version_compare_alpha_suffix() {
        // Pre-release suffixes sort before the plain release
        assert!(v("1.2rc1") < v("1.2.0"));
        assert!(v("1.2.11b") > v("1.2.11a"));
    }

    #[test]
    fn test_version_semver_path() {
        assert!(v("1.2.3") < v("1.2.10"));
        assert_eq!(v("1.2.3").compare(&v("1.2.3")), std::cmp::Ordering::Equal);
    }

    #[test]
    fn test_constraint_parse_exact() {
        let c = VersionConstraint::parse("1.2.3").unwrap();
        assert!(c.satisfies(&v("1.2.3")));
        assert!(!c.satisfies(&v("1.2.4")));
    }

    #[test]
    fn test_constraint_parse_operators() {
        assert!(VersionConstraint::parse(">=2").unwrap().satisfies(&v("2.1")));
        assert!(!VersionConstraint::parse(">=2").unwrap().satisfies(&v("1.9")));
        assert!(VersionConstraint::parse("<2.0").unwrap().satisfies(&v("1.9")));
        assert!(VersionConstraint::parse("!=1.0").unwrap().satisfies(&v("1.1")));
        assert!(VersionConstraint::parse(">1.0").unwrap().satisfies(&v("1.0.1")));
        assert!(VersionConstraint::parse("<=1.0").unwrap().satisfies(&v("1.0")));
    }

    #[test]
    fn test_constraint_range() {
        let c = VersionConstraint::parse(">=1.0,<2.0").unwrap();
        assert!(c.satisfies(&v("1.5")));
        assert!(!c.satisfies(&v("2.0")));
        assert!(!c.satisfies(&v("0.9")));
    }

    #[test]
    fn test_constraint_any() {
        let c = VersionConstraint::parse("*").unwrap();
        assert!(c.satisfies(&v("99.99")));
        assert!(c.is_any());
    }

    #[test]
    fn test_constraint_default_is_any() {
        assert!(VersionConstraint::default().is_any());
    }

    #[test]
    fn test_constraint_intersect() {
        let a = VersionConstraint::parse(">=1.0").unwrap();
        let b = VersionConstraint::parse("<2.0").unwrap();
        let merged = a.intersect(&b);
        assert!(merged.satisfies(&v("1.5")));
        assert!(!merged.satisfies(&v("2.5")));

        assert_eq!(a.intersect(&VersionConstraint::Any), a);
    }

    #[test]
    fn test_constraint_display_roundtrip() {
        for s in [">=1.2.0", "<2.0", "=1.5.0", ">=1.0,<2.0", "*"] {
            let c = VersionConstraint::parse(s).unwrap();
            let reparsed = VersionConstraint::parse(&c.to_string()).unwrap();
            assert_eq!(c, reparsed);
        }
    }
}
