// src/variant.rs

//! Variant values and constraints
//!
//! Variants are build-time options declared by a package: boolean features
//! (`+shared` / `~shared`), single-valued settings (`build_type=Release`),
//! and multi-valued sets (`languages=c,cxx,fortran`). Abstract specs carry
//! variant constraints; concrete specs carry exactly one value per variant.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Error, Result};

/// A concrete variant value
///
/// Serialized untagged so the on-disk form is the natural TOML/JSON type:
/// a boolean, a string, or an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariantValue {
    Bool(bool),
    Single(String),
    Multi(BTreeSet<String>),
}

impl VariantValue {
    /// Canonical text used for hashing and display
    pub fn canonical(&self) -> String {
        match self {
            VariantValue::Bool(b) => b.to_string(),
            VariantValue::Single(s) => s.clone(),
            VariantValue::Multi(set) => {
                let items: Vec<&str> = set.iter().map(|s| s.as_str()).collect();
                items.join(",")
            }
        }
    }

    /// Parse the value side of `name=value`; comma-separated values become a
    /// multi set
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::Parse("empty variant value".to_string()));
        }
        if s.contains(',') {
            let set: BTreeSet<String> = s
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            if set.is_empty() {
                return Err(Error::Parse(format!("empty multi variant value '{}'", s)));
            }
            Ok(VariantValue::Multi(set))
        } else {
            Ok(VariantValue::Single(s.to_string()))
        }
    }
}

impl fmt::Display for VariantValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

/// A constraint on one variant in an abstract spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariantConstraint {
    /// Any value is acceptable
    Any,
    /// The boolean variant must be enabled/disabled
    Bool(bool),
    /// The variant must equal this single value
    Value(String),
    /// The multi variant must include at least these values
    Includes(BTreeSet<String>),
}

impl VariantConstraint {
    /// Check whether a concrete value satisfies this constraint
    pub fn satisfied_by(&self, value: &VariantValue) -> bool {
        match (self, value) {
            (VariantConstraint::Any, _) => true,
            (VariantConstraint::Bool(want), VariantValue::Bool(have)) => want == have,
            (VariantConstraint::Value(want), VariantValue::Single(have)) => want == have,
            (VariantConstraint::Value(want), VariantValue::Multi(have)) => {
                have.len() == 1 && have.contains(want)
            }
            (VariantConstraint::Includes(want), VariantValue::Multi(have)) => {
                want.is_subset(have)
            }
            _ => false,
        }
    }

    /// Merge another constraint in; fails when the two cannot both hold
    pub fn intersect(&self, other: &VariantConstraint) -> Option<VariantConstraint> {
        match (self, other) {
            (VariantConstraint::Any, c) | (c, VariantConstraint::Any) => Some(c.clone()),
            (a, b) if a == b => Some(a.clone()),
            (VariantConstraint::Includes(a), VariantConstraint::Includes(b)) => {
                Some(VariantConstraint::Includes(a.union(b).cloned().collect()))
            }
            _ => None,
        }
    }
}

impl fmt::Display for VariantConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariantConstraint::Any => write!(f, "*"),
            VariantConstraint::Bool(true) => write!(f, "+"),
            VariantConstraint::Bool(false) => write!(f, "~"),
            VariantConstraint::Value(v) => write!(f, "={}", v),
            VariantConstraint::Includes(set) => {
                let items: Vec<&str> = set.iter().map(|s| s.as_str()).collect();
                write!(f, "={}", items.join(","))
            }
        }
    }
}
