// src/concretize/policy.rs

//! Optimization policy for concretization
//!
//! The solver explores candidates in an order that realizes a lexicographic
//! preference: earlier criteria dominate later ones, and the first complete
//! solution found is the best one under the active policy. Deprecated
//! versions always sort last regardless of policy, and the final tie-break is
//! always newest-version-first / lexicographically-smallest-provider, so
//! identical inputs yield identical graphs.

/// One preference dimension, in dominance order within a [`Policy`]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum Criterion {
    /// Versions flagged preferred outrank newer ones
    PreferredVersion,
    /// Versions matching an already-installed spec outrank fresh builds
    Reuse,
    /// Declared variant defaults are tried before alternatives
    DefaultVariants,
    /// Providers already present in the graph outrank new nodes
    MinimalNodes,
}

/// Ordered list of active criteria
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub criteria: Vec<Criterion>,
}

impl Policy {
    pub fn new(criteria: Vec<Criterion>) -> Self {
        Self { criteria }
    }

    pub fn has(&self, criterion: Criterion) -> bool {
        self.criteria.contains(&criterion)
    }

    /// Copy of this policy with one criterion removed
    pub fn without(&self, criterion: Criterion) -> Self {
        Self {
            criteria: self
                .criteria
                .iter()
                .copied()
                .filter(|c| *c != criterion)
                .collect(),
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            criteria: vec![
                Criterion::PreferredVersion,
                Criterion::Reuse,
                Criterion::DefaultVariants,
                Criterion::MinimalNodes,
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_order() {
        let policy = Policy::default();
        assert_eq!(policy.criteria[0], Criterion::PreferredVersion);
        assert!(policy.has(Criterion::Reuse));
    }

    #[test]
    fn test_without() {
        let policy = Policy::default().without(Criterion::Reuse);
        assert!(!policy.has(Criterion::Reuse));
        assert!(policy.has(Criterion::MinimalNodes));
    }

    #[test]
    fn test_criterion_names() {
        assert_eq!(Criterion::PreferredVersion.to_string(), "preferred_version");
        assert_eq!(
            "minimal_nodes".parse::<Criterion>().unwrap(),
            Criterion::MinimalNodes
        );
    }
}
