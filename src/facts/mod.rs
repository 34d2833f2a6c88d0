// src/facts/mod.rs

//! Package facts: the read-only catalog the concretizer consumes
//!
//! Facts describe what a package *could* be: its known versions, declared
//! variants, conditional dependency edges, conflict rules, and virtual
//! capability provisions. The catalog itself is an external collaborator;
//! this module defines the query interface (`FactsProvider`), the record
//! types, an in-memory provider, and the explicitly scoped `FactsCache` that
//! one concretization run owns (there are no process-wide singletons).

use std::collections::BTreeMap;
use std::fmt;

use crate::buildsys::BuildSystem;
use crate::error::{Error, Result};
use crate::spec::{DepKind, DepKindSet};
use crate::variant::{VariantConstraint, VariantValue};
use crate::version::{Version, VersionConstraint};

/// A `when` condition evaluated against the node being concretized
///
/// Conditions constrain the node's own version and variant values; an empty
/// condition always holds.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Condition {
    pub version: VersionConstraint,
    pub variants: BTreeMap<String, VariantConstraint>,
}

impl Condition {
    /// The trivially true condition
    pub fn always() -> Self {
        Self {
            version: VersionConstraint::Any,
            variants: BTreeMap::new(),
        }
    }

    pub fn when_version(constraint: VersionConstraint) -> Self {
        Self {
            version: constraint,
            variants: BTreeMap::new(),
        }
    }

    pub fn when_variant(name: impl Into<String>, constraint: VariantConstraint) -> Self {
        Self {
            version: VersionConstraint::Any,
            variants: [(name.into(), constraint)].into(),
        }
    }

    pub fn and_variant(mut self, name: impl Into<String>, constraint: VariantConstraint) -> Self {
        self.variants.insert(name.into(), constraint);
        self
    }

    pub fn is_trivial(&self) -> bool {
        self.version.is_any() && self.variants.is_empty()
    }

    /// Evaluate against a chosen version and variant assignment
    pub fn holds(&self, version: &Version, variants: &BTreeMap<String, VariantValue>) -> bool {
        if !self.version.satisfies(version) {
            return false;
        }
        for (name, constraint) in &self.variants {
            match variants.get(name) {
                Some(value) if constraint.satisfied_by(value) => {}
                _ => return false,
            }
        }
        true
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_trivial() {
            return write!(f, "always");
        }
        let mut first = true;
        if !self.version.is_any() {
            write!(f, "@{}", self.version)?;
            first = false;
        }
        for (name, constraint) in &self.variants {
            if !first {
                write!(f, " ")?;
            }
            match constraint {
                VariantConstraint::Bool(true) => write!(f, "+{}", name)?,
                VariantConstraint::Bool(false) => write!(f, "~{}", name)?,
                other => write!(f, "{}{}", name, other)?,
            }
            first = false;
        }
        Ok(())
    }
}

/// One known version of a package
#[derive(Debug, Clone)]
pub struct VersionDecl {
    pub version: Version,
    /// Deprecated versions are chosen only when nothing else is feasible
    pub deprecated: bool,
    /// Preferred versions outrank newer ones in the default policy
    pub preferred: bool,
}

/// One declared variant
#[derive(Debug, Clone)]
pub struct VariantDecl {
    pub name: String,
    pub default: VariantValue,
    /// Legal values for single/multi variants; empty means free-form
    pub values: Vec<String>,
    pub multi: bool,
}

impl VariantDecl {
    /// Check that a concrete value is legal for this declaration
    pub fn allows(&self, value: &VariantValue) -> bool {
        match value {
            VariantValue::Bool(_) => matches!(self.default, VariantValue::Bool(_)),
            VariantValue::Single(v) => self.values.is_empty() || self.values.iter().any(|x| x == v),
            VariantValue::Multi(set) => {
                self.multi
                    && (self.values.is_empty()
                        || set.iter().all(|v| self.values.iter().any(|x| x == v)))
            }
        }
    }
}

/// One conditional dependency declaration
#[derive(Debug, Clone)]
pub struct DependencyDecl {
    pub name: String,
    pub constraint: VersionConstraint,
    pub kinds: DepKindSet,
    pub when: Condition,
}

/// One conflict rule: when `when` holds on this node, the concrete graph may
/// not contain a node matching (`target_name`, `target`)
#[derive(Debug, Clone)]
pub struct ConflictDecl {
    pub target_name: String,
    pub target: Condition,
    pub when: Condition,
    pub message: Option<String>,
}

impl fmt::Display for ConflictDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conflicts with {}", self.target_name)?;
        if !self.target.is_trivial() {
            write!(f, " ({})", self.target)?;
        }
        if !self.when.is_trivial() {
            write!(f, " when {}", self.when)?;
        }
        Ok(())
    }
}

/// One virtual-capability provision
#[derive(Debug, Clone)]
pub struct ProvidesDecl {
    pub virtual_name: String,
    pub when: Condition,
}

/// Everything known about one package
#[derive(Debug, Clone)]
pub struct PackageFacts {
    pub name: String,
    pub build_system: BuildSystem,
    pub versions: Vec<VersionDecl>,
    pub variants: Vec<VariantDecl>,
    pub dependencies: Vec<DependencyDecl>,
    pub conflicts: Vec<ConflictDecl>,
    pub provides: Vec<ProvidesDecl>,
}

impl PackageFacts {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            build_system: BuildSystem::default(),
            versions: Vec::new(),
            variants: Vec::new(),
            dependencies: Vec::new(),
            conflicts: Vec::new(),
            provides: Vec::new(),
        }
    }

    pub fn with_build_system(mut self, build_system: BuildSystem) -> Self {
        self.build_system = build_system;
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.versions.push(VersionDecl {
            version: Version::parse(version).expect("valid version literal"),
            deprecated: false,
            preferred: false,
        });
        self
    }

    pub fn with_preferred_version(mut self, version: &str) -> Self {
        self.versions.push(VersionDecl {
            version: Version::parse(version).expect("valid version literal"),
            deprecated: false,
            preferred: true,
        });
        self
    }

    pub fn with_deprecated_version(mut self, version: &str) -> Self {
        self.versions.push(VersionDecl {
            version: Version::parse(version).expect("valid version literal"),
            deprecated: true,
            preferred: false,
        });
        self
    }

    pub fn with_bool_variant(mut self, name: &str, default: bool) -> Self {
        self.variants.push(VariantDecl {
            name: name.to_string(),
            default: VariantValue::Bool(default),
            values: Vec::new(),
            multi: false,
        });
        self
    }

    pub fn with_single_variant(mut self, name: &str, default: &str, values: &[&str]) -> Self {
        self.variants.push(VariantDecl {
            name: name.to_string(),
            default: VariantValue::Single(default.to_string()),
            values: values.iter().map(|v| v.to_string()).collect(),
            multi: false,
        });
        self
    }

    pub fn with_multi_variant(mut self, name: &str, default: &[&str], values: &[&str]) -> Self {
        self.variants.push(VariantDecl {
            name: name.to_string(),
            default: VariantValue::Multi(default.iter().map(|v| v.to_string()).collect()),
            values: values.iter().map(|v| v.to_string()).collect(),
            multi: true,
        });
        self
    }

    pub fn depends_on(mut self, name: &str, constraint: &str, kinds: &[DepKind]) -> Self {
        self.dependencies.push(DependencyDecl {
            name: name.to_string(),
            constraint: VersionConstraint::parse(constraint).expect("valid constraint literal"),
            kinds: DepKindSet::new(kinds),
            when: Condition::always(),
        });
        self
    }

    pub fn depends_when(
        mut self,
        name: &str,
        constraint: &str,
        kinds: &[DepKind],
        when: Condition,
    ) -> Self {
        self.dependencies.push(DependencyDecl {
            name: name.to_string(),
            constraint: VersionConstraint::parse(constraint).expect("valid constraint literal"),
            kinds: DepKindSet::new(kinds),
            when,
        });
        self
    }

    pub fn conflicts_with(mut self, target_name: &str, target: Condition, when: Condition) -> Self {
        self.conflicts.push(ConflictDecl {
            target_name: target_name.to_string(),
            target,
            when,
            message: None,
        });
        self
    }

    pub fn provides(mut self, virtual_name: &str, when: Condition) -> Self {
        self.provides.push(ProvidesDecl {
            virtual_name: virtual_name.to_string(),
            when,
        });
        self
    }

    pub fn variant(&self, name: &str) -> Option<&VariantDecl> {
        self.variants.iter().find(|v| v.name == name)
    }

    pub fn has_version(&self, version: &Version) -> bool {
        self.versions.iter().any(|v| &v.version == version)
    }
}

/// Query interface the concretizer consumes
pub trait FactsProvider {
    /// Full facts for a package, or None if unknown
    fn package(&self, name: &str) -> Option<&PackageFacts>;

    /// Names of packages that declare provision of a virtual capability
    fn providers(&self, virtual_name: &str) -> Vec<String>;

    fn versions(&self, name: &str) -> Result<&[VersionDecl]> {
        self.package(name)
            .map(|p| p.versions.as_slice())
            .ok_or_else(|| Error::UnknownPackage(name.to_string()))
    }

    fn variants(&self, name: &str) -> Result<&[VariantDecl]> {
        self.package(name)
            .map(|p| p.variants.as_slice())
            .ok_or_else(|| Error::UnknownPackage(name.to_string()))
    }

    fn dependencies(&self, name: &str) -> Result<&[DependencyDecl]> {
        self.package(name)
            .map(|p| p.dependencies.as_slice())
            .ok_or_else(|| Error::UnknownPackage(name.to_string()))
    }

    fn conflicts(&self, name: &str) -> Result<&[ConflictDecl]> {
        self.package(name)
            .map(|p| p.conflicts.as_slice())
            .ok_or_else(|| Error::UnknownPackage(name.to_string()))
    }

    /// A name is virtual when no package carries it but providers declare it
    fn is_virtual(&self, name: &str) -> bool {
        self.package(name).is_none() && !self.providers(name).is_empty()
    }
}

/// In-memory facts catalog
#[derive(Debug, Default)]
pub struct MemoryFacts {
    packages: BTreeMap<String, PackageFacts>,
}

impl MemoryFacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, facts: PackageFacts) -> &mut Self {
        self.packages.insert(facts.name.clone(), facts);
        self
    }

    pub fn with(mut self, facts: PackageFacts) -> Self {
        self.add(facts);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(|s| s.as_str())
    }
}

impl FactsProvider for MemoryFacts {
    fn package(&self, name: &str) -> Option<&PackageFacts> {
        self.packages.get(name)
    }

    fn providers(&self, virtual_name: &str) -> Vec<String> {
        self.packages
            .values()
            .filter(|p| p.provides.iter().any(|d| d.virtual_name == virtual_name))
            .map(|p| p.name.clone())
            .collect()
    }
}

/// Facts cache owned by one concretization run
///
/// Memoizes the provider index so repeated virtual lookups do not rescan the
/// catalog. Construct one per resolution; drop it when the run completes.
pub struct FactsCache<'a> {
    provider: &'a dyn FactsProvider,
    provider_index: std::cell::RefCell<BTreeMap<String, Vec<String>>>,
}

impl<'a> FactsCache<'a> {
    pub fn new(provider: &'a dyn FactsProvider) -> Self {
        Self {
            provider,
            provider_index: std::cell::RefCell::new(BTreeMap::new()),
        }
    }
}

impl FactsProvider for FactsCache<'_> {
    fn package(&self, name: &str) -> Option<&PackageFacts> {
        self.provider.package(name)
    }

    fn providers(&self, virtual_name: &str) -> Vec<String> {
        if let Some(cached) = self.provider_index.borrow().get(virtual_name) {
            return cached.clone();
        }
        let result = self.provider.providers(virtual_name);
        self.provider_index
            .borrow_mut()
            .insert(virtual_name.to_string(), result.clone());
        result
    }
}
