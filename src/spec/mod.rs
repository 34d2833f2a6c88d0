// src/spec/mod.rs

//! Package specs: abstract requests and concrete DAG nodes
//!
//! A `Spec` is a partially constrained package request (name plus optional
//! version/variant/compiler/target constraints and dependency constraints).
//! A `ConcreteSpec` is a fully resolved, immutable node in a dependency graph,
//! identified by a content hash computed over its own attributes and the
//! hashes of its build/link/run dependencies (a Merkle hash over the DAG).
//! Test-only edges and runtime metadata are excluded from the hash so that
//! run-only changes never force rebuilds of consumers.

mod dag;
mod parse;
mod record;

pub use dag::ConcreteDag;
pub use record::{DepRecord, SpecRecord};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::hash::{Hash, Hasher};
use crate::variant::{VariantConstraint, VariantValue};
use crate::version::{Version, VersionConstraint};

/// A dependency relationship kind
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum DepKind {
    Build,
    Link,
    Run,
    Test,
}

impl DepKind {
    const ALL: [DepKind; 4] = [DepKind::Build, DepKind::Link, DepKind::Run, DepKind::Test];

    const fn bit(self) -> u8 {
        match self {
            DepKind::Build => 0b0001,
            DepKind::Link => 0b0010,
            DepKind::Run => 0b0100,
            DepKind::Test => 0b1000,
        }
    }
}

/// A set of dependency kinds attached to one edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DepKindSet(u8);

impl DepKindSet {
    pub const EMPTY: DepKindSet = DepKindSet(0);

    pub fn new(kinds: &[DepKind]) -> Self {
        let mut set = DepKindSet(0);
        for kind in kinds {
            set.0 |= kind.bit();
        }
        set
    }

    /// The default relationship for an unannotated dependency
    pub fn build_link() -> Self {
        Self::new(&[DepKind::Build, DepKind::Link])
    }

    pub fn contains(&self, kind: DepKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn insert(&mut self, kind: DepKind) {
        self.0 |= kind.bit();
    }

    pub fn union(&self, other: DepKindSet) -> DepKindSet {
        DepKindSet(self.0 | other.0)
    }

    pub fn intersects(&self, other: DepKindSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Edges carrying build/link/run participate in the content hash;
    /// test-only edges do not, so test tooling changes never perturb consumers
    pub fn affects_hash(&self) -> bool {
        self.contains(DepKind::Build) || self.contains(DepKind::Link) || self.contains(DepKind::Run)
    }

    /// Edges carrying build/link gate the start of a dependent's build
    pub fn gates_build(&self) -> bool {
        self.contains(DepKind::Build) || self.contains(DepKind::Link)
    }

    pub fn iter(&self) -> impl Iterator<Item = DepKind> + '_ {
        DepKind::ALL.into_iter().filter(|k| self.contains(*k))
    }
}

impl fmt::Display for DepKindSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.iter().map(|k| k.to_string()).collect();
        write!(f, "{}", names.join(","))
    }
}

impl FromStr for DepKindSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut set = DepKindSet::EMPTY;
        for part in s.split(',').map(|p| p.trim()).filter(|p| !p.is_empty()) {
            let kind: DepKind = part
                .parse()
                .map_err(|_| Error::Parse(format!("unknown dependency kind '{}'", part)))?;
            set.insert(kind);
        }
        Ok(set)
    }
}

/// An abstract compiler request, e.g. `%gcc@>=12`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerConstraint {
    pub name: String,
    pub version: VersionConstraint,
}

impl fmt::Display for CompilerConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.version.is_any() {
            write!(f, "@{}", self.version)?;
        }
        Ok(())
    }
}

/// A fully resolved compiler/toolchain identity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompilerId {
    pub name: String,
    pub version: Version,
}

impl CompilerId {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    pub fn satisfies(&self, constraint: &CompilerConstraint) -> bool {
        self.name == constraint.name && constraint.version.satisfies(&self.version)
    }
}

impl fmt::Display for CompilerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// A dependency constraint attached to an abstract spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepRequest {
    pub spec: Spec,
    /// Empty set means "unspecified", treated as build+link
    pub kinds: DepKindSet,
}

impl DepRequest {
    pub fn new(spec: Spec) -> Self {
        Self {
            spec,
            kinds: DepKindSet::EMPTY,
        }
    }

    pub fn effective_kinds(&self) -> DepKindSet {
        if self.kinds.is_empty() {
            DepKindSet::build_link()
        } else {
            self.kinds
        }
    }
}

/// A partially constrained package request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spec {
    pub name: String,
    pub version: VersionConstraint,
    pub variants: BTreeMap<String, VariantConstraint>,
    pub compiler: Option<CompilerConstraint>,
    pub target: Option<String>,
    pub deps: Vec<DepRequest>,
}

impl Spec {
    /// An unconstrained request for a package by name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: VersionConstraint::Any,
            variants: BTreeMap::new(),
            compiler: None,
            target: None,
            deps: Vec::new(),
        }
    }

    /// Parse the textual spec syntax
    ///
    /// `name[@version][+variant|~variant|variant=value]*[%compiler][^dep]*`
    pub fn parse(input: &str) -> Result<Self> {
        parse::parse_spec(input)
    }

    /// Structural satisfaction of this request's node-local fields by a
    /// concrete node (dependency constraints are checked against the DAG by
    /// `ConcreteDag::satisfies`)
    pub fn satisfied_by_node(&self, concrete: &ConcreteSpec) -> bool {
        if self.name != concrete.name {
            return false;
        }
        if !self.version.satisfies(&concrete.version) {
            return false;
        }
        for (name, constraint) in &self.variants {
            match concrete.variants.get(name) {
                Some(value) if constraint.satisfied_by(value) => {}
                _ => return false,
            }
        }
        if let Some(cc) = &self.compiler {
            match &concrete.compiler {
                Some(id) if id.satisfies(cc) => {}
                _ => return false,
            }
        }
        if let Some(target) = &self.target {
            if target != &concrete.target {
                return false;
            }
        }
        true
    }

    /// Merge another abstract spec's node-local constraints into this one.
    /// Fails with the pair of conflicting constraint descriptions when the two
    /// cannot both hold.
    pub fn constrain(&mut self, other: &Spec) -> Result<()> {
        if self.name != other.name {
            return Err(Error::Parse(format!(
                "cannot constrain {} with {}",
                self.name, other.name
            )));
        }
        self.version = self.version.intersect(&other.version);
        for (name, constraint) in &other.variants {
            let merged = match self.variants.get(name) {
                Some(existing) => existing.intersect(constraint).ok_or_else(|| {
                    Error::Unsatisfiable {
                        constraints: vec![
                            format!("{} requires {}{}", self.name, name, existing),
                            format!("{} requires {}{}", self.name, name, constraint),
                        ],
                    }
                })?,
                None => constraint.clone(),
            };
            self.variants.insert(name.clone(), merged);
        }
        if let Some(cc) = &other.compiler {
            match &mut self.compiler {
                Some(existing) if existing.name != cc.name => {
                    return Err(Error::Unsatisfiable {
                        constraints: vec![
                            format!("{} requires %{}", self.name, existing),
                            format!("{} requires %{}", self.name, cc),
                        ],
                    });
                }
                Some(existing) => {
                    existing.version = existing.version.intersect(&cc.version);
                }
                None => self.compiler = Some(cc.clone()),
            }
        }
        if let Some(target) = &other.target {
            match &self.target {
                Some(existing) if existing != target => {
                    return Err(Error::Unsatisfiable {
                        constraints: vec![
                            format!("{} requires arch={}", self.name, existing),
                            format!("{} requires arch={}", self.name, target),
                        ],
                    });
                }
                _ => self.target = Some(target.clone()),
            }
        }
        Ok(())
    }
}

impl fmt::Display for Spec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.version.is_any() {
            write!(f, "@{}", self.version)?;
        }
        for (name, constraint) in &self.variants {
            match constraint {
                VariantConstraint::Bool(true) => write!(f, "+{}", name)?,
                VariantConstraint::Bool(false) => write!(f, "~{}", name)?,
                VariantConstraint::Value(v) => write!(f, " {}={}", name, v)?,
                VariantConstraint::Includes(_) => write!(f, " {}{}", name, constraint)?,
                VariantConstraint::Any => {}
            }
        }
        if let Some(cc) = &self.compiler {
            write!(f, " %{}", cc)?;
        }
        for dep in &self.deps {
            write!(f, " ^{}", dep.spec)?;
        }
        Ok(())
    }
}

impl FromStr for Spec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A resolved dependency edge of a concrete spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepEdge {
    pub child: Hash,
    pub kinds: DepKindSet,
    /// The virtual capability this edge was resolved for, if any
    pub virtual_name: Option<String>,
}

/// A fully resolved, immutable dependency graph node
///
/// Immutable after construction: any change requires building a new node with
/// a new hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcreteSpec {
    name: String,
    version: Version,
    variants: BTreeMap<String, VariantValue>,
    compiler: Option<CompilerId>,
    target: String,
    edges: Vec<DepEdge>,
    /// Free-form run-only metadata; excluded from the content hash
    runtime_metadata: BTreeMap<String, String>,
    hash: Hash,
}

impl ConcreteSpec {
    /// Build a concrete spec, canonicalizing edge order and computing the
    /// content hash
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        name: impl Into<String>,
        version: Version,
        variants: BTreeMap<String, VariantValue>,
        compiler: Option<CompilerId>,
        target: impl Into<String>,
        mut edges: Vec<DepEdge>,
        runtime_metadata: BTreeMap<String, String>,
    ) -> Self {
        let name = name.into();
        let target = target.into();

        // Canonical edge order, so structurally identical graphs hash
        // identically regardless of construction order
        edges.sort_by(|a, b| (&a.child, a.kinds).cmp(&(&b.child, b.kinds)));
        edges.dedup_by(|a, b| {
            if a.child == b.child && a.virtual_name == b.virtual_name {
                b.kinds = b.kinds.union(a.kinds);
                true
            } else {
                false
            }
        });

        let hash = Self::compute_hash(&name, &version, &variants, &compiler, &target, &edges);

        Self {
            name,
            version,
            variants,
            compiler,
            target,
            edges,
            runtime_metadata,
            hash,
        }
    }

    fn compute_hash(
        name: &str,
        version: &Version,
        variants: &BTreeMap<String, VariantValue>,
        compiler: &Option<CompilerId>,
        target: &str,
        edges: &[DepEdge],
    ) -> Hash {
        let mut hasher = Hasher::new();
        hasher.field(name);
        hasher.field(version.as_str());
        for (vname, value) in variants {
            hasher.field(vname);
            hasher.field(&value.canonical());
        }
        match compiler {
            Some(id) => hasher.field(&id.to_string()),
            None => hasher.field(""),
        }
        hasher.field(target);
        for edge in edges.iter().filter(|e| e.kinds.affects_hash()) {
            hasher.field(edge.child.as_str());
            hasher.field(&edge.kinds.to_string());
        }
        hasher.finalize()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn variants(&self) -> &BTreeMap<String, VariantValue> {
        &self.variants
    }

    pub fn compiler(&self) -> Option<&CompilerId> {
        self.compiler.as_ref()
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn edges(&self) -> &[DepEdge] {
        &self.edges
    }

    pub fn runtime_metadata(&self) -> &BTreeMap<String, String> {
        &self.runtime_metadata
    }

    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    /// Short human-readable identity, e.g. `zlib@1.2.13/1a2b3c4d`
    pub fn label(&self) -> String {
        format!("{}@{}/{}", self.name, self.version, self.hash.short())
    }
}

impl fmt::Display for ConcreteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)?;
        for (name, value) in &self.variants {
            match value {
                VariantValue::Bool(true) => write!(f, "+{}", name)?,
                VariantValue::Bool(false) => write!(f, "~{}", name)?,
                other => write!(f, " {}={}", name, other)?,
            }
        }
        if let Some(compiler) = &self.compiler {
            write!(f, " %{}", compiler)?;
        }
        write!(f, " arch={} /{}", self.target, self.hash.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn leaf(name: &str, version: &str) -> ConcreteSpec {
        ConcreteSpec::build(
            name,
            v(version),
            BTreeMap::new(),
            Some(CompilerId::new("gcc", v("12.2.0"))),
            "x86_64",
            Vec::new(),
            BTreeMap::new(),
        )
    }

    #[test]
    fn test_dep_kind_set() {
        let set = DepKindSet::new(&[DepKind::Build, DepKind::Link]);
        assert!(set.contains(DepKind::Build));
        assert!(!set.contains(DepKind::Run));
        assert!(set.gates_build());
        assert!(set.affects_hash());
        assert_eq!(set.to_string(), "build,link");
        assert_eq!("build,link".parse::<DepKindSet>().unwrap(), set);
    }

    #[test]
    fn test_test_only_edges_do_not_affect_hash() {
        let set = DepKindSet::new(&[DepKind::Test]);
        assert!(!set.affects_hash());
        assert!(!set.gates_build());

        let run = DepKindSet::new(&[DepKind::Run]);
        assert!(run.affects_hash());
        assert!(!run.gates_build());
    }

    #[test]
    fn test_hash_deterministic_and_order_independent() {
        let b = leaf("zlib", "1.2.13");
        let c = leaf("bzip2", "1.0.8");

        let edge_b = DepEdge {
            child: b.hash().clone(),
            kinds: DepKindSet::build_link(),
            virtual_name: None,
        };
        let edge_c = DepEdge {
            child: c.hash().clone(),
            kinds: DepKindSet::build_link(),
            virtual_name: None,
        };

        let a1 = ConcreteSpec::build(
            "tool",
            v("1.0"),
            BTreeMap::new(),
            None,
            "x86_64",
            vec![edge_b.clone(), edge_c.clone()],
            BTreeMap::new(),
        );
        let a2 = ConcreteSpec::build(
            "tool",
            v("1.0"),
            BTreeMap::new(),
            None,
            "x86_64",
            vec![edge_c, edge_b],
            BTreeMap::new(),
        );
        assert_eq!(a1.hash(), a2.hash());
    }

    #[test]
    fn test_hash_changes_with_dependency() {
        let b1 = leaf("zlib", "1.2.13");
        let b2 = leaf("zlib", "1.3");
        assert_ne!(b1.hash(), b2.hash());

        let make_parent = |dep: &ConcreteSpec| {
            ConcreteSpec::build(
                "app",
                v("1.0"),
                BTreeMap::new(),
                None,
                "x86_64",
                vec![DepEdge {
                    child: dep.hash().clone(),
                    kinds: DepKindSet::build_link(),
                    virtual_name: None,
                }],
                BTreeMap::new(),
            )
        };
        assert_ne!(make_parent(&b1).hash(), make_parent(&b2).hash());
    }

    #[test]
    fn test_runtime_metadata_excluded_from_hash() {
        let plain = leaf("py-numpy", "1.26.4");
        let with_meta = ConcreteSpec::build(
            "py-numpy",
            v("1.26.4"),
            BTreeMap::new(),
            Some(CompilerId::new("gcc", v("12.2.0"))),
            "x86_64",
            Vec::new(),
            [("entry_points".to_string(), "f2py".to_string())].into(),
        );
        assert_eq!(plain.hash(), with_meta.hash());
    }

    #[test]
    fn test_test_only_edge_excluded_from_hash() {
        let dep = leaf("cmocka", "1.1.7");
        let without = leaf("libfoo", "2.0");
        let with_test = ConcreteSpec::build(
            "libfoo",
            v("2.0"),
            BTreeMap::new(),
            Some(CompilerId::new("gcc", v("12.2.0"))),
            "x86_64",
            vec![DepEdge {
                child: dep.hash().clone(),
                kinds: DepKindSet::new(&[DepKind::Test]),
                virtual_name: None,
            }],
            BTreeMap::new(),
        );
        assert_eq!(without.hash(), with_test.hash());
    }

    #[test]
    fn test_satisfied_by_node() {
        let concrete = ConcreteSpec::build(
            "hdf5",
            v("1.14.3"),
            [("mpi".to_string(), VariantValue::Bool(true))].into(),
            Some(CompilerId::new("gcc", v("12.2.0"))),
            "x86_64",
            Vec::new(),
            BTreeMap::new(),
        );

        let mut request = Spec::parse("hdf5@>=1.14+mpi").unwrap();
        assert!(request.satisfied_by_node(&concrete));

        request.compiler = Some(CompilerConstraint {
            name: "gcc".to_string(),
            version: VersionConstraint::parse(">=12").unwrap(),
        });
        assert!(request.satisfied_by_node(&concrete));

        let wrong = Spec::parse("hdf5@<1.14").unwrap();
        assert!(!wrong.satisfied_by_node(&concrete));

        let wrong_variant = Spec::parse("hdf5~mpi").unwrap();
        assert!(!wrong_variant.satisfied_by_node(&concrete));
    }

    #[test]
    fn test_constrain_merges_and_conflicts() {
        let mut spec = Spec::parse("hdf5@>=1.12").unwrap();
        spec.constrain(&Spec::parse("hdf5+mpi").unwrap()).unwrap();
        assert_eq!(
            spec.variants.get("mpi"),
            Some(&VariantConstraint::Bool(true))
        );

        let conflict = spec.constrain(&Spec::parse("hdf5~mpi").unwrap());
        assert!(matches!(conflict, Err(Error::Unsatisfiable { .. })));
    }
}
