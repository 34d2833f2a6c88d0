// src/concretize/mod.rs

//! Concretization: abstract requests to a concrete dependency DAG
//!
//! The concretizer turns a set of abstract specs plus the facts catalog into
//! one fully concrete, deduplicated DAG: every node pinned to a single
//! version, variant assignment, compiler, and target; every virtual bound to
//! exactly one provider; every conflict rule honored. The whole request
//! resolves or fails together, and a failure carries the conflicting
//! constraints with their provenance. Identical inputs always produce the
//! identical graph.

mod policy;
mod solve;

pub use policy::{Criterion, Policy};
pub use solve::{
    BacktrackingSolver, DepTarget, InstalledSummary, NodeChoice, ResolvedDep, Seeds, Solution,
    Solve, SolveRequest,
};

use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::facts::{FactsCache, FactsProvider};
use crate::hash::Hash;
use crate::lockfile::Lockfile;
use crate::spec::{CompilerId, ConcreteDag, ConcreteSpec, DepEdge, Spec, SpecRecord};
use crate::version::VersionConstraint;

/// Environment-level inputs to a concretization run
#[derive(Debug, Clone)]
pub struct ConcretizerConfig {
    /// Configured toolchains; the first entry is the default when a request
    /// carries no compiler constraint
    pub compilers: Vec<CompilerId>,
    pub default_target: String,
    pub policy: Policy,
    /// Wall-clock budget for the search
    pub timeout: Option<Duration>,
}

impl Default for ConcretizerConfig {
    fn default() -> Self {
        Self {
            compilers: Vec::new(),
            default_target: "x86_64".to_string(),
            policy: Policy::default(),
            timeout: None,
        }
    }
}

/// One-shot resolver over a facts catalog
pub struct Concretizer<'a> {
    facts: FactsCache<'a>,
    config: ConcretizerConfig,
    installed: Vec<InstalledSummary>,
    solver: Box<dyn Solve>,
}

impl<'a> Concretizer<'a> {
    pub fn new(facts: &'a dyn FactsProvider, config: ConcretizerConfig) -> Self {
        Self {
            facts: FactsCache::new(facts),
            config,
            installed: Vec::new(),
            solver: Box::new(BacktrackingSolver),
        }
    }

    /// Swap in a different [`Solve`] implementation
    pub fn with_solver(mut self, solver: Box<dyn Solve>) -> Self {
        self.solver = solver;
        self
    }

    /// Feed an installed spec for the reuse criterion
    pub fn add_installed(&mut self, spec: &ConcreteSpec) {
        self.installed.push(InstalledSummary {
            name: spec.name().to_string(),
            version: spec.version().clone(),
            variants: spec.variants().clone(),
        });
    }

    /// Feed the whole install database for the reuse criterion; records that
    /// fail validation are skipped
    pub fn add_installed_records<'r>(&mut self, records: impl IntoIterator<Item = &'r SpecRecord>) {
        for record in records {
            if let Ok(spec) = record.to_spec() {
                self.add_installed(&spec);
            }
        }
    }

    /// Resolve a set of root requests into one concrete DAG
    pub fn concretize(&self, roots: &[Spec]) -> Result<ConcreteDag> {
        self.run(roots, &Seeds::default())
    }

    /// Resolve with a previous lockfile as a stability anchor: choices from
    /// the lockfile are tried first, so nodes whose constraints still admit
    /// the old choice keep their hash
    pub fn concretize_seeded(&self, roots: &[Spec], lockfile: &Lockfile) -> Result<ConcreteDag> {
        let mut seeds = Seeds::default();
        let by_hash: BTreeMap<&Hash, &SpecRecord> =
            lockfile.nodes.iter().map(|n| (&n.hash, n)).collect();
        for node in &lockfile.nodes {
            seeds.nodes.insert(
                node.name.clone(),
                (node.version.clone(), node.variants.clone()),
            );
            for dep in &node.deps {
                if let Some(vname) = &dep.virtual_name {
                    if let Some(child) = by_hash.get(&dep.hash) {
                        seeds.providers.insert(vname.clone(), child.name.clone());
                    }
                }
            }
        }
        self.run(roots, &seeds)
    }

    fn run(&self, roots: &[Spec], seeds: &Seeds) -> Result<ConcreteDag> {
        for root in roots {
            self.validate_request(root)?;
            for dep in &root.deps {
                self.validate_request(&dep.spec)?;
            }
        }

        let started = Instant::now();
        let request = SolveRequest {
            roots,
            facts: &self.facts,
            policy: &self.config.policy,
            compilers: &self.config.compilers,
            default_target: &self.config.default_target,
            installed: &self.installed,
            seeds,
            started,
            timeout: self.config.timeout,
        };
        let solution = self.solver.solve(&request)?;
        let dag = self.decode(&solution, roots)?;
        info!(
            roots = roots.len(),
            nodes = dag.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "concretization complete"
        );
        Ok(dag)
    }

    /// Surface unknown names/versions/variants before the search starts
    fn validate_request(&self, spec: &Spec) -> Result<()> {
        let Some(facts) = self.facts.package(&spec.name) else {
            if self.facts.is_virtual(&spec.name) {
                return Ok(());
            }
            return Err(Error::UnknownPackage(spec.name.clone()));
        };
        if let VersionConstraint::Exact(version) = &spec.version {
            if !facts.has_version(version) {
                return Err(Error::UnknownVersion {
                    package: spec.name.clone(),
                    version: version.to_string(),
                });
            }
        }
        for variant in spec.variants.keys() {
            if facts.variant(variant).is_none() {
                return Err(Error::UnknownVariant {
                    package: spec.name.clone(),
                    variant: variant.clone(),
                });
            }
        }
        Ok(())
    }

    fn decode(&self, solution: &Solution, roots: &[Spec]) -> Result<ConcreteDag> {
        let mut dag = ConcreteDag::new();
        let mut built: BTreeMap<String, Hash> = BTreeMap::new();
        for name in solution.chosen.keys() {
            build_node(name, solution, &self.facts, &mut built, &mut dag);
        }

        for root in roots {
            let name = if solution.chosen.contains_key(&root.name) {
                root.name.as_str()
            } else {
                solution
                    .providers
                    .get(&root.name)
                    .map(String::as_str)
                    .ok_or_else(|| Error::UnknownPackage(root.name.clone()))?
            };
            let hash = built
                .get(name)
                .cloned()
                .ok_or_else(|| Error::UnknownPackage(name.to_string()))?;
            debug!(root = %root, node = %hash.short(), "root resolved");
            dag.add_root(hash);
        }
        Ok(dag)
    }
}

/// Build a node and (recursively) its dependencies; the solver guarantees the
/// name graph is acyclic before a solution is accepted
fn build_node(
    name: &str,
    solution: &Solution,
    facts: &dyn FactsProvider,
    built: &mut BTreeMap<String, Hash>,
    dag: &mut ConcreteDag,
) -> Hash {
    if let Some(hash) = built.get(name) {
        return hash.clone();
    }
    let choice = solution.chosen.get(name).expect("chosen node present");
    let mut edges = Vec::with_capacity(choice.deps.len());
    for dep in &choice.deps {
        let (package, virtual_name) = match &dep.target {
            DepTarget::Package(p) => (p.as_str(), None),
            DepTarget::Virtual(v) => (
                solution
                    .providers
                    .get(v)
                    .expect("provider bound during solve")
                    .as_str(),
                Some(v.clone()),
            ),
        };
        let child = build_node(package, solution, facts, built, dag);
        edges.push(DepEdge {
            child,
            kinds: dep.kinds,
            virtual_name,
        });
    }

    // The build system rides along as runtime metadata: the installer needs
    // it, but it must not perturb the content hash
    let mut runtime_metadata = BTreeMap::new();
    if let Some(package) = facts.package(name) {
        runtime_metadata.insert(
            "build_system".to_string(),
            package.build_system.to_string(),
        );
    }

    let spec = ConcreteSpec::build(
        choice.name.clone(),
        choice.version.clone(),
        choice.variants.clone(),
        choice.compiler.clone(),
        choice.target.clone(),
        edges,
        runtime_metadata,
    );
    let hash = dag.insert(spec);
    built.insert(name.to_string(), hash.clone());
    hash
}
