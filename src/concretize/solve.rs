// src/concretize/solve.rs

//! Backtracking search over package choices
//!
//! [`Solve`] is the search boundary: it receives the candidate space
//! (facts, environment, policy, seeds, deadline) and returns one complete
//! assignment. The default implementation maintains an agenda of unresolved
//! goals (packages to pin, virtuals to bind) and a map of accumulated
//! requirements per package. Each step pops the smallest goal, enumerates
//! candidates in policy order, and recurses on a cloned state; the first
//! complete assignment wins. Every requirement carries the human-readable
//! provenance of the constraints that produced it, and a dead end merges
//! those provenances into the unsat core reported to the caller.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::facts::{ConflictDecl, FactsProvider, PackageFacts, VariantDecl, VersionDecl};
use crate::spec::{CompilerConstraint, CompilerId, DepKindSet, Spec};
use crate::variant::{VariantConstraint, VariantValue};
use crate::version::{Version, VersionConstraint};

use super::policy::{Criterion, Policy};

/// Bound on variant-assignment combinations tried per (package, version)
const MAX_VARIANT_ASSIGNMENTS: usize = 64;

/// Accumulated constraints on one package, with provenance
#[derive(Debug, Clone)]
pub(super) struct Requirement {
    pub version: VersionConstraint,
    pub variants: BTreeMap<String, VariantConstraint>,
    pub compiler: Option<CompilerConstraint>,
    pub target: Option<String>,
    pub sources: Vec<String>,
}

impl Requirement {
    pub fn new() -> Self {
        Self {
            version: VersionConstraint::Any,
            variants: BTreeMap::new(),
            compiler: None,
            target: None,
            sources: Vec::new(),
        }
    }

    pub fn from_spec(spec: &Spec, source: &str) -> Self {
        Self {
            version: spec.version.clone(),
            variants: spec.variants.clone(),
            compiler: spec.compiler.clone(),
            target: spec.target.clone(),
            sources: vec![source.to_string()],
        }
    }

    /// Merge another requirement in; on conflict, returns the combined
    /// provenance of both sides
    pub fn merge(&mut self, other: &Requirement) -> std::result::Result<(), Vec<String>> {
        let conflict = |a: &Requirement, b: &Requirement| -> Vec<String> {
            let mut core = a.sources.clone();
            core.extend(b.sources.iter().cloned());
            core
        };

        self.version = self.version.intersect(&other.version);

        for (name, constraint) in &other.variants {
            let merged = match self.variants.get(name) {
                Some(existing) => match existing.intersect(constraint) {
                    Some(merged) => merged,
                    None => return Err(conflict(self, other)),
                },
                None => constraint.clone(),
            };
            self.variants.insert(name.clone(), merged);
        }

        if let Some(cc) = &other.compiler {
            match self.compiler.take() {
                Some(existing) if existing.name != cc.name => {
                    self.compiler = Some(existing);
                    return Err(conflict(self, other));
                }
                Some(mut existing) => {
                    existing.version = existing.version.intersect(&cc.version);
                    self.compiler = Some(existing);
                }
                None => self.compiler = Some(cc.clone()),
            }
        }

        if let Some(target) = &other.target {
            match &self.target {
                Some(existing) if existing != target => {
                    return Err(conflict(self, other));
                }
                _ => self.target = Some(target.clone()),
            }
        }

        for source in &other.sources {
            if !self.sources.contains(source) {
                self.sources.push(source.clone());
            }
        }
        Ok(())
    }
}

/// What one dependency edge of a choice points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepTarget {
    Package(String),
    /// Resolved to the bound provider when the graph is decoded
    Virtual(String),
}

#[derive(Debug, Clone)]
pub struct ResolvedDep {
    pub target: DepTarget,
    pub kinds: DepKindSet,
}

/// A pinned package: everything needed to build its concrete node
#[derive(Debug, Clone)]
pub struct NodeChoice {
    pub name: String,
    pub version: Version,
    pub variants: BTreeMap<String, VariantValue>,
    pub compiler: Option<CompilerId>,
    pub target: String,
    pub deps: Vec<ResolvedDep>,
}

impl NodeChoice {
    fn satisfies(&self, req: &Requirement) -> bool {
        if !req.version.satisfies(&self.version) {
            return false;
        }
        for (name, constraint) in &req.variants {
            match self.variants.get(name) {
                Some(value) if constraint.satisfied_by(value) => {}
                _ => return false,
            }
        }
        if let Some(cc) = &req.compiler {
            match &self.compiler {
                Some(id) if id.satisfies(cc) => {}
                _ => return false,
            }
        }
        if let Some(target) = &req.target {
            if target != &self.target {
                return false;
            }
        }
        true
    }
}

/// A complete assignment
#[derive(Debug, Clone)]
pub struct Solution {
    pub chosen: BTreeMap<String, NodeChoice>,
    pub providers: BTreeMap<String, String>,
}

/// Lockfile-derived choices tried first for stability across runs
#[derive(Debug, Clone, Default)]
pub struct Seeds {
    pub nodes: BTreeMap<String, (Version, BTreeMap<String, VariantValue>)>,
    pub providers: BTreeMap<String, String>,
}

/// Name/version/variants of an installed spec, for the reuse criterion
#[derive(Debug, Clone)]
pub struct InstalledSummary {
    pub name: String,
    pub version: Version,
    pub variants: BTreeMap<String, VariantValue>,
}

/// Everything one search receives: the candidate space, the environment, the
/// optimization policy, seeds, and the deadline
pub struct SolveRequest<'a> {
    pub roots: &'a [Spec],
    pub facts: &'a dyn FactsProvider,
    pub policy: &'a Policy,
    pub compilers: &'a [CompilerId],
    pub default_target: &'a str,
    pub installed: &'a [InstalledSummary],
    pub seeds: &'a Seeds,
    pub started: Instant,
    pub timeout: Option<Duration>,
}

/// The pluggable search boundary
///
/// Any finite-domain solver that honors the request's hard constraints and
/// realizes the policy as its candidate ordering can stand in for the
/// default backtracking implementation.
pub trait Solve {
    fn solve(&self, request: &SolveRequest<'_>) -> Result<Solution>;
}

/// Default chronological-backtracking solver
#[derive(Debug, Clone, Copy, Default)]
pub struct BacktrackingSolver;

impl Solve for BacktrackingSolver {
    fn solve(&self, request: &SolveRequest<'_>) -> Result<Solution> {
        let search = Search {
            facts: request.facts,
            policy: request.policy,
            compilers: request.compilers,
            default_target: request.default_target,
            installed: request.installed,
            seeds: request.seeds,
            started: request.started,
            timeout: request.timeout,
        };
        search.solve(request.roots)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Goal {
    Package(String),
    Virtual(String),
}

#[derive(Debug, Clone, Default)]
struct State {
    chosen: BTreeMap<String, NodeChoice>,
    reqs: BTreeMap<String, Requirement>,
    /// Constraints accumulated against unbound virtual names
    vreqs: BTreeMap<String, Requirement>,
    providers: BTreeMap<String, String>,
    /// Virtual names each chosen-or-pending provider must actually provide
    must_provide: BTreeMap<String, BTreeSet<String>>,
    agenda: BTreeSet<Goal>,
    /// Conflict rules whose `when` held on an already-chosen node, checked
    /// against every later choice
    active_conflicts: Vec<(String, ConflictDecl)>,
}

enum Step {
    Solved(Solution),
    Dead(Vec<String>),
}

struct Search<'a> {
    facts: &'a dyn FactsProvider,
    policy: &'a Policy,
    compilers: &'a [CompilerId],
    default_target: &'a str,
    installed: &'a [InstalledSummary],
    seeds: &'a Seeds,
    started: Instant,
    timeout: Option<Duration>,
}

impl Search<'_> {
    fn solve(&self, roots: &[Spec]) -> Result<Solution> {
        let mut state = State::default();

        for root in roots {
            let source = format!("root request: {root}");
            if self.facts.package(&root.name).is_some() {
                self.add_requirement(&mut state, &root.name, Requirement::from_spec(root, &source))
                    .map_err(|core| self.unsat(core))?;
                self.want_package(&mut state, &root.name);
            } else if self.facts.is_virtual(&root.name) {
                let req = Requirement::from_spec(root, &source);
                self.add_virtual_requirement(&mut state, &root.name, req)
                    .map_err(|core| self.unsat(core))?;
            } else {
                return Err(Error::UnknownPackage(root.name.clone()));
            }

            for dep in &root.deps {
                let dep_req = Requirement::from_spec(&dep.spec, &source);
                if self.facts.package(&dep.spec.name).is_some() {
                    self.add_requirement(&mut state, &dep.spec.name, dep_req)
                        .map_err(|core| self.unsat(core))?;
                    self.want_package(&mut state, &dep.spec.name);
                } else if self.facts.is_virtual(&dep.spec.name) {
                    self.add_virtual_requirement(&mut state, &dep.spec.name, dep_req)
                        .map_err(|core| self.unsat(core))?;
                } else {
                    return Err(Error::UnknownPackage(dep.spec.name.clone()));
                }
            }
        }

        debug!(roots = roots.len(), "starting search");
        match self.search(state)? {
            Step::Solved(solution) => {
                debug!(nodes = solution.chosen.len(), "search complete");
                Ok(solution)
            }
            Step::Dead(core) => Err(self.unsat(core)),
        }
    }

    fn unsat(&self, core: Vec<String>) -> Error {
        Error::Unsatisfiable {
            constraints: dedup_core(self.prune_core(core)),
        }
    }

    /// Keep only the constraint chain implicated in the contradiction
    ///
    /// Diagnostic lines (dead-end messages) seed the set of implicated
    /// package and virtual names; provenance lines survive only when they
    /// mention an implicated name, and each kept line widens the set until a
    /// fixpoint. Constraints on packages unrelated to the failure drop out.
    fn prune_core(&self, core: Vec<String>) -> Vec<String> {
        let is_provenance =
            |line: &str| line.starts_with("root request:") || line.contains(" depends on ");
        let mut relevant: BTreeSet<String> = BTreeSet::new();
        for line in core.iter().filter(|l| !is_provenance(l)) {
            relevant.extend(self.names_in(line));
        }
        if relevant.is_empty() {
            return core;
        }
        loop {
            let mut grew = false;
            for line in core.iter().filter(|l| is_provenance(l)) {
                let names = self.names_in(line);
                if names.iter().any(|n| relevant.contains(n)) {
                    for name in names {
                        grew |= relevant.insert(name);
                    }
                }
            }
            if !grew {
                break;
            }
        }
        core.into_iter()
            .filter(|line| {
                !is_provenance(line) || self.names_in(line).iter().any(|n| relevant.contains(n))
            })
            .collect()
    }

    /// Known package/virtual names mentioned in a core line
    fn names_in(&self, line: &str) -> BTreeSet<String> {
        line.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'))
            .filter(|token| !token.is_empty())
            .filter(|token| {
                self.facts.package(token).is_some() || self.facts.is_virtual(token)
            })
            .map(str::to_string)
            .collect()
    }

    fn check_deadline(&self) -> Result<()> {
        if let Some(limit) = self.timeout {
            let elapsed = self.started.elapsed();
            if elapsed >= limit {
                return Err(Error::ConcretizationTimeout {
                    elapsed_ms: elapsed.as_millis() as u64,
                });
            }
        }
        Ok(())
    }

    fn search(&self, mut state: State) -> Result<Step> {
        self.check_deadline()?;
        let Some(goal) = state.agenda.iter().next().cloned() else {
            return Ok(self.finish(state));
        };
        state.agenda.remove(&goal);
        match goal {
            Goal::Package(name) => self.choose_package(state, &name),
            Goal::Virtual(vname) => self.choose_provider(state, &vname),
        }
    }

    /// Completed assignment: verify acyclicity before accepting
    fn finish(&self, state: State) -> Step {
        if let Some(cycle) = detect_cycle(&state.chosen, &state.providers) {
            return Step::Dead(vec![format!(
                "dependency cycle: {}",
                cycle.join(" -> ")
            )]);
        }
        Step::Solved(Solution {
            chosen: state.chosen,
            providers: state.providers,
        })
    }

    fn want_package(&self, state: &mut State, name: &str) {
        if !state.chosen.contains_key(name) {
            state.agenda.insert(Goal::Package(name.to_string()));
        }
    }

    /// Merge a requirement into a package's accumulated constraints; fails
    /// when the merge conflicts or an already-pinned choice no longer fits
    fn add_requirement(
        &self,
        state: &mut State,
        name: &str,
        req: Requirement,
    ) -> std::result::Result<(), Vec<String>> {
        let entry = state
            .reqs
            .entry(name.to_string())
            .or_insert_with(Requirement::new);
        entry.merge(&req)?;
        if let Some(choice) = state.chosen.get(name) {
            if !choice.satisfies(entry) {
                let mut core = entry.sources.clone();
                core.push(format!(
                    "{} is already pinned to {}@{}",
                    name, choice.name, choice.version
                ));
                return Err(core);
            }
        }
        Ok(())
    }

    /// Route a constraint on a virtual name: to the bound provider if one
    /// exists, otherwise into the virtual's pending requirement
    fn add_virtual_requirement(
        &self,
        state: &mut State,
        vname: &str,
        req: Requirement,
    ) -> std::result::Result<(), Vec<String>> {
        if let Some(provider) = state.providers.get(vname).cloned() {
            return self.add_requirement(state, &provider, req);
        }
        state
            .vreqs
            .entry(vname.to_string())
            .or_insert_with(Requirement::new)
            .merge(&req)?;
        state.agenda.insert(Goal::Virtual(vname.to_string()));
        Ok(())
    }

    fn choose_provider(&self, state: State, vname: &str) -> Result<Step> {
        if state.providers.contains_key(vname) {
            return self.search(state);
        }

        let vreq = state
            .vreqs
            .get(vname)
            .cloned()
            .unwrap_or_else(Requirement::new);
        let candidates = self.provider_candidates(vname, &state);
        if candidates.is_empty() {
            let mut core = vreq.sources.clone();
            core.push(format!("no package provides {vname}"));
            return Ok(Step::Dead(core));
        }

        let mut core = vreq.sources.clone();
        for provider in candidates {
            trace!(virtual_name = vname, provider = provider.as_str(), "trying provider");
            let mut next = state.clone();
            next.providers.insert(vname.to_string(), provider.clone());
            next.must_provide
                .entry(provider.clone())
                .or_default()
                .insert(vname.to_string());
            if let Err(conflict) = self.add_requirement(&mut next, &provider, vreq.clone()) {
                core.extend(conflict);
                continue;
            }
            self.want_package(&mut next, &provider);
            match self.search(next) {
                Ok(Step::Solved(solution)) => return Ok(Step::Solved(solution)),
                Ok(Step::Dead(dead)) => core.extend(dead),
                Err(Error::Unsatisfiable { constraints }) => core.extend(constraints),
                Err(other) => return Err(other),
            }
        }
        Ok(Step::Dead(core))
    }

    /// Providers in policy order: already-in-graph first (minimal nodes),
    /// then lockfile-seeded, then installed, then by name
    fn provider_candidates(&self, vname: &str, state: &State) -> Vec<String> {
        let mut names = self.facts.providers(vname);
        names.sort();
        names.dedup();

        let minimal = self.policy.has(Criterion::MinimalNodes);
        let reuse = self.policy.has(Criterion::Reuse);
        let seeded = self.seeds.providers.get(vname);
        names.sort_by_key(|name| {
            (
                !(minimal && state.chosen.contains_key(name)),
                seeded != Some(name),
                !(reuse && self.installed.iter().any(|i| &i.name == name)),
                name.clone(),
            )
        });
        names
    }

    fn choose_package(&self, state: State, name: &str) -> Result<Step> {
        if state.chosen.contains_key(name) {
            return self.search(state);
        }
        let facts = self
            .facts
            .package(name)
            .ok_or_else(|| Error::UnknownPackage(name.to_string()))?;
        let req = state
            .reqs
            .get(name)
            .cloned()
            .unwrap_or_else(Requirement::new);

        for variant in req.variants.keys() {
            if facts.variant(variant).is_none() {
                return Err(Error::UnknownVariant {
                    package: name.to_string(),
                    variant: variant.clone(),
                });
            }
        }

        let versions = self.version_candidates(facts, &req);
        if versions.is_empty() {
            let mut core = req.sources.clone();
            core.push(format!(
                "no declared version of {} satisfies @{}",
                name, req.version
            ));
            return Ok(Step::Dead(core));
        }

        let mut core = Vec::new();
        for version in versions {
            let assignments = match self.variant_assignments(facts, &req) {
                Some(assignments) => assignments,
                None => {
                    core.extend(req.sources.iter().cloned());
                    core.push(format!(
                        "no legal variant assignment for {name}@{version}"
                    ));
                    continue;
                }
            };
            for variants in assignments {
                match self.try_node(state.clone(), name, facts, &version, variants, &req) {
                    Ok(Step::Solved(solution)) => return Ok(Step::Solved(solution)),
                    Ok(Step::Dead(dead)) => core.extend(dead),
                    Err(Error::Unsatisfiable { constraints }) => core.extend(constraints),
                    Err(other) => return Err(other),
                }
            }
        }
        core.extend(req.sources.iter().cloned());
        Ok(Step::Dead(core))
    }

    /// Feasible versions in policy order
    fn version_candidates(&self, facts: &PackageFacts, req: &Requirement) -> Vec<Version> {
        let seed = self.seeds.nodes.get(&facts.name).map(|(v, _)| v);
        let mut feasible: Vec<&VersionDecl> = facts
            .versions
            .iter()
            .filter(|d| req.version.satisfies(&d.version))
            .collect();

        feasible.sort_by_key(|d| {
            let mut flags = Vec::new();
            for criterion in &self.policy.criteria {
                match criterion {
                    Criterion::PreferredVersion => flags.push(!d.preferred),
                    Criterion::Reuse => flags.push(!self.is_installed(&facts.name, &d.version)),
                    _ => {}
                }
            }
            (
                seed != Some(&d.version),
                d.deprecated,
                flags,
                std::cmp::Reverse(d.version.clone()),
            )
        });
        feasible.into_iter().map(|d| d.version.clone()).collect()
    }

    fn is_installed(&self, name: &str, version: &Version) -> bool {
        self.installed
            .iter()
            .any(|i| i.name == name && &i.version == version)
    }

    /// Enumerate variant assignments for one version, best-first; None when a
    /// required value is illegal for its declaration
    fn variant_assignments(
        &self,
        facts: &PackageFacts,
        req: &Requirement,
    ) -> Option<Vec<BTreeMap<String, VariantValue>>> {
        let seed_variants = self
            .seeds
            .nodes
            .get(&facts.name)
            .map(|(_, variants)| variants);
        let default_first = self.policy.has(Criterion::DefaultVariants);

        let mut per_variant: Vec<(String, Vec<VariantValue>)> = Vec::new();
        for decl in &facts.variants {
            let mut options = match req.variants.get(&decl.name) {
                Some(VariantConstraint::Bool(b)) => vec![VariantValue::Bool(*b)],
                Some(VariantConstraint::Value(v)) => {
                    if decl.multi {
                        vec![VariantValue::Multi([v.clone()].into())]
                    } else {
                        vec![VariantValue::Single(v.clone())]
                    }
                }
                Some(VariantConstraint::Includes(set)) => {
                    vec![VariantValue::Multi(set.clone())]
                }
                Some(VariantConstraint::Any) | None => free_options(decl),
            };

            options.retain(|value| decl.allows(value));
            if options.is_empty() {
                return None;
            }
            if !default_first {
                options.sort_by_key(|v| v.canonical());
            }
            if let Some(seeded) = seed_variants.and_then(|s| s.get(&decl.name)) {
                if let Some(pos) = options.iter().position(|v| v == seeded) {
                    let value = options.remove(pos);
                    options.insert(0, value);
                }
            }
            per_variant.push((decl.name.clone(), options));
        }

        Some(cartesian(&per_variant, MAX_VARIANT_ASSIGNMENTS))
    }

    fn pick_compiler(&self, constraint: Option<&CompilerConstraint>) -> Option<CompilerId> {
        match constraint {
            None => self.compilers.first().cloned(),
            Some(cc) => self
                .compilers
                .iter()
                .filter(|c| c.satisfies(cc))
                .max_by(|a, b| a.version.cmp(&b.version))
                .cloned(),
        }
    }

    fn try_node(
        &self,
        mut state: State,
        name: &str,
        facts: &PackageFacts,
        version: &Version,
        variants: BTreeMap<String, VariantValue>,
        req: &Requirement,
    ) -> Result<Step> {
        self.check_deadline()?;
        trace!(package = name, version = %version, "trying candidate");

        let compiler = match (req.compiler.as_ref(), self.pick_compiler(req.compiler.as_ref())) {
            (Some(cc), None) => {
                let mut core = req.sources.clone();
                core.push(format!("no configured compiler satisfies %{cc}"));
                return Ok(Step::Dead(core));
            }
            (_, picked) => picked,
        };
        let target = req
            .target
            .clone()
            .unwrap_or_else(|| self.default_target.to_string());

        // A provider candidate must actually provide everything it was bound
        // for at this version/variant combination
        if let Some(virtuals) = state.must_provide.get(name) {
            for vname in virtuals {
                let provided = facts
                    .provides
                    .iter()
                    .any(|p| &p.virtual_name == vname && p.when.holds(version, &variants));
                if !provided {
                    return Ok(Step::Dead(vec![format!(
                        "{name}@{version} does not provide {vname}"
                    )]));
                }
            }
        }

        // Conflict rules active on this candidate, against the graph so far
        let my_conflicts: Vec<&ConflictDecl> = facts
            .conflicts
            .iter()
            .filter(|c| c.when.holds(version, &variants))
            .collect();
        for conflict in &my_conflicts {
            if let Some(other) = state.chosen.get(&conflict.target_name) {
                if conflict.target.holds(&other.version, &other.variants) {
                    return Ok(Step::Dead(conflict_core(
                        &format!("{name}@{version}"),
                        conflict,
                        &format!("{}@{}", other.name, other.version),
                    )));
                }
            }
        }
        // Rules registered by earlier choices, against this candidate
        for (owner, conflict) in &state.active_conflicts {
            if conflict.target_name == name && conflict.target.holds(version, &variants) {
                return Ok(Step::Dead(conflict_core(
                    owner,
                    conflict,
                    &format!("{name}@{version}"),
                )));
            }
        }

        // Expand dependency declarations whose condition holds
        let mut deps = Vec::new();
        for decl in facts
            .dependencies
            .iter()
            .filter(|d| d.when.holds(version, &variants))
        {
            let kinds = if decl.kinds.is_empty() {
                DepKindSet::build_link()
            } else {
                decl.kinds
            };
            let source = format!(
                "{name}@{version} depends on {}@{}",
                decl.name, decl.constraint
            );
            let mut dep_req = Requirement::new();
            dep_req.version = decl.constraint.clone();
            dep_req.sources = vec![source];

            if self.facts.package(&decl.name).is_some() {
                if let Err(core) = self.add_requirement(&mut state, &decl.name, dep_req) {
                    return Ok(Step::Dead(core));
                }
                self.want_package(&mut state, &decl.name);
                deps.push(ResolvedDep {
                    target: DepTarget::Package(decl.name.clone()),
                    kinds,
                });
            } else if self.facts.is_virtual(&decl.name) {
                if let Err(core) = self.add_virtual_requirement(&mut state, &decl.name, dep_req) {
                    return Ok(Step::Dead(core));
                }
                deps.push(ResolvedDep {
                    target: DepTarget::Virtual(decl.name.clone()),
                    kinds,
                });
            } else {
                return Err(Error::UnknownPackage(decl.name.clone()));
            }
        }

        for conflict in my_conflicts {
            state
                .active_conflicts
                .push((format!("{name}@{version}"), conflict.clone()));
        }
        state.chosen.insert(
            name.to_string(),
            NodeChoice {
                name: name.to_string(),
                version: version.clone(),
                variants,
                compiler,
                target,
                deps,
            },
        );
        self.search(state)
    }
}

/// Candidate values for an unconstrained variant, default first
fn free_options(decl: &VariantDecl) -> Vec<VariantValue> {
    match &decl.default {
        VariantValue::Bool(b) => vec![VariantValue::Bool(*b), VariantValue::Bool(!*b)],
        VariantValue::Single(default) => {
            let mut options = vec![VariantValue::Single(default.clone())];
            for value in &decl.values {
                if value != default {
                    options.push(VariantValue::Single(value.clone()));
                }
            }
            options
        }
        // Multi variants stay at their default unless constrained
        VariantValue::Multi(_) => vec![decl.default.clone()],
    }
}

/// Bounded cartesian product over per-variant option lists, first tuple =
/// all-first-choices
fn cartesian(
    per_variant: &[(String, Vec<VariantValue>)],
    limit: usize,
) -> Vec<BTreeMap<String, VariantValue>> {
    let mut result = vec![BTreeMap::new()];
    for (name, options) in per_variant {
        let mut grown = Vec::new();
        for assignment in &result {
            for option in options {
                if grown.len() >= limit {
                    break;
                }
                let mut next = assignment.clone();
                next.insert(name.clone(), option.clone());
                grown.push(next);
            }
        }
        result = grown;
    }
    result.truncate(limit);
    result
}

fn conflict_core(owner: &str, conflict: &ConflictDecl, matched: &str) -> Vec<String> {
    let mut line = format!("{owner}: {conflict}");
    if let Some(message) = &conflict.message {
        line.push_str(&format!(" ({message})"));
    }
    vec![line, format!("{matched} is selected")]
}

/// DFS cycle detection over the chosen name graph
fn detect_cycle(
    chosen: &BTreeMap<String, NodeChoice>,
    providers: &BTreeMap<String, String>,
) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    fn visit(
        name: &str,
        chosen: &BTreeMap<String, NodeChoice>,
        providers: &BTreeMap<String, String>,
        colors: &mut BTreeMap<String, Color>,
        path: &mut Vec<String>,
    ) -> bool {
        colors.insert(name.to_string(), Color::Gray);
        path.push(name.to_string());
        if let Some(choice) = chosen.get(name) {
            for dep in &choice.deps {
                let next = match &dep.target {
                    DepTarget::Package(p) => p.as_str(),
                    DepTarget::Virtual(v) => match providers.get(v) {
                        Some(p) => p.as_str(),
                        None => continue,
                    },
                };
                match colors.get(next).copied().unwrap_or(Color::White) {
                    Color::Gray => {
                        path.push(next.to_string());
                        return true;
                    }
                    Color::White => {
                        if visit(next, chosen, providers, colors, path) {
                            return true;
                        }
                    }
                    Color::Black => {}
                }
            }
        }
        colors.insert(name.to_string(), Color::Black);
        path.pop();
        false
    }

    let mut colors = BTreeMap::new();
    for name in chosen.keys() {
        if colors.get(name.as_str()).copied().unwrap_or(Color::White) == Color::White {
            let mut path = Vec::new();
            if visit(name, chosen, providers, &mut colors, &mut path) {
                return Some(path);
            }
        }
    }
    None
}

pub(super) fn dedup_core(core: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    core.into_iter().filter(|c| seen.insert(c.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirement_merge_conflict_keeps_sources() {
        let spec_a = Spec::parse("hdf5+mpi").unwrap();
        let spec_b = Spec::parse("hdf5~mpi").unwrap();
        let mut req = Requirement::from_spec(&spec_a, "root request: hdf5+mpi");
        let err = req
            .merge(&Requirement::from_spec(&spec_b, "trilinos depends on hdf5~mpi"))
            .unwrap_err();
        assert!(err.iter().any(|s| s.contains("root request")));
        assert!(err.iter().any(|s| s.contains("trilinos")));
    }

    #[test]
    fn test_cartesian_first_is_all_defaults() {
        let per = vec![
            (
                "shared".to_string(),
                vec![VariantValue::Bool(true), VariantValue::Bool(false)],
            ),
            (
                "mpi".to_string(),
                vec![VariantValue::Bool(false), VariantValue::Bool(true)],
            ),
        ];
        let combos = cartesian(&per, 16);
        assert_eq!(combos.len(), 4);
        assert_eq!(combos[0].get("shared"), Some(&VariantValue::Bool(true)));
        assert_eq!(combos[0].get("mpi"), Some(&VariantValue::Bool(false)));
    }

    #[test]
    fn test_cartesian_respects_limit() {
        let options = vec![
            VariantValue::Single("a".to_string()),
            VariantValue::Single("b".to_string()),
            VariantValue::Single("c".to_string()),
        ];
        let per = vec![
            ("x".to_string(), options.clone()),
            ("y".to_string(), options.clone()),
            ("z".to_string(), options),
        ];
        assert!(cartesian(&per, 10).len() <= 10);
    }

    #[test]
    fn test_dedup_core_preserves_order() {
        let core = vec![
            "b".to_string(),
            "a".to_string(),
            "b".to_string(),
        ];
        assert_eq!(dedup_core(core), vec!["b".to_string(), "a".to_string()]);
    }
}
