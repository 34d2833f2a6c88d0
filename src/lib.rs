// src/lib.rs

//! Strata Package Manager Core
//!
//! Source-based package management for scientific software stacks: abstract
//! spec requests are concretized into a fully concrete, content-addressed
//! dependency DAG, which a concurrent installer then builds bottom-up.
//!
//! # Architecture
//!
//! - Facts-driven: package behavior (versions, variants, dependencies,
//!   conflicts, providers) is data supplied by a [`facts::FactsProvider`]
//! - Concretizer: deterministic backtracking solver with a configurable
//!   lexicographic optimization policy
//! - Merkle DAG: nodes keyed by SHA-256 over their build-relevant identity,
//!   so identical subtrees are always shared
//! - Installer: worker pool over the DAG with cross-process file locking,
//!   idempotent re-runs, and cascading failure
//! - Lockfiles: TOML snapshots of a concrete DAG that seed later runs for
//!   stable re-concretization

pub mod buildsys;
pub mod concretize;
pub mod db;
mod error;
pub mod facts;
pub mod hash;
pub mod hooks;
pub mod install;
pub mod lock;
pub mod lockfile;
pub mod spec;
pub mod variant;
pub mod version;

pub use buildsys::{noop_runner, BuildSystem, Phase, PhaseContext, PhaseOutcome, PhaseRunner};
pub use concretize::{
    BacktrackingSolver, Concretizer, ConcretizerConfig, Criterion, Policy, Solve, SolveRequest,
    Solution,
};
pub use db::{InstallDatabase, InstallRecord};
pub use error::{Error, Result};
pub use facts::{
    Condition, ConflictDecl, DependencyDecl, FactsCache, FactsProvider, MemoryFacts, PackageFacts,
    ProvidesDecl, VariantDecl, VersionDecl,
};
pub use hash::{Hash, Hasher};
pub use hooks::{HookContext, HookEvent, HookFn, HookOutcome, HookRegistry};
pub use install::{InstallOptions, InstallReport, Installer, PrebuiltProbe, SkipReason};
pub use lock::{LockGuard, LockManager, LockMode};
pub use lockfile::{Lockfile, LockfileError, LockfileMetadata};
pub use spec::{
    CompilerConstraint, CompilerId, ConcreteDag, ConcreteSpec, DepEdge, DepKind, DepKindSet,
    DepRequest, Spec, SpecRecord,
};
pub use variant::{VariantConstraint, VariantValue};
pub use version::{Version, VersionConstraint};
