// tests/common/mod.rs

//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use strata::{
    CompilerId, ConcretizerConfig, Condition, DepKind, MemoryFacts, PackageFacts, PhaseRunner,
    VariantConstraint, Version,
};

pub const BL: &[DepKind] = &[DepKind::Build, DepKind::Link];

pub fn gcc(version: &str) -> CompilerId {
    CompilerId::new("gcc", Version::parse(version).unwrap())
}

pub fn config() -> ConcretizerConfig {
    ConcretizerConfig {
        compilers: vec![gcc("12.2.0")],
        ..ConcretizerConfig::default()
    }
}

/// A small scientific-stack catalog: zlib, an hdf5 with an optional MPI
/// variant, two MPI providers, and an application on top.
pub fn catalog() -> MemoryFacts {
    MemoryFacts::new()
        .with(
            PackageFacts::new("zlib")
                .with_version("1.2.13")
                .with_version("1.3.1"),
        )
        .with(
            PackageFacts::new("openmpi")
                .with_version("4.1.5")
                .provides("mpi", Condition::always()),
        )
        .with(
            PackageFacts::new("mpich")
                .with_version("4.1")
                .provides("mpi", Condition::always()),
        )
        .with(
            PackageFacts::new("hdf5")
                .with_version("1.14.3")
                .with_bool_variant("mpi", false)
                .depends_on("zlib", ">=1.2", BL)
                .depends_when(
                    "mpi",
                    "*",
                    BL,
                    Condition::when_variant("mpi", VariantConstraint::Bool(true)),
                ),
        )
        .with(
            PackageFacts::new("app")
                .with_version("1.0")
                .depends_on("hdf5", "*", BL),
        )
}

/// A runner that records every phase invocation; the counter is shared so
/// concurrent installers can be audited together.
pub fn counting_runner() -> (PhaseRunner, Arc<AtomicUsize>) {
    let counter = Arc::new(AtomicUsize::new(0));
    let shared = Arc::clone(&counter);
    let runner: PhaseRunner = Arc::new(move |_ctx| {
        shared.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    (runner, counter)
}
