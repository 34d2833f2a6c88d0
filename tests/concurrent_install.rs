// tests/concurrent_install.rs

//! Two installers over one store: cross-process locking must ensure each
//! node is built exactly once, whichever installer gets there first.

mod common;

use std::sync::atomic::Ordering;
use std::thread;

use strata::{Concretizer, InstallOptions, Installer, Spec};

#[test]
fn test_no_double_build_across_installers() {
    let facts = common::catalog();
    let concretizer = Concretizer::new(&facts, common::config());
    let dag = concretizer
        .concretize(&[Spec::parse("app").unwrap()])
        .unwrap();
    assert_eq!(dag.len(), 3);

    let store = tempfile::tempdir().unwrap();
    let (runner, phases) = common::counting_runner();

    thread::scope(|scope| {
        for _ in 0..2 {
            let runner = runner.clone();
            let dag = &dag;
            let store = store.path();
            scope.spawn(move || {
                let installer = Installer::new(store, runner)
                    .unwrap()
                    .with_options(InstallOptions {
                        jobs: 2,
                        ..InstallOptions::default()
                    });
                let report = installer.install(dag).unwrap();
                assert!(report.success());
                assert_eq!(report.installed.len() + report.already_installed.len(), 3);
            });
        }
    });

    // Each of the three nodes ran its five phases exactly once
    assert_eq!(phases.load(Ordering::SeqCst), 15);

    let installer = Installer::new(store.path(), strata::noop_runner()).unwrap();
    assert_eq!(installer.database().records().unwrap().len(), 3);
}

#[test]
fn test_parallel_diamond_order() {
    // hdf5+mpi yields a diamond-ish graph with two independent leaves
    let facts = common::catalog();
    let concretizer = Concretizer::new(&facts, common::config());
    let dag = concretizer
        .concretize(&[Spec::parse("app ^hdf5+mpi").unwrap()])
        .unwrap();
    assert_eq!(dag.len(), 4);

    let store = tempfile::tempdir().unwrap();
    let (runner, _phases) = common::counting_runner();
    let installer = Installer::new(store.path(), runner)
        .unwrap()
        .with_options(InstallOptions {
            jobs: 4,
            ..InstallOptions::default()
        });

    let report = installer.install(&dag).unwrap();
    assert!(report.success());
    assert_eq!(report.installed.len(), 4);
    for hash in dag.hashes() {
        assert!(installer.database().contains(hash).unwrap());
    }
}
