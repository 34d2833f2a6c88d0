// src/install/mod.rs

//! Concurrent DAG installer
//!
//! Walks a concrete DAG bottom-up with a fixed worker pool: a node becomes
//! ready when every build/link dependency is installed (run-only edges do not
//! gate), and ready nodes build in parallel. Each worker takes the node's
//! exclusive cross-process lock, re-checks the database under it, and either
//! short-circuits (another process finished the node) or drives the build
//! phases and records the result. A node failure skips its transitive
//! build/link dependents; independent subtrees keep going unless fail-fast
//! is set. The run is summarized in an [`InstallReport`] with every node in
//! exactly one bucket.

mod report;

pub use report::{InstallReport, SkipReason};

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::buildsys::{BuildSystem, PhaseContext, PhaseRunner};
use crate::db::{InstallDatabase, InstallRecord};
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::hooks::{HookContext, HookEvent, HookRegistry};
use crate::lock::{LockManager, LockMode};
use crate::spec::{ConcreteDag, ConcreteSpec, DepKind, DepKindSet};

/// Optional binary-cache probe: attempt to place a prebuilt artifact at the
/// prefix, returning whether it did (true skips the build phases)
pub type PrebuiltProbe =
    Arc<dyn Fn(&ConcreteSpec, &Path) -> std::result::Result<bool, String> + Send + Sync>;

#[derive(Clone)]
pub struct InstallOptions {
    /// Worker threads
    pub jobs: usize,
    /// Cancel everything on the first failure instead of finishing
    /// independent subtrees
    pub fail_fast: bool,
    /// Rebuild even when the database already records the node
    pub force: bool,
    /// Budget for node and database lock acquisition
    pub lock_timeout: Option<Duration>,
    pub prebuilt: Option<PrebuiltProbe>,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            fail_fast: false,
            force: false,
            lock_timeout: Some(Duration::from_secs(60)),
            prebuilt: None,
        }
    }
}

impl fmt::Debug for InstallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallOptions")
            .field("jobs", &self.jobs)
            .field("fail_fast", &self.fail_fast)
            .field("force", &self.force)
            .field("lock_timeout", &self.lock_timeout)
            .field("prebuilt", &self.prebuilt.is_some())
            .finish()
    }
}

/// What one worker reports back for one node
#[derive(Debug)]
enum NodeOutcome {
    Installed,
    AlreadyInstalled,
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeState {
    /// Waiting on this many gating dependencies
    Waiting(usize),
    Running,
    Finished,
}

/// Installer over one store directory
pub struct Installer {
    store_root: PathBuf,
    db: InstallDatabase,
    locks: LockManager,
    hooks: HookRegistry,
    runner: PhaseRunner,
    options: InstallOptions,
    cancel: Arc<AtomicBool>,
}

impl Installer {
    pub fn new(store_root: impl Into<PathBuf>, runner: PhaseRunner) -> Result<Self> {
        let store_root = store_root.into();
        fs::create_dir_all(store_root.join("staging"))?;
        fs::create_dir_all(store_root.join("pkgs"))?;
        let db = InstallDatabase::new(&store_root)?;
        let locks = LockManager::new(store_root.join("locks"))?;
        Ok(Self {
            store_root,
            db,
            locks,
            hooks: HookRegistry::new(),
            runner,
            options: InstallOptions::default(),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_options(mut self, options: InstallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn database(&self) -> &InstallDatabase {
        &self.db
    }

    /// Request cancellation; in-flight phases finish, nothing new starts
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Shareable cancellation flag, for signal handlers and watchdogs
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Install prefix for a node: `<store>/pkgs/<name>-<version>-<hash8>`
    pub fn prefix_for(&self, spec: &ConcreteSpec) -> PathBuf {
        self.store_root.join("pkgs").join(format!(
            "{}-{}-{}",
            spec.name(),
            spec.version(),
            spec.hash().short()
        ))
    }

    /// Remove an installed spec, refusing while installed dependents remain
    /// (unless forced); deletes the prefix after the record
    pub fn uninstall(&self, hash: &Hash, force: bool) -> Result<InstallRecord> {
        let _guard = self.locks.write_db(self.options.lock_timeout)?;
        let record = self.db.uninstall(hash, force)?;
        if record.prefix.exists() {
            fs::remove_dir_all(&record.prefix)?;
        }
        Ok(record)
    }

    /// Install every node of the DAG, dependencies first
    pub fn install(&self, dag: &ConcreteDag) -> Result<InstallReport> {
        dag.topological_order()?;
        let total = dag.len();
        if total == 0 {
            return Ok(InstallReport::default());
        }

        let roots: HashSet<Hash> = dag.roots().iter().cloned().collect();
        let mut states: HashMap<Hash, NodeState> = HashMap::with_capacity(total);
        let mut gating_parents: HashMap<Hash, Vec<Hash>> = HashMap::new();
        for spec in dag.iter() {
            let mut gate_count = 0;
            for edge in spec.edges() {
                if edge.kinds.gates_build() {
                    gate_count += 1;
                    gating_parents
                        .entry(edge.child.clone())
                        .or_default()
                        .push(spec.hash().clone());
                }
            }
            states.insert(spec.hash().clone(), NodeState::Waiting(gate_count));
        }

        let jobs = self.options.jobs.max(1);
        info!(nodes = total, jobs, "starting install");

        let (job_tx, job_rx) = mpsc::channel::<Hash>();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, result_rx) = mpsc::channel::<(Hash, NodeOutcome)>();
        let roots = &roots;

        let mut report = thread::scope(|scope| -> Result<InstallReport> {
            for _ in 0..jobs {
                let job_rx = Arc::clone(&job_rx);
                let result_tx = result_tx.clone();
                scope.spawn(move || loop {
                    let job = job_rx.lock().expect("job queue poisoned").recv();
                    let Ok(hash) = job else { break };
                    let Some(spec) = dag.node(&hash) else { break };
                    let explicit = roots.contains(&hash);
                    let outcome = self.install_node(spec, explicit);
                    if result_tx.send((hash, outcome)).is_err() {
                        break;
                    }
                });
            }
            drop(result_tx);

            let dispatch_failed = || Error::Cancelled("worker pool shut down".to_string());

            let mut report = InstallReport::default();
            let mut finished = 0usize;

            let ready: Vec<Hash> = states
                .iter()
                .filter(|(_, s)| **s == NodeState::Waiting(0))
                .map(|(h, _)| h.clone())
                .collect();
            for hash in ready {
                states.insert(hash.clone(), NodeState::Running);
                job_tx.send(hash).map_err(|_| dispatch_failed())?;
            }

            while finished < total {
                let (hash, outcome) = result_rx
                    .recv()
                    .map_err(|_| Error::Cancelled("worker pool terminated".to_string()))?;
                states.insert(hash.clone(), NodeState::Finished);
                finished += 1;

                match outcome {
                    NodeOutcome::Installed | NodeOutcome::AlreadyInstalled => {
                        match outcome {
                            NodeOutcome::Installed => report.installed.push(hash.clone()),
                            _ => report.already_installed.push(hash.clone()),
                        }
                        for parent in gating_parents.get(&hash).cloned().unwrap_or_default() {
                            let mut now_ready = false;
                            if let Some(NodeState::Waiting(n)) = states.get_mut(&parent) {
                                *n -= 1;
                                now_ready = *n == 0;
                            }
                            if now_ready {
                                states.insert(parent.clone(), NodeState::Running);
                                job_tx.send(parent).map_err(|_| dispatch_failed())?;
                            }
                        }
                    }
                    NodeOutcome::Failed(cause) => {
                        report.failed.push((hash.clone(), cause));
                        cascade_skip(
                            dag,
                            &hash,
                            &SkipReason::DependencyFailed(hash.clone()),
                            &mut states,
                            &mut report,
                            &mut finished,
                        );
                        if self.options.fail_fast {
                            self.cancel();
                        }
                    }
                    NodeOutcome::Cancelled => {
                        report.skipped.push((hash.clone(), SkipReason::Cancelled));
                        cascade_skip(
                            dag,
                            &hash,
                            &SkipReason::Cancelled,
                            &mut states,
                            &mut report,
                            &mut finished,
                        );
                    }
                }
            }
            drop(job_tx);
            Ok(report)
        })?;

        // Installed nodes whose run-only dependencies did not complete
        let mut incomplete: HashSet<Hash> = HashSet::new();
        let broken: Vec<Hash> = report
            .failed
            .iter()
            .map(|(h, _)| h.clone())
            .chain(report.skipped.iter().map(|(h, _)| h.clone()))
            .collect();
        for hash in &broken {
            for dependent in dag.transitive_dependents(hash, DepKindSet::new(&[DepKind::Run])) {
                if report.installed.contains(&dependent)
                    || report.already_installed.contains(&dependent)
                {
                    incomplete.insert(dependent);
                }
            }
        }
        report.runtime_incomplete = incomplete.into_iter().collect();

        report.sort();
        info!(
            installed = report.installed.len(),
            already_installed = report.already_installed.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "install finished"
        );
        Ok(report)
    }

    /// One node, inside a worker: lock, re-check, build, record
    fn install_node(&self, spec: &ConcreteSpec, explicit: bool) -> NodeOutcome {
        if self.cancel.load(Ordering::SeqCst) {
            return NodeOutcome::Cancelled;
        }

        let _node_guard = match self.locks.lock(
            spec.hash().as_str(),
            LockMode::Exclusive,
            self.options.lock_timeout,
        ) {
            Ok(guard) => guard,
            Err(err) => return NodeOutcome::Failed(err.to_string()),
        };

        // Another process may have finished this node while we waited; the
        // shared database lock orders the read against in-flight writers
        let installed = {
            let _db_guard = match self.locks.read_db(self.options.lock_timeout) {
                Ok(guard) => guard,
                Err(err) => return NodeOutcome::Failed(err.to_string()),
            };
            self.db.contains(spec.hash())
        };
        match installed {
            Ok(true) if !self.options.force => {
                debug!(spec = %spec.label(), "already installed");
                if explicit {
                    if let Err(err) = self.mark_explicit(spec) {
                        return NodeOutcome::Failed(err.to_string());
                    }
                }
                return NodeOutcome::AlreadyInstalled;
            }
            Ok(_) => {}
            Err(err) => return NodeOutcome::Failed(err.to_string()),
        }

        let prefix = self.prefix_for(spec);
        let node_ctx = HookContext {
            spec,
            phase: None,
            prefix: &prefix,
        };
        if let Err(cause) = self.hooks.fire(HookEvent::PreInstall, &node_ctx) {
            return self.fail_node(spec, &prefix, cause);
        }
        // A prefix left behind by a failed or interrupted attempt is untrusted
        if prefix.exists() {
            if let Err(err) = fs::remove_dir_all(&prefix) {
                return self.fail_node(spec, &prefix, err.to_string());
            }
        }
        if let Err(err) = fs::create_dir_all(&prefix) {
            return self.fail_node(spec, &prefix, err.to_string());
        }

        let mut fetched_prebuilt = false;
        if let Some(probe) = &self.options.prebuilt {
            match probe(spec, &prefix) {
                Ok(true) => {
                    debug!(spec = %spec.label(), "installed from prebuilt artifact");
                    fetched_prebuilt = true;
                }
                Ok(false) => {}
                Err(cause) => {
                    return self.fail_node(spec, &prefix, format!("prebuilt fetch failed: {cause}"));
                }
            }
        }

        if !fetched_prebuilt {
            let staging = match tempfile::tempdir_in(self.store_root.join("staging")) {
                Ok(dir) => dir,
                Err(err) => return self.fail_node(spec, &prefix, err.to_string()),
            };
            let build_system: BuildSystem = spec
                .runtime_metadata()
                .get("build_system")
                .and_then(|s| s.parse().ok())
                .unwrap_or_default();

            for phase in build_system.phases() {
                if self.cancel.load(Ordering::SeqCst) {
                    return NodeOutcome::Cancelled;
                }
                let phase_ctx = HookContext {
                    spec,
                    phase: Some(*phase),
                    prefix: &prefix,
                };
                if let Err(cause) = self.hooks.fire(HookEvent::PrePhase, &phase_ctx) {
                    return self.fail_node(spec, &prefix, cause);
                }
                debug!(spec = %spec.label(), phase = %phase, "running phase");
                let ctx = PhaseContext {
                    spec,
                    phase: *phase,
                    prefix: &prefix,
                    staging: staging.path(),
                };
                if let Err(reason) = (self.runner)(&ctx) {
                    let cause = Error::PhaseFailed {
                        spec: spec.label(),
                        phase: phase.to_string(),
                        reason,
                    }
                    .to_string();
                    return self.fail_node(spec, &prefix, cause);
                }
                if let Err(cause) = self.hooks.fire(HookEvent::PostPhase, &phase_ctx) {
                    return self.fail_node(spec, &prefix, cause);
                }
            }
        }

        if let Err(cause) = self.hooks.fire(HookEvent::PostInstall, &node_ctx) {
            return self.fail_node(spec, &prefix, cause);
        }

        let db_guard = match self.locks.write_db(self.options.lock_timeout) {
            Ok(guard) => guard,
            Err(err) => return self.fail_node(spec, &prefix, err.to_string()),
        };
        let recorded = self.db.record_install(spec, &prefix, explicit);
        drop(db_guard);
        if let Err(err) = recorded {
            return self.fail_node(spec, &prefix, err.to_string());
        }

        info!(spec = %spec.label(), prefix = %prefix.display(), "installed");
        NodeOutcome::Installed
    }

    fn mark_explicit(&self, spec: &ConcreteSpec) -> Result<()> {
        let _guard = self.locks.write_db(self.options.lock_timeout)?;
        self.db.record_install(spec, &self.prefix_for(spec), true)
    }

    fn fail_node(&self, spec: &ConcreteSpec, prefix: &Path, cause: String) -> NodeOutcome {
        warn!(spec = %spec.label(), cause = %cause, "install failed");
        let ctx = HookContext {
            spec,
            phase: None,
            prefix,
        };
        if self.hooks.fire(HookEvent::OnFailure, &ctx).is_err() {
            debug!(spec = %spec.label(), "on_failure hook itself failed");
        }
        // Partial build output is never reused
        if prefix.exists() {
            let _ = fs::remove_dir_all(prefix);
        }
        NodeOutcome::Failed(cause)
    }
}

/// Finalize every still-waiting transitive build/link dependent of a node
/// that will never be installable
fn cascade_skip(
    dag: &ConcreteDag,
    origin: &Hash,
    reason: &SkipReason,
    states: &mut HashMap<Hash, NodeState>,
    report: &mut InstallReport,
    finished: &mut usize,
) {
    for dependent in dag.transitive_dependents(origin, DepKindSet::build_link()) {
        if matches!(states.get(&dependent), Some(NodeState::Waiting(_))) {
            states.insert(dependent.clone(), NodeState::Finished);
            report.skipped.push((dependent, reason.clone()));
            *finished += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildsys::noop_runner;
    use crate::spec::DepEdge;
    use crate::version::Version;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;

    fn spec(name: &str, deps: &[(&ConcreteSpec, DepKindSet)]) -> ConcreteSpec {
        ConcreteSpec::build(
            name,
            Version::parse("1.0").unwrap(),
            BTreeMap::new(),
            None,
            "x86_64",
            deps.iter()
                .map(|(d, kinds)| DepEdge {
                    child: d.hash().clone(),
                    kinds: *kinds,
                    virtual_name: None,
                })
                .collect(),
            // Custom keeps phase counts small: fetch + install
            [("build_system".to_string(), "custom".to_string())].into(),
        )
    }

    fn chain() -> (ConcreteDag, ConcreteSpec, ConcreteSpec, ConcreteSpec) {
        let zlib = spec("zlib", &[]);
        let libpng = spec("libpng", &[(&zlib, DepKindSet::build_link())]);
        let app = spec("app", &[(&libpng, DepKindSet::build_link())]);
        let mut dag = ConcreteDag::new();
        for s in [&zlib, &libpng, &app] {
            dag.insert(s.clone());
        }
        dag.add_root(app.hash().clone());
        (dag, zlib, libpng, app)
    }

    fn counting_runner(counter: Arc<AtomicUsize>) -> PhaseRunner {
        Arc::new(move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_install_chain() {
        let store = tempfile::tempdir().unwrap();
        let installer = Installer::new(store.path(), noop_runner()).unwrap();
        let (dag, zlib, _libpng, app) = chain();

        let report = installer.install(&dag).unwrap();
        assert!(report.success());
        assert_eq!(report.installed.len(), 3);
        assert!(installer.database().contains(zlib.hash()).unwrap());

        // Only the root is explicit
        assert!(installer.database().get(app.hash()).unwrap().unwrap().explicit);
        assert!(!installer.database().get(zlib.hash()).unwrap().unwrap().explicit);
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let store = tempfile::tempdir().unwrap();
        let phases = Arc::new(AtomicUsize::new(0));
        let installer = Installer::new(store.path(), counting_runner(Arc::clone(&phases))).unwrap();
        let (dag, ..) = chain();

        installer.install(&dag).unwrap();
        let after_first = phases.load(Ordering::SeqCst);
        assert!(after_first > 0);

        let report = installer.install(&dag).unwrap();
        assert_eq!(report.already_installed.len(), 3);
        assert!(report.installed.is_empty());
        // Zero phases ran the second time
        assert_eq!(phases.load(Ordering::SeqCst), after_first);
    }

    #[test]
    fn test_failure_cascades_but_spares_independent() {
        let store = tempfile::tempdir().unwrap();
        let runner: PhaseRunner = Arc::new(|ctx| {
            if ctx.spec.name() == "libpng" {
                Err("configure blew up".to_string())
            } else {
                Ok(())
            }
        });
        let installer = Installer::new(store.path(), runner).unwrap();

        let (mut dag, zlib, libpng, app) = chain();
        let bzip2 = spec("bzip2", &[]);
        dag.insert(bzip2.clone());
        dag.add_root(bzip2.hash().clone());

        let report = installer.install(&dag).unwrap();
        assert!(!report.success());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(&report.failed[0].0, libpng.hash());
        assert!(report.failed[0].1.contains("configure blew up"));
        assert_eq!(
            report.skipped,
            vec![(
                app.hash().clone(),
                SkipReason::DependencyFailed(libpng.hash().clone())
            )]
        );
        assert!(report.installed.contains(zlib.hash()));
        assert!(report.installed.contains(bzip2.hash()));
        assert!(!installer.database().contains(app.hash()).unwrap());
    }

    #[test]
    fn test_run_only_dep_does_not_gate_but_marks_incomplete() {
        let store = tempfile::tempdir().unwrap();
        let runner: PhaseRunner = Arc::new(|ctx| {
            if ctx.spec.name() == "tool" {
                Err("no".to_string())
            } else {
                Ok(())
            }
        });
        let installer = Installer::new(store.path(), runner).unwrap();

        let tool = spec("tool", &[]);
        let app = spec("app", &[(&tool, DepKindSet::new(&[DepKind::Run]))]);
        let mut dag = ConcreteDag::new();
        dag.insert(tool.clone());
        dag.insert(app.clone());
        dag.add_root(app.hash().clone());

        let report = installer.install(&dag).unwrap();
        // app still built (run edges do not gate) but is flagged
        assert!(report.installed.contains(app.hash()));
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.runtime_incomplete, vec![app.hash().clone()]);
    }

    #[test]
    fn test_cancel_before_install_skips_everything() {
        let store = tempfile::tempdir().unwrap();
        let installer = Installer::new(store.path(), noop_runner()).unwrap();
        installer.cancel();
        let (dag, ..) = chain();

        let report = installer.install(&dag).unwrap();
        assert!(report.installed.is_empty());
        assert_eq!(report.skipped.len(), 3);
        assert!(report
            .skipped
            .iter()
            .all(|(_, reason)| *reason == SkipReason::Cancelled));
    }

    #[test]
    fn test_parallel_independent_nodes() {
        let store = tempfile::tempdir().unwrap();
        let phases = Arc::new(AtomicUsize::new(0));
        let installer = Installer::new(store.path(), counting_runner(Arc::clone(&phases)))
            .unwrap()
            .with_options(InstallOptions {
                jobs: 2,
                ..InstallOptions::default()
            });

        let mut dag = ConcreteDag::new();
        for name in ["a", "b", "c"] {
            let node = spec(name, &[]);
            dag.add_root(node.hash().clone());
            dag.insert(node);
        }

        let report = installer.install(&dag).unwrap();
        assert!(report.success());
        assert_eq!(report.installed.len(), 3);
        // custom build system: fetch + install per node
        assert_eq!(phases.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_hook_failure_fails_node() {
        let store = tempfile::tempdir().unwrap();
        let mut hooks = HookRegistry::new();
        hooks.register(HookEvent::PreInstall, |ctx| {
            if ctx.spec.name() == "zlib" {
                Err("quota exceeded".to_string())
            } else {
                Ok(())
            }
        });
        let installer = Installer::new(store.path(), noop_runner())
            .unwrap()
            .with_hooks(hooks);
        let (dag, zlib, ..) = chain();

        let report = installer.install(&dag).unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(&report.failed[0].0, zlib.hash());
        assert!(report.failed[0].1.contains("quota exceeded"));
        assert_eq!(report.skipped.len(), 2);
    }

    #[test]
    fn test_prebuilt_probe_skips_phases() {
        let store = tempfile::tempdir().unwrap();
        let phases = Arc::new(AtomicUsize::new(0));
        let probe: PrebuiltProbe = Arc::new(|_spec, _prefix| Ok(true));
        let installer = Installer::new(store.path(), counting_runner(Arc::clone(&phases)))
            .unwrap()
            .with_options(InstallOptions {
                prebuilt: Some(probe),
                ..InstallOptions::default()
            });
        let (dag, ..) = chain();

        let report = installer.install(&dag).unwrap();
        assert_eq!(report.installed.len(), 3);
        assert_eq!(phases.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_force_rebuilds() {
        let store = tempfile::tempdir().unwrap();
        let phases = Arc::new(AtomicUsize::new(0));
        let installer = Installer::new(store.path(), counting_runner(Arc::clone(&phases))).unwrap();
        let (dag, ..) = chain();
        installer.install(&dag).unwrap();
        let after_first = phases.load(Ordering::SeqCst);

        let forced = Installer::new(store.path(), counting_runner(Arc::clone(&phases)))
            .unwrap()
            .with_options(InstallOptions {
                force: true,
                ..InstallOptions::default()
            });
        let report = forced.install(&dag).unwrap();
        assert_eq!(report.installed.len(), 3);
        assert_eq!(phases.load(Ordering::SeqCst), after_first * 2);
    }

    #[test]
    fn test_failed_attempt_leaves_no_stale_artifacts() {
        let store = tempfile::tempdir().unwrap();
        let zlib = spec("zlib", &[]);
        let mut dag = ConcreteDag::new();
        dag.add_root(zlib.hash().clone());
        dag.insert(zlib.clone());

        let flaky: PhaseRunner = Arc::new(|ctx| {
            fs::write(ctx.prefix.join("stale-artifact"), b"half written").unwrap();
            Err("compiler crashed".to_string())
        });
        let installer = Installer::new(store.path(), flaky).unwrap();
        let report = installer.install(&dag).unwrap();
        assert_eq!(report.failed.len(), 1);
        let prefix = installer.prefix_for(&zlib);
        assert!(!prefix.join("stale-artifact").exists());

        // A leftover from a crashed process is cleared before rebuilding
        fs::create_dir_all(&prefix).unwrap();
        fs::write(prefix.join("stale-artifact"), b"half written").unwrap();
        let installer = Installer::new(store.path(), noop_runner()).unwrap();
        let report = installer.install(&dag).unwrap();
        assert!(report.success());
        assert!(!prefix.join("stale-artifact").exists());
    }

    #[test]
    fn test_recheck_blocks_on_database_writer() {
        let store = tempfile::tempdir().unwrap();
        let phases = Arc::new(AtomicUsize::new(0));
        let installer = Installer::new(store.path(), counting_runner(Arc::clone(&phases)))
            .unwrap()
            .with_options(InstallOptions {
                lock_timeout: Some(Duration::from_millis(50)),
                ..InstallOptions::default()
            });
        let zlib = spec("zlib", &[]);
        let mut dag = ConcreteDag::new();
        dag.add_root(zlib.hash().clone());
        dag.insert(zlib);

        // A writer elsewhere holds the database exclusively; the pre-build
        // re-check waits on it, so no phase runs
        let writer = LockManager::new(store.path().join("locks")).unwrap();
        let guard = writer.write_db(None).unwrap();
        let report = installer.install(&dag).unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.contains("lock"));
        assert_eq!(phases.load(Ordering::SeqCst), 0);
        drop(guard);

        let report = installer.install(&dag).unwrap();
        assert!(report.success());
    }

    #[test]
    fn test_uninstall_respects_dependents() {
        let store = tempfile::tempdir().unwrap();
        let installer = Installer::new(store.path(), noop_runner()).unwrap();
        let (dag, zlib, libpng, app) = chain();
        installer.install(&dag).unwrap();

        let err = installer.uninstall(zlib.hash(), false).unwrap_err();
        assert!(matches!(err, Error::StillNeeded { .. }));

        installer.uninstall(app.hash(), false).unwrap();
        installer.uninstall(libpng.hash(), false).unwrap();
        installer.uninstall(zlib.hash(), false).unwrap();
        assert!(installer.database().records().unwrap().is_empty());
    }
}
