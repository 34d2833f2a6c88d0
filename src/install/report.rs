// src/install/report.rs

//! Aggregated outcome of one install run

use std::fmt::Write as _;

use crate::hash::Hash;
use crate::spec::ConcreteDag;

/// Why a node was never attempted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A transitive build/link dependency failed
    DependencyFailed(Hash),
    /// The run was cancelled before the node became ready
    Cancelled,
}

/// Per-run outcome; every node of the DAG lands in exactly one bucket
#[derive(Debug, Clone, Default)]
pub struct InstallReport {
    /// Freshly built (or fetched prebuilt) this run
    pub installed: Vec<Hash>,
    /// Found in the database, zero phases run
    pub already_installed: Vec<Hash>,
    pub failed: Vec<(Hash, String)>,
    pub skipped: Vec<(Hash, SkipReason)>,
    /// Installed nodes whose run-only dependencies did not complete; usable
    /// for building against, but not runnable yet
    pub runtime_incomplete: Vec<Hash>,
}

impl InstallReport {
    pub fn success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    pub fn total(&self) -> usize {
        self.installed.len()
            + self.already_installed.len()
            + self.failed.len()
            + self.skipped.len()
    }

    /// Human-readable rendering, labeling nodes through the DAG
    pub fn summary(&self, dag: &ConcreteDag) -> String {
        let label = |hash: &Hash| -> String {
            dag.node(hash)
                .map(|s| s.label())
                .unwrap_or_else(|| hash.short().to_string())
        };

        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} installed, {} already installed, {} failed, {} skipped",
            self.installed.len(),
            self.already_installed.len(),
            self.failed.len(),
            self.skipped.len()
        );
        for hash in &self.installed {
            let _ = writeln!(out, "  installed {}", label(hash));
        }
        for (hash, cause) in &self.failed {
            let _ = writeln!(out, "  failed    {}: {}", label(hash), cause);
        }
        for (hash, reason) in &self.skipped {
            match reason {
                SkipReason::DependencyFailed(dep) => {
                    let _ = writeln!(
                        out,
                        "  skipped   {}: dependency {} failed",
                        label(hash),
                        label(dep)
                    );
                }
                SkipReason::Cancelled => {
                    let _ = writeln!(out, "  skipped   {}: cancelled", label(hash));
                }
            }
        }
        for hash in &self.runtime_incomplete {
            let _ = writeln!(out, "  runtime incomplete {}", label(hash));
        }
        out
    }

    /// Canonical ordering for deterministic reports
    pub(super) fn sort(&mut self) {
        self.installed.sort();
        self.already_installed.sort();
        self.failed.sort_by(|a, b| a.0.cmp(&b.0));
        self.skipped.sort_by(|a, b| a.0.cmp(&b.0));
        self.runtime_incomplete.sort();
    }
}
