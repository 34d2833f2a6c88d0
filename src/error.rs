// src/error.rs

//! Central error type for the strata core.
//!
//! Resolution errors are terminal for a whole concretization request: there is
//! never a partially concrete DAG. Build errors are local to one node and are
//! aggregated into the final install report rather than propagated. Lock and
//! database errors are retried with backoff by their owners before being
//! surfaced here as fatal.

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// All errors produced by the concretizer, installer, and their collaborators
#[derive(Debug, Error)]
pub enum Error {
    /// Package name is not known to the facts provider
    #[error("unknown package: {0}")]
    UnknownPackage(String),

    /// A requested version is not declared by the package
    #[error("package {package} has no version {version}")]
    UnknownVersion { package: String, version: String },

    /// A requested variant is not declared by the package
    #[error("package {package} has no variant '{variant}'")]
    UnknownVariant { package: String, variant: String },

    /// No feasible concrete graph exists; carries the minimal set of
    /// mutually conflicting constraints for reporting
    #[error("unsatisfiable constraints:\n{}", .constraints.iter().map(|c| format!("  {c}")).collect::<Vec<_>>().join("\n"))]
    Unsatisfiable { constraints: Vec<String> },

    /// Concretization exceeded its configured deadline
    #[error("concretization timed out after {elapsed_ms} ms")]
    ConcretizationTimeout { elapsed_ms: u64 },

    /// A lock could not be acquired within the configured deadline
    #[error("timed out waiting {waited_ms} ms for lock '{key}'")]
    LockTimeout { key: String, waited_ms: u64 },

    /// The opaque build-phase callback reported failure for one node
    #[error("phase '{phase}' failed for {spec}: {reason}")]
    PhaseFailed {
        spec: String,
        phase: String,
        reason: String,
    },

    /// An in-memory concrete graph is malformed: a dangling edge or a
    /// dependency cycle
    #[error("invalid dependency graph: {0}")]
    InvalidDag(String),

    /// The on-disk install database failed validation; fatal, no auto-repair
    #[error("install database corrupted: {0}")]
    DatabaseCorruption(String),

    /// Uninstall refused because other installed specs still depend on the
    /// target
    #[error("{spec} is still needed by: {}", .dependents.join(", "))]
    StillNeeded {
        spec: String,
        dependents: Vec<String>,
    },

    /// Malformed spec syntax, constraint string, or facts declaration
    #[error("parse error: {0}")]
    Parse(String),

    /// An install run was cancelled by the caller or by fail-fast
    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("database serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Lockfile(#[from] crate::lockfile::LockfileError),
}

impl Error {
    /// True for errors that abort a whole concretization request
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            Error::UnknownPackage(_)
                | Error::UnknownVersion { .. }
                | Error::UnknownVariant { .. }
                | Error::Unsatisfiable { .. }
                | Error::ConcretizationTimeout { .. }
        )
    }
}
