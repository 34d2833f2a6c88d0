// src/lockfile.rs

//! Lockfile: a persisted concrete DAG
//!
//! The lockfile captures the exact resolved graph for a set of root requests,
//! letting a later install run skip concretization entirely and letting
//! re-concretization keep unchanged nodes stable. The format is TOML:
//!
//! ```toml
//! roots = ["<hash>"]
//!
//! [metadata]
//! version = 1
//! generated = "2026-08-26T10:30:00Z"
//! generator = "strata 0.1.0"
//!
//! [[nodes]]
//! name = "zlib"
//! version = "1.2.13"
//! target = "x86_64"
//! hash = "<hash>"
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::error::Result;
use crate::spec::{ConcreteDag, SpecRecord};

/// Current lockfile format version
pub const LOCKFILE_VERSION: u32 = 1;

/// Default lockfile name
pub const LOCKFILE_NAME: &str = "strata.lock";

#[derive(Error, Debug)]
pub enum LockfileError {
    #[error("failed to read lockfile: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse lockfile: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize lockfile: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("lockfile version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("lockfile validation failed: {0}")]
    Validation(String),
}

/// Lockfile metadata header
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockfileMetadata {
    pub version: u32,
    pub generated: DateTime<Utc>,
    pub generator: String,
}

/// A persisted concrete DAG
///
/// Field order matters for TOML serialization: plain values before tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lockfile {
    /// Hashes of the root requests, in request order
    pub roots: Vec<crate::hash::Hash>,

    pub metadata: LockfileMetadata,

    /// One record per distinct node
    #[serde(default)]
    pub nodes: Vec<SpecRecord>,
}

impl Lockfile {
    /// Snapshot a concrete DAG
    pub fn from_dag(dag: &ConcreteDag) -> Self {
        Self {
            roots: dag.roots().to_vec(),
            metadata: LockfileMetadata {
                version: LOCKFILE_VERSION,
                generated: Utc::now(),
                generator: format!("strata {}", env!("CARGO_PKG_VERSION")),
            },
            nodes: dag.iter().map(SpecRecord::from_spec).collect(),
        }
    }

    /// Rebuild the concrete DAG, verifying every record's hash and the
    /// graph's edge consistency
    pub fn to_dag(&self) -> Result<ConcreteDag> {
        if self.metadata.version != LOCKFILE_VERSION {
            return Err(LockfileError::VersionMismatch {
                expected: LOCKFILE_VERSION,
                found: self.metadata.version,
            }
            .into());
        }

        let mut dag = ConcreteDag::new();
        for record in &self.nodes {
            dag.insert(record.to_spec()?);
        }
        for root in &self.roots {
            if !dag.contains(root) {
                return Err(LockfileError::Validation(format!(
                    "root {} has no node record",
                    root.short()
                ))
                .into());
            }
            dag.add_root(root.clone());
        }
        // Surfaces dangling dependency edges
        dag.topological_order()?;
        Ok(dag)
    }

    /// Load from disk
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(LockfileError::Read)?;
        let lockfile: Lockfile = toml::from_str(&text).map_err(LockfileError::Parse)?;
        Ok(lockfile)
    }

    /// Write to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(LockfileError::Serialize)?;
        fs::write(path, text).map_err(LockfileError::Read)?;
        Ok(())
    }

    /// Look up the persisted record for a package name, if present
    pub fn node_named(&self, name: &str) -> Option<&SpecRecord> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{ConcreteSpec, DepEdge, DepKindSet};
    use crate::version::Version;
    use std::collections::BTreeMap;

    fn sample_dag() -> ConcreteDag {
        let mut dag = ConcreteDag::new();
        let dep = ConcreteSpec::build(
            "zlib",
            Version::parse("1.2.13").unwrap(),
            BTreeMap::new(),
            None,
            "x86_64",
            Vec::new(),
            BTreeMap::new(),
        );
        let root = ConcreteSpec::build(
            "libpng",
            Version::parse("1.6.40").unwrap(),
            BTreeMap::new(),
            None,
            "x86_64",
            vec![DepEdge {
                child: dep.hash().clone(),
                kinds: DepKindSet::build_link(),
                virtual_name: None,
            }],
            BTreeMap::new(),
        );
        dag.insert(dep);
        let root_hash = dag.insert(root);
        dag.add_root(root_hash);
        dag
    }

    #[test]
    fn test_lockfile_roundtrip() {
        let dag = sample_dag();
        let lockfile = Lockfile::from_dag(&dag);
        let rebuilt = lockfile.to_dag().unwrap();

        assert_eq!(rebuilt.len(), dag.len());
        assert_eq!(rebuilt.roots(), dag.roots());
        for spec in dag.iter() {
            assert!(rebuilt.contains(spec.hash()));
        }
    }

    #[test]
    fn test_lockfile_toml_roundtrip() {
        let lockfile = Lockfile::from_dag(&sample_dag());
        let text = toml::to_string_pretty(&lockfile).unwrap();
        let back: Lockfile = toml::from_str(&text).unwrap();
        assert_eq!(back.nodes.len(), lockfile.nodes.len());
        assert_eq!(back.roots, lockfile.roots);
        back.to_dag().unwrap();
    }

    #[test]
    fn test_lockfile_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCKFILE_NAME);

        let lockfile = Lockfile::from_dag(&sample_dag());
        lockfile.save(&path).unwrap();
        let loaded = Lockfile::load(&path).unwrap();
        assert_eq!(loaded.roots, lockfile.roots);
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut lockfile = Lockfile::from_dag(&sample_dag());
        lockfile.metadata.version = 99;
        assert!(lockfile.to_dag().is_err());
    }

    #[test]
    fn test_missing_root_record_rejected() {
        let mut lockfile = Lockfile::from_dag(&sample_dag());
        lockfile.nodes.retain(|n| n.name != "libpng");
        assert!(lockfile.to_dag().is_err());
    }
}
