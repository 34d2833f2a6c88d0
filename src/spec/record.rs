// src/spec/record.rs

//! Serializable form of concrete specs
//!
//! `SpecRecord` is the persistence boundary shared by the lockfile and the
//! install database. Loading a record rebuilds the `ConcreteSpec` and
//! recomputes its hash; a mismatch against the stored hash means the record
//! was tampered with or corrupted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::variant::VariantValue;
use crate::version::Version;

use super::{CompilerId, ConcreteSpec, DepEdge, DepKindSet};

/// One persisted dependency edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepRecord {
    pub hash: Hash,
    /// Comma-separated kind list, e.g. "build,link"
    pub kinds: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_name: Option<String>,
}

/// One persisted concrete spec
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecRecord {
    pub name: String,
    pub version: Version,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variants: BTreeMap<String, VariantValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiler: Option<CompilerId>,
    pub target: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deps: Vec<DepRecord>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub runtime_metadata: BTreeMap<String, String>,
    pub hash: Hash,
}

impl SpecRecord {
    pub fn from_spec(spec: &ConcreteSpec) -> Self {
        Self {
            name: spec.name().to_string(),
            version: spec.version().clone(),
            variants: spec.variants().clone(),
            compiler: spec.compiler().cloned(),
            target: spec.target().to_string(),
            deps: spec
                .edges()
                .iter()
                .map(|edge| DepRecord {
                    hash: edge.child.clone(),
                    kinds: edge.kinds.to_string(),
                    virtual_name: edge.virtual_name.clone(),
                })
                .collect(),
            runtime_metadata: spec.runtime_metadata().clone(),
            hash: spec.hash().clone(),
        }
    }

    /// Rebuild the concrete spec and verify the stored hash
    pub fn to_spec(&self) -> Result<ConcreteSpec> {
        let mut edges = Vec::with_capacity(self.deps.len());
        for dep in &self.deps {
            let kinds: DepKindSet = dep.kinds.parse()?;
            edges.push(DepEdge {
                child: dep.hash.clone(),
                kinds,
                virtual_name: dep.virtual_name.clone(),
            });
        }

        let spec = ConcreteSpec::build(
            self.name.clone(),
            self.version.clone(),
            self.variants.clone(),
            self.compiler.clone(),
            self.target.clone(),
            edges,
            self.runtime_metadata.clone(),
        );

        if spec.hash() != &self.hash {
            return Err(Error::DatabaseCorruption(format!(
                "stored hash {} does not match recomputed hash {} for {}",
                self.hash.short(),
                spec.hash().short(),
                self.name
            )));
        }

        Ok(spec)
    }
}
