// src/db/mod.rs

//! Install database
//!
//! One JSON file per store records every installed spec. Writes go through a
//! temp file in the same directory followed by an atomic rename, so readers
//! never observe a partial database. The database itself does no locking;
//! callers serialize access through [`crate::lock::LockManager`] with
//! [`crate::lock::DB_KEY`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::spec::{ConcreteSpec, DepKindSet, Spec, SpecRecord};

/// Current database format version
pub const DB_FORMAT_VERSION: u32 = 1;

/// Database file name under the store root
pub const DB_FILE: &str = "index.json";

/// One installed spec
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallRecord {
    pub spec: SpecRecord,
    pub prefix: PathBuf,
    /// Whether this spec was requested directly rather than pulled in as a
    /// dependency
    pub explicit: bool,
    pub installed_at: DateTime<Utc>,
    /// Set when a newer build supersedes this one; the record stays until the
    /// old prefix is removed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated_by: Option<Hash>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DbFile {
    version: u32,
    #[serde(default)]
    records: BTreeMap<Hash, InstallRecord>,
}

/// Handle to the on-disk database; stateless between calls, every operation
/// reads the current file
#[derive(Debug, Clone)]
pub struct InstallDatabase {
    path: PathBuf,
}

impl InstallDatabase {
    pub fn new(store_root: impl AsRef<Path>) -> Result<Self> {
        let root = store_root.as_ref();
        fs::create_dir_all(root)?;
        Ok(Self {
            path: root.join(DB_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<Hash, InstallRecord>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = fs::read_to_string(&self.path)?;
        let file: DbFile = serde_json::from_str(&text)?;
        if file.version != DB_FORMAT_VERSION {
            return Err(Error::DatabaseCorruption(format!(
                "unsupported database version {} (expected {})",
                file.version, DB_FORMAT_VERSION
            )));
        }
        for (hash, record) in &file.records {
            let spec = record.spec.to_spec()?;
            if spec.hash() != hash {
                return Err(Error::DatabaseCorruption(format!(
                    "record keyed {} holds spec {}",
                    hash.short(),
                    spec.hash().short()
                )));
            }
        }
        Ok(file.records)
    }

    fn store(&self, records: BTreeMap<Hash, InstallRecord>) -> Result<()> {
        let file = DbFile {
            version: DB_FORMAT_VERSION,
            records,
        };
        let text = serde_json::to_string_pretty(&file)?;
        let dir = self
            .path
            .parent()
            .ok_or_else(|| Error::DatabaseCorruption("database path has no parent".into()))?;
        let tmp = tempfile::NamedTempFile::new_in(dir)?;
        fs::write(tmp.path(), text)?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    pub fn contains(&self, hash: &Hash) -> Result<bool> {
        Ok(self.load()?.contains_key(hash))
    }

    pub fn get(&self, hash: &Hash) -> Result<Option<InstallRecord>> {
        Ok(self.load()?.remove(hash))
    }

    /// All records, ordered by hash
    pub fn records(&self) -> Result<Vec<InstallRecord>> {
        Ok(self.load()?.into_values().collect())
    }

    /// Records whose spec satisfies an abstract request
    pub fn query(&self, request: &Spec) -> Result<Vec<InstallRecord>> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|r| match r.spec.to_spec() {
                Ok(spec) => request.satisfied_by_node(&spec),
                Err(_) => false,
            })
            .collect())
    }

    /// Record a completed install; idempotent, a re-record upgrades the
    /// explicit flag but never downgrades it
    pub fn record_install(
        &self,
        spec: &ConcreteSpec,
        prefix: &Path,
        explicit: bool,
    ) -> Result<()> {
        let mut records = self.load()?;
        match records.get_mut(spec.hash()) {
            Some(existing) => {
                existing.explicit = existing.explicit || explicit;
                debug!(spec = %spec.label(), "already recorded");
            }
            None => {
                info!(spec = %spec.label(), prefix = %prefix.display(), "recording install");
                records.insert(
                    spec.hash().clone(),
                    InstallRecord {
                        spec: SpecRecord::from_spec(spec),
                        prefix: prefix.to_path_buf(),
                        explicit,
                        installed_at: Utc::now(),
                        deprecated_by: None,
                    },
                );
            }
        }
        self.store(records)
    }

    /// Mark `old` as superseded by `new`
    pub fn deprecate(&self, old: &Hash, new: &Hash) -> Result<()> {
        let mut records = self.load()?;
        let Some(record) = records.get_mut(old) else {
            return Err(Error::DatabaseCorruption(format!(
                "cannot deprecate {}: not installed",
                old.short()
            )));
        };
        record.deprecated_by = Some(new.clone());
        self.store(records)
    }

    /// Remove a record
    ///
    /// Refuses while other installed specs hold build/link/run edges to the
    /// target, unless `force` is set.
    pub fn uninstall(&self, hash: &Hash, force: bool) -> Result<InstallRecord> {
        let mut records = self.load()?;
        if !records.contains_key(hash) {
            return Err(Error::DatabaseCorruption(format!(
                "cannot uninstall {}: not installed",
                hash.short()
            )));
        }

        let dependents: Vec<String> = records
            .iter()
            .filter(|(other, _)| *other != hash)
            .filter(|(_, r)| {
                r.spec.deps.iter().any(|d| {
                    &d.hash == hash
                        && d.kinds
                            .parse::<DepKindSet>()
                            .map(|k| !k.is_empty())
                            .unwrap_or(false)
                })
            })
            .map(|(_, r)| format!("{}@{}", r.spec.name, r.spec.version))
            .collect();

        if !dependents.is_empty() && !force {
            let target = records
                .get(hash)
                .map(|r| format!("{}@{}", r.spec.name, r.spec.version))
                .unwrap_or_else(|| hash.short().to_string());
            return Err(Error::StillNeeded {
                spec: target,
                dependents,
            });
        }

        let record = records.remove(hash).expect("presence checked");
        info!(spec = %record.spec.name, hash = hash.short(), "uninstalled");
        self.store(records)?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{DepEdge, DepKindSet};
    use crate::version::Version;
    use std::collections::BTreeMap as Map;

    fn spec(name: &str, version: &str, deps: Vec<DepEdge>) -> ConcreteSpec {
        ConcreteSpec::build(
            name,
            Version::parse(version).unwrap(),
            Map::new(),
            None,
            "x86_64",
            deps,
            Map::new(),
        )
    }

    fn edge(child: &ConcreteSpec) -> DepEdge {
        DepEdge {
            child: child.hash().clone(),
            kinds: DepKindSet::build_link(),
            virtual_name: None,
        }
    }

    #[test]
    fn test_empty_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = InstallDatabase::new(dir.path()).unwrap();
        assert!(db.records().unwrap().is_empty());
        assert!(!db.contains(spec("zlib", "1.2.13", vec![]).hash()).unwrap());
    }

    #[test]
    fn test_record_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let db = InstallDatabase::new(dir.path()).unwrap();
        let zlib = spec("zlib", "1.2.13", vec![]);

        db.record_install(&zlib, &dir.path().join("zlib"), true)
            .unwrap();
        assert!(db.contains(zlib.hash()).unwrap());

        let record = db.get(zlib.hash()).unwrap().unwrap();
        assert!(record.explicit);
        assert_eq!(record.spec.name, "zlib");

        let found = db.query(&Spec::parse("zlib@>=1.2").unwrap()).unwrap();
        assert_eq!(found.len(), 1);
        assert!(db.query(&Spec::parse("zlib@<1.0").unwrap()).unwrap().is_empty());
    }

    #[test]
    fn test_rerecord_keeps_explicit() {
        let dir = tempfile::tempdir().unwrap();
        let db = InstallDatabase::new(dir.path()).unwrap();
        let zlib = spec("zlib", "1.2.13", vec![]);
        let prefix = dir.path().join("zlib");

        db.record_install(&zlib, &prefix, true).unwrap();
        db.record_install(&zlib, &prefix, false).unwrap();
        assert!(db.get(zlib.hash()).unwrap().unwrap().explicit);
    }

    #[test]
    fn test_uninstall_respects_dependents() {
        let dir = tempfile::tempdir().unwrap();
        let db = InstallDatabase::new(dir.path()).unwrap();
        let zlib = spec("zlib", "1.2.13", vec![]);
        let libpng = spec("libpng", "1.6.40", vec![edge(&zlib)]);

        db.record_install(&zlib, &dir.path().join("zlib"), false)
            .unwrap();
        db.record_install(&libpng, &dir.path().join("libpng"), true)
            .unwrap();

        let err = db.uninstall(zlib.hash(), false).unwrap_err();
        assert!(matches!(err, Error::StillNeeded { .. }));
        assert!(err.to_string().contains("libpng"));

        // force overrides; leaf uninstall works without it
        db.uninstall(libpng.hash(), false).unwrap();
        db.uninstall(zlib.hash(), false).unwrap();
        assert!(db.records().unwrap().is_empty());
    }

    #[test]
    fn test_deprecate() {
        let dir = tempfile::tempdir().unwrap();
        let db = InstallDatabase::new(dir.path()).unwrap();
        let old = spec("zlib", "1.2.12", vec![]);
        let new = spec("zlib", "1.2.13", vec![]);

        db.record_install(&old, &dir.path().join("old"), false).unwrap();
        db.record_install(&new, &dir.path().join("new"), false).unwrap();
        db.deprecate(old.hash(), new.hash()).unwrap();

        let record = db.get(old.hash()).unwrap().unwrap();
        assert_eq!(record.deprecated_by.as_ref(), Some(new.hash()));
    }

    #[test]
    fn test_corrupt_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db = InstallDatabase::new(dir.path()).unwrap();
        fs::write(db.path(), "{not json").unwrap();
        assert!(db.records().is_err());
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db = InstallDatabase::new(dir.path()).unwrap();
        fs::write(db.path(), r#"{"version": 99, "records": {}}"#).unwrap();
        assert!(matches!(
            db.records(),
            Err(Error::DatabaseCorruption(_))
        ));
    }
}
