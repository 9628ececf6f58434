//! Offline selection over a whole store directory.
//!
//! Before any test executes, a build tool can ask which owners are *not*
//! affected and exclude them up front. Each dependency file gets the verdict
//! the [`DependencyAnalyzer`](crate::analyzer::DependencyAnalyzer) would give
//! it, but nothing is executed and no dependencies are collected.
//!
//! An owner is non-affected only when every one of its files is.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::analyzer::{SelectionPolicy, is_affected};
use crate::config::Config;
use crate::hashing::Hasher;
use crate::record::{DependencySet, Granularity, UnitKey};
use crate::store::Store;


/// Owners split by verdict, each list sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub affected: Vec<String>,
    pub non_affected: Vec<String>,
}

struct FileVerdict {
    key: UnitKey,
    set: DependencySet,
    affected: bool,
}

/// Computes verdicts for every dependency file of a store directory.
#[derive(Debug)]
pub struct BatchResolver {
    store: Store,
    hasher: Hasher,
    policy: SelectionPolicy,
    method_conflict_resolution: bool,
}

impl BatchResolver {
    pub fn new(store: Store, hasher: Hasher, policy: SelectionPolicy) -> Self {
        Self {
            store,
            hasher,
            policy,
            method_conflict_resolution: false,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.create_store(),
            config.create_hasher(),
            SelectionPolicy::from_config(config),
        )
        .method_conflict_resolution(config.method_conflict_resolution)
    }

    /// Enables the experimental method-level conflict heuristic.
    ///
    /// An affected method-level unit that shares a reference with a
    /// non-affected sibling of the same owner, but recorded a different
    /// digest for it, is counted as non-affected. This can hide a test that
    /// really is affected.
    pub fn method_conflict_resolution(mut self, enabled: bool) -> Self {
        self.method_conflict_resolution = enabled;
        self
    }

    pub fn hasher(&self) -> &Hasher {
        &self.hasher
    }

    /// Splits the owners recorded in `dir` into affected and non-affected.
    ///
    /// A missing or unreadable directory resolves to nothing.
    pub fn resolve(&self, dir: &Path) -> Resolution {
        let files = match self.store.list_unit_files(dir) {
            Ok(files) => files,
            Err(e) => {
                warn!("Cannot list dependency files: {}", e);
                return Resolution::default();
            }
        };

        let verdicts: Vec<FileVerdict> = files
            .par_iter()
            .filter_map(|path| self.check_file(dir, path))
            .collect();

        let mut owners = BTreeSet::new();
        let mut affected = BTreeSet::new();
        let mut methods: BTreeMap<&str, Vec<&FileVerdict>> = BTreeMap::new();

        for verdict in &verdicts {
            let owner = verdict.key.owner();
            owners.insert(owner.to_string());
            match verdict.key.granularity() {
                Granularity::Method(_) => methods.entry(owner).or_default().push(verdict),
                Granularity::Run | Granularity::Class => {
                    if verdict.affected {
                        affected.insert(owner.to_string());
                    }
                }
            }
        }

        for (owner, siblings) in methods {
            if self.any_method_affected(&siblings) {
                affected.insert(owner.to_string());
            }
        }

        let non_affected = owners.difference(&affected).cloned().collect();
        Resolution {
            affected: affected.into_iter().collect(),
            non_affected,
        }
    }

    /// Owners recorded in `dir` that are not affected, sorted.
    pub fn find_non_affected(&self, dir: &Path) -> Vec<String> {
        self.resolve(dir).non_affected
    }

    fn check_file(&self, dir: &Path, path: &Path) -> Option<FileVerdict> {
        let file_name = path.file_name()?.to_str()?;
        let Some(key) = UnitKey::from_file_name(file_name) else {
            warn!("Skipping {}: the owner cannot be recovered from a hashed name", file_name);
            return None;
        };

        let set = self.store.load_path(path);
        let affected = self.policy.always_runs(&key.full_name())
            || self.policy.force_all
            || (self.policy.force_failing && self.store.was_failing(dir, key.owner()))
            || is_affected(&self.hasher, &set);
        debug!("{} affected: {}", file_name, affected);

        Some(FileVerdict { key, set, affected })
    }

    fn any_method_affected(&self, siblings: &[&FileVerdict]) -> bool {
        if !self.method_conflict_resolution {
            return siblings.iter().any(|verdict| verdict.affected);
        }

        let (affected, non_affected): (Vec<&FileVerdict>, Vec<&FileVerdict>) =
            siblings.iter().copied().partition(|verdict| verdict.affected);

        affected.iter().any(|candidate| {
            let conflicting = non_affected
                .iter()
                .any(|other| conflicts(&candidate.set, &other.set));
            if conflicting {
                debug!("Treating {} as non-affected after a conflict", candidate.key);
            }
            !conflicting
        })
    }
}

/// Two sets conflict when they recorded different digests for the same
/// reference.
fn conflicts(a: &DependencySet, b: &DependencySet) -> bool {
    a.iter()
        .any(|(reference, digest)| b.digest(reference).is_some_and(|other| other != digest))
}

/// Owners recorded in `dir` that are not affected under `config`, sorted.
pub fn find_non_affected(dir: &Path, config: &Config) -> Vec<String> {
    BatchResolver::from_config(config).find_non_affected(dir)
}

/// Owners in `dir` whose last run failed, sorted.
pub fn find_recently_failing(dir: &Path, config: &Config) -> Vec<String> {
    config.create_store().recently_failing(dir)
}

/// Affected and non-affected owners recorded in `dir` under `config`.
pub fn resolve(dir: &Path, config: &Config) -> Resolution {
    BatchResolver::from_config(config).resolve(dir)
}
