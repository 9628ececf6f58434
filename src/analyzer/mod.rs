//! Affected/non-affected decisions for coverage units.
//!
//! A test framework brackets each unit with
//! [`interval_begin`](DependencyAnalyzer::interval_begin), whose answer says
//! whether the unit must run, and
//! [`interval_end`](DependencyAnalyzer::interval_end), which persists the
//! dependencies collected in between. One interval is open at a time.
//!
//! Any failure while deciding resolves to "affected".

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::collector::Collector;
use crate::config::Config;
use crate::error::Result;
use crate::hashing::{Hasher, is_changed};
use crate::lru::LruMap;
use crate::record::{DependencyRecord, DependencySet, UnitKey};
use crate::store::Store;


/// Override rules applied before any hash comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionPolicy {
    /// Every unit is affected.
    pub force_all: bool,
    /// Units whose last run failed are affected.
    pub force_failing: bool,
    /// Units whose full name starts with one of these always run.
    pub excludes: Option<Vec<String>>,
    /// If set, units whose full name starts with none of these always run.
    pub includes: Option<Vec<String>>,
    /// Union new dependencies with the stored ones and always run.
    pub append: bool,
}

impl SelectionPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            force_all: config.force_all,
            force_failing: config.force_failing,
            excludes: config.selection_excludes.clone(),
            includes: config.selection_includes.clone(),
            append: config.dependencies_append,
        }
    }

    /// Returns `true` if `full_name` is outside selection and must always
    /// run.
    pub fn always_runs(&self, full_name: &str) -> bool {
        let excluded = self
            .excludes
            .as_ref()
            .is_some_and(|prefixes| prefixes.iter().any(|p| full_name.starts_with(p.as_str())));
        let included = self
            .includes
            .as_ref()
            .is_none_or(|prefixes| prefixes.iter().any(|p| full_name.starts_with(p.as_str())));
        excluded || !included
    }
}

/// Returns `true` if a unit with the previously recorded `set` is affected:
/// the set is empty, or some dependency no longer hashes to its recorded
/// digest.
pub fn is_affected(hasher: &Hasher, set: &DependencySet) -> bool {
    set.is_empty()
        || set.iter().any(|(reference, digest)| {
            let changed = is_changed(digest, &hasher.hash(reference));
            if changed {
                debug!("Changed: {}", reference);
            }
            changed
        })
}

/// Decides which coverage units are affected and records their dependencies.
#[derive(Debug)]
pub struct DependencyAnalyzer {
    collector: Arc<Collector>,
    hasher: Arc<Hasher>,
    store: Store,
    root_dir: PathBuf,
    policy: SelectionPolicy,
    memo: LruMap<String, bool>,
    open: Option<UnitKey>,
}

impl DependencyAnalyzer {
    pub fn new(
        collector: Arc<Collector>,
        hasher: Arc<Hasher>,
        store: Store,
        root_dir: impl Into<PathBuf>,
        policy: SelectionPolicy,
        cache_size: usize,
    ) -> Self {
        Self {
            collector,
            hasher,
            store,
            root_dir: root_dir.into(),
            policy,
            memo: LruMap::new(cache_size),
            open: None,
        }
    }

    /// Builds an analyzer, hasher and store included, from `config`.
    pub fn from_config(config: &Config, collector: Arc<Collector>) -> Self {
        Self::new(
            collector,
            Arc::new(config.create_hasher()),
            config.create_store(),
            &config.root_dir,
            SelectionPolicy::from_config(config),
            config.cache_size,
        )
    }

    pub fn collector(&self) -> &Arc<Collector> {
        &self.collector
    }

    pub fn hasher(&self) -> &Arc<Hasher> {
        &self.hasher
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    /// Opens the coverage interval of `key` and returns whether the unit is
    /// affected.
    ///
    /// A unit checked earlier in this process gets the same answer again; if
    /// it is rerun, its previous dependencies are kept alongside the new ones.
    pub fn interval_begin(&mut self, key: &UnitKey) -> bool {
        if let Some(open) = &self.open
            && open != key
        {
            warn!("Coverage of {} began before coverage of {} ended", key, open);
        }
        self.collector.reset();
        self.open = Some(key.clone());

        let full_name = key.full_name();

        if self.policy.always_runs(&full_name) {
            self.memo.insert(full_name.clone(), true);
            record_outcome(&full_name, true);
            return true;
        }

        if let Some(&affected) = self.memo.get(&full_name) {
            if affected {
                let previous = self.store.load(&self.root_dir, key);
                self.collector
                    .add_external_refs(previous.references().map(str::to_string));
            }
            return affected;
        }

        let affected = if self.policy.append {
            let previous = self.store.load(&self.root_dir, key);
            self.collector
                .add_external_refs(previous.references().map(str::to_string));
            true
        } else if self.forced(key) {
            true
        } else {
            is_affected(&self.hasher, &self.store.load(&self.root_dir, key))
        };

        self.memo.insert(full_name.clone(), affected);
        record_outcome(&full_name, affected);
        affected
    }

    /// Closes the coverage interval of `key`: the collected dependencies
    /// replace the stored ones and the failure marker is updated.
    pub fn interval_end(&mut self, key: &UnitKey, failed: bool) {
        match &self.open {
            Some(open) if open == key => {}
            Some(open) => warn!("Coverage of {} ended while {} was open", key, open),
            None => warn!("Coverage of {} ended without having begun", key),
        }

        let refs = self.collector.snapshot();
        let set: DependencySet = refs
            .par_iter()
            .map(|reference| DependencyRecord::new(reference.as_str(), self.hasher.hash(reference)))
            .collect::<Vec<_>>()
            .into_iter()
            .collect();

        if let Err(e) = self.store.save(&self.root_dir, key, &set) {
            warn!("Could not save dependencies of {}: {}", key, e);
        }
        if let Err(e) = self.store.mark_failed(&self.root_dir, key, failed) {
            warn!("Could not update failure marker of {}: {}", key, e);
        }

        self.collector.reset();
        self.open = None;
    }

    /// Answers whether `key` is affected without opening an interval and
    /// without remembering the answer.
    pub fn query_affected(&self, key: &UnitKey) -> bool {
        if self.policy.always_runs(&key.full_name()) || self.forced(key) {
            return true;
        }
        is_affected(&self.hasher, &self.store.load(&self.root_dir, key))
    }

    /// Persists the digest cache, if it is durable.
    pub fn shutdown(&self) -> Result<()> {
        if let Some(open) = &self.open {
            warn!("Shutting down with coverage of {} still open", open);
        }
        self.hasher.flush()
    }

    fn forced(&self, key: &UnitKey) -> bool {
        self.policy.force_all
            || (self.policy.force_failing && self.store.was_failing(&self.root_dir, key.owner()))
    }
}

fn record_outcome(full_name: &str, affected: bool) {
    info!(
        "{} {}",
        full_name,
        if affected { "RUN" } else { "SKIP" }
    );
}
