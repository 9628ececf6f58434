//! Records which resources were touched during a coverage interval.
//!
//! The instrumentation layer calls [`Collector::touch`] at every probe site,
//! so the common path must be cheap: a probe that already saw the same unit
//! returns after a single relaxed atomic load. Only the first touch of a unit
//! in an interval takes the lock and resolves the unit to a resource
//! reference.
//!
//! Probe and recent-unit tables race benignly: a lost store only costs one
//! extra trip to the locked seen-set, which guarantees each unit is recorded
//! exactly once per interval.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::error::Result;

mod filter;
#[cfg(test)]
mod tests;

pub use filter::RefFilter;

/// Integer identity of an instrumented unit.
pub type UnitId = u32;

/// Number of slots in the direct-mapped probe table.
pub const PROBE_TABLE_SIZE: usize = 8192;

const PROBE_MASK: usize = PROBE_TABLE_SIZE - 1;

/// Number of slots in the recently-seen unit table.
pub const SEEN_CACHE_SIZE: usize = 1024;

const SEEN_MASK: usize = SEEN_CACHE_SIZE - 1;

/// Empty table slots hold zero, so unit ids are stored shifted by one.
const EMPTY_SLOT: u64 = 0;

fn slot_value(unit: UnitId) -> u64 {
    u64::from(unit) + 1
}

/// Maps a unit id to the resource reference that holds its content.
pub trait UnitResolver: Send + Sync {
    fn resolve(&self, unit: UnitId) -> Option<String>;
}

/// A value that knows which instrumented unit it belongs to.
pub trait Traced {
    fn unit_id(&self) -> UnitId;
}

/// A [`UnitResolver`] that hands out ids as references are registered.
#[derive(Debug, Default)]
pub struct UnitTable {
    inner: RwLock<UnitTableInner>,
}

#[derive(Debug, Default)]
struct UnitTableInner {
    refs: Vec<String>,
    ids: HashMap<String, UnitId>,
}

impl UnitTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id of `reference`, assigning the next free one on first
    /// registration.
    ///
    /// Returns `None` once every [`UnitId`] is taken; the reference is then
    /// not tracked.
    pub fn register(&self, reference: impl Into<String>) -> Option<UnitId> {
        let reference = reference.into();
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(&id) = inner.ids.get(&reference) {
            return Some(id);
        }
        let Some(id) = next_id(inner.refs.len()) else {
            warn!("Unit table is full, not tracking {}", reference);
            return None;
        };
        inner.refs.push(reference.clone());
        inner.ids.insert(reference, id);
        Some(id)
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .refs
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn next_id(registered: usize) -> Option<UnitId> {
    UnitId::try_from(registered).ok()
}

impl UnitResolver for UnitTable {
    fn resolve(&self, unit: UnitId) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .refs
            .get(unit as usize)
            .cloned()
    }
}

#[derive(Debug, Default)]
struct Touched {
    /// Units already accounted for in this interval.
    seen: HashSet<UnitId>,
    /// References recorded in this interval.
    refs: HashSet<String>,
    /// References that survive [`Collector::reset`].
    uncleanable: HashSet<String>,
}

/// Process-wide record of resources touched in the current interval.
pub struct Collector {
    probes: Box<[AtomicU64]>,
    recent: Option<Box<[AtomicU64]>>,
    touched: Mutex<Touched>,
    resolver: Arc<dyn UnitResolver>,
    filter: RefFilter,
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("cache_seen_units", &self.recent.is_some())
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

fn empty_table(size: usize) -> Box<[AtomicU64]> {
    (0..size).map(|_| AtomicU64::new(EMPTY_SLOT)).collect()
}

impl Collector {
    /// Creates a collector resolving units through `resolver`.
    ///
    /// `cache_seen_units` enables the lock-free table of recently seen units
    /// in front of the locked seen-set.
    pub fn new(resolver: Arc<dyn UnitResolver>, filter: RefFilter, cache_seen_units: bool) -> Self {
        Self {
            probes: empty_table(PROBE_TABLE_SIZE),
            recent: cache_seen_units.then(|| empty_table(SEEN_CACHE_SIZE)),
            touched: Mutex::new(Touched::default()),
            resolver,
            filter,
        }
    }

    pub fn from_config(config: &Config, resolver: Arc<dyn UnitResolver>) -> Result<Self> {
        Ok(Self::new(
            resolver,
            RefFilter::from_config(config)?,
            config.cache_seen_units,
        ))
    }

    pub fn filter(&self) -> &RefFilter {
        &self.filter
    }

    /// Starts a new interval. References added with
    /// [`add_uncleanable_ref`](Collector::add_uncleanable_ref) are kept.
    pub fn reset(&self) {
        let mut touched = self.lock();
        touched.seen.clear();
        touched.refs.clear();
        clear_table(&self.probes);
        if let Some(recent) = &self.recent {
            clear_table(recent);
        }
    }

    /// Records that `unit` was used at probe site `probe`.
    pub fn touch(&self, unit: UnitId, probe: u32) {
        let tagged = slot_value(unit);

        let slot = &self.probes[probe as usize & PROBE_MASK];
        if slot.load(Ordering::Relaxed) == tagged {
            return;
        }
        slot.store(tagged, Ordering::Relaxed);

        let recent = self
            .recent
            .as_ref()
            .map(|recent| &recent[unit as usize & SEEN_MASK]);
        if recent.is_some_and(|slot| slot.load(Ordering::Relaxed) == tagged) {
            return;
        }

        self.record_unit(unit);

        if let Some(slot) = recent {
            slot.store(tagged, Ordering::Relaxed);
        }
    }

    /// Records a field access on `value` at probe site `probe`.
    pub fn touch_value<T: Traced + ?Sized>(&self, value: &T, probe: u32) {
        self.touch(value.unit_id(), probe);
    }

    /// Adds references without filtering them.
    pub fn add_external_refs<I, S>(&self, refs: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut touched = self.lock();
        touched.refs.extend(refs.into_iter().map(Into::into));
    }

    /// Records a file that was read directly rather than through an
    /// instrumented unit.
    pub fn add_file(&self, path: &Path) {
        let path = match std::path::absolute(path) {
            Ok(path) => path,
            Err(e) => {
                debug!("Cannot make {} absolute: {}", path.display(), e);
                return;
            }
        };
        if self.filter.is_ignorable_file(&path) {
            return;
        }
        let reference = path.to_string_lossy().into_owned();
        if !self.filter.is_ignorable(&reference) {
            self.lock().refs.insert(reference);
        }
    }

    /// Adds a reference that stays recorded across intervals.
    pub fn add_uncleanable_ref(&self, reference: impl Into<String>) {
        let reference = reference.into();
        if !self.filter.is_ignorable(&reference) {
            self.lock().uncleanable.insert(reference);
        }
    }

    /// Returns every recorded reference, sorted and deduplicated.
    pub fn snapshot(&self) -> Vec<String> {
        let touched = self.lock();
        let mut refs: Vec<String> = touched
            .refs
            .iter()
            .chain(touched.uncleanable.iter())
            .cloned()
            .collect();
        drop(touched);
        refs.sort_unstable();
        refs.dedup();
        refs
    }

    fn record_unit(&self, unit: UnitId) {
        let mut touched = self.lock();
        if !touched.seen.insert(unit) {
            return;
        }
        match self.resolver.resolve(unit) {
            Some(reference) => {
                if self.filter.is_ignorable(&reference) {
                    trace!("Ignoring {}", reference);
                } else {
                    touched.refs.insert(reference);
                }
            }
            None => debug!("Unit {} has no resource reference", unit),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Touched> {
        self.touched.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn clear_table(table: &[AtomicU64]) {
    for slot in table {
        slot.store(EMPTY_SLOT, Ordering::Relaxed);
    }
}
