//! Seed record store.
//!
//! Records live in an immutable, versioned map that is swapped atomically
//! on every write. Readers (listings, snapshots) hold an `Arc` to the
//! version they started from and never block writers; writers do an
//! optimistic read-modify-compare-and-swap and retry if another write
//! landed in between.

use crate::seed::Seed;
use crate::target::TargetLibrary;
use arc_swap::ArcSwap;
use log::debug;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors from the seed store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("seed {id} not found for {target}")]
    NotFound { target: TargetLibrary, id: u64 },

    #[error("seed {id} belongs to {stored}, refusing to store it under {incoming}")]
    Conflict {
        id: u64,
        stored: TargetLibrary,
        incoming: TargetLibrary,
    },
}

/// One immutable version of the store.
#[derive(Debug, Clone, Default)]
struct StoreState {
    version: u64,
    /// Keyed by id alone: ids are unique across libraries.
    seeds: BTreeMap<u64, Arc<Seed>>,
}

/// Which seeds a listing includes.
#[derive(Debug, Clone, Default)]
pub struct SeedFilter {
    pub include_retired: bool,
    pub min_score: Option<f64>,
    pub only_unvisited: bool,
}

impl SeedFilter {
    /// Non-retired seeds only.
    pub fn active() -> Self {
        Self::default()
    }

    /// Every seed, retired included.
    pub fn all() -> Self {
        Self {
            include_retired: true,
            ..Self::default()
        }
    }

    fn matches(&self, seed: &Seed) -> bool {
        (self.include_retired || !seed.retired)
            && self.min_score.map_or(true, |min| seed.score >= min)
            && (!self.only_unvisited || seed.quality.visited == 0)
    }
}

/// Scheduling order: score descending, then fewer visits, then lower id.
pub fn rank_order(a: &Seed, b: &Seed) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.quality.visited.cmp(&b.quality.visited))
        .then_with(|| a.id.cmp(&b.id))
}

/// Ordered view of one library's seeds at a fixed store version.
///
/// Iterating again restarts from the top and yields the same order.
pub struct SeedListing {
    state: Arc<StoreState>,
    order: Vec<u64>,
}

impl SeedListing {
    pub fn iter(&self) -> impl Iterator<Item = &Seed> + '_ {
        self.order
            .iter()
            .filter_map(move |id| self.state.seeds.get(id).map(|seed| &**seed))
    }

    pub fn ids(&self) -> &[u64] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Store version this listing was taken at.
    pub fn version(&self) -> u64 {
        self.state.version
    }
}

impl<'a> IntoIterator for &'a SeedListing {
    type Item = &'a Seed;
    type IntoIter = Box<dyn Iterator<Item = &'a Seed> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// Immutable point-in-time export of one library's seeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusSnapshot {
    pub target: TargetLibrary,
    /// Milliseconds since the Unix epoch.
    pub created_at_ms: u64,
    pub store_version: u64,
    /// Ordered by id.
    pub seeds: Vec<Seed>,
}

impl CorpusSnapshot {
    pub fn seed(&self, id: u64) -> Option<&Seed> {
        self.seeds.iter().find(|seed| seed.id == id)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Durable, queryable storage for seed records.
pub struct SeedStore {
    state: ArcSwap<StoreState>,
}

impl SeedStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(StoreState::default()),
        }
    }

    /// Build a store from previously persisted records.
    pub fn from_seeds(seeds: impl IntoIterator<Item = Seed>) -> Result<Self, StoreError> {
        let store = Self::new();
        for seed in seeds {
            store.upsert(seed)?;
        }
        Ok(store)
    }

    /// Rebuild a store whose version continues from `version`, as recorded
    /// when its seeds were saved.
    pub fn from_seeds_at(seeds: impl IntoIterator<Item = Seed>, version: u64) -> Result<Self, StoreError> {
        let store = Self::from_seeds(seeds)?;
        let current = store.state.load_full();
        if version > current.version {
            let mut next = StoreState::clone(&current);
            next.version = version;
            store.state.store(Arc::new(next));
        }
        Ok(store)
    }

    /// Insert or replace the record for `(seed.target, seed.id)`.
    pub fn upsert(&self, seed: Seed) -> Result<(), StoreError> {
        let seed = Arc::new(seed);
        let mut attempts = 0u32;
        loop {
            let current = self.state.load_full();
            if let Some(stored) = current.seeds.get(&seed.id) {
                if stored.target != seed.target {
                    return Err(StoreError::Conflict {
                        id: seed.id,
                        stored: stored.target,
                        incoming: seed.target,
                    });
                }
            }

            let mut next = StoreState::clone(&current);
            next.version += 1;
            next.seeds.insert(seed.id, Arc::clone(&seed));

            let previous = self.state.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&*previous, &current) {
                return Ok(());
            }
            attempts += 1;
            debug!("upsert of seed {} raced, retry {}", seed.id, attempts);
        }
    }

    /// Insert `seed` unless its id is already stored. Returns whether it was
    /// inserted; an existing record is left untouched.
    pub fn insert_if_absent(&self, seed: Seed) -> Result<bool, StoreError> {
        let seed = Arc::new(seed);
        loop {
            let current = self.state.load_full();
            if let Some(stored) = current.seeds.get(&seed.id) {
                if stored.target != seed.target {
                    return Err(StoreError::Conflict {
                        id: seed.id,
                        stored: stored.target,
                        incoming: seed.target,
                    });
                }
                return Ok(false);
            }

            let mut next = StoreState::clone(&current);
            next.version += 1;
            next.seeds.insert(seed.id, Arc::clone(&seed));

            let previous = self.state.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&*previous, &current) {
                return Ok(true);
            }
            debug!("insert of seed {} raced, retrying", seed.id);
        }
    }

    /// Read-modify-write one record, retrying on concurrent writes.
    ///
    /// Returns the updated record.
    pub fn update<F>(&self, target: TargetLibrary, id: u64, mut f: F) -> Result<Seed, StoreError>
    where
        F: FnMut(&mut Seed),
    {
        loop {
            let current = self.state.load_full();
            let stored = current
                .seeds
                .get(&id)
                .filter(|seed| seed.target == target)
                .ok_or(StoreError::NotFound { target, id })?;

            let mut updated = Seed::clone(stored);
            f(&mut updated);
            // Identity is not the closure's to change.
            updated.id = id;
            updated.target = target;

            let mut next = StoreState::clone(&current);
            next.version += 1;
            next.seeds.insert(id, Arc::new(updated.clone()));

            let previous = self.state.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&*previous, &current) {
                return Ok(updated);
            }
        }
    }

    /// Fetch one record.
    pub fn get(&self, target: TargetLibrary, id: u64) -> Result<Seed, StoreError> {
        self.state
            .load()
            .seeds
            .get(&id)
            .filter(|seed| seed.target == target)
            .map(|seed| Seed::clone(seed))
            .ok_or(StoreError::NotFound { target, id })
    }

    /// Seeds of `target` matching `filter`, in scheduling order.
    pub fn list_by_library(&self, target: TargetLibrary, filter: &SeedFilter) -> SeedListing {
        let state = self.state.load_full();
        let mut ranked: Vec<&Arc<Seed>> = state
            .seeds
            .values()
            .filter(|seed| seed.target == target && filter.matches(seed))
            .collect();
        ranked.sort_by(|a, b| rank_order(a, b));
        let order = ranked.iter().map(|seed| seed.id).collect();

        SeedListing { state, order }
    }

    /// Export every record of `target` as of now.
    pub fn snapshot(&self, target: TargetLibrary) -> CorpusSnapshot {
        let state = self.state.load_full();
        CorpusSnapshot {
            target,
            created_at_ms: now_ms(),
            store_version: state.version,
            seeds: state
                .seeds
                .values()
                .filter(|seed| seed.target == target)
                .map(|seed| Seed::clone(seed))
                .collect(),
        }
    }

    /// Every record, ordered by id.
    pub fn all_seeds(&self) -> Vec<Seed> {
        self.state
            .load()
            .seeds
            .values()
            .map(|seed| Seed::clone(seed))
            .collect()
    }

    /// Libraries that have at least one record.
    pub fn targets(&self) -> Vec<TargetLibrary> {
        let mut targets: Vec<TargetLibrary> = self
            .state
            .load()
            .seeds
            .values()
            .map(|seed| seed.target)
            .collect();
        targets.sort();
        targets.dedup();
        targets
    }

    /// Current store version; bumps on every write.
    pub fn version(&self) -> u64 {
        self.state.load().version
    }

    pub fn len(&self) -> usize {
        self.state.load().seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.load().seeds.is_empty()
    }
}

impl Default for SeedStore {
    fn default() -> Self {
        Self::new()
    }
}
