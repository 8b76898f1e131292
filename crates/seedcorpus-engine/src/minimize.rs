//! Corpus minimization.
//!
//! Greedy set cover over the active seeds of one library: repeatedly keep
//! the seed adding the most not-yet-covered features, ties broken by store
//! order. A feature is either a branch the seed reached or, for corpora
//! judged by API usage rather than coverage, an ordered triple of
//! consecutive library calls. Crash-producing seeds are always kept.
//! Nothing is modified; the result is a report the caller can act on.

use crate::seed::Seed;
use crate::store::{rank_order, SeedFilter, SeedStore};
use crate::target::TargetLibrary;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// What a minimized corpus must keep covering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MinimizeMode {
    /// Every branch reached by the active corpus.
    #[default]
    Branches,
    /// Every window of three consecutive library calls.
    ApiTriples,
}

impl fmt::Display for MinimizeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MinimizeMode::Branches => "branches",
            MinimizeMode::ApiTriples => "api-triples",
        })
    }
}

impl FromStr for MinimizeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "branches" | "branch" | "coverage" => Ok(MinimizeMode::Branches),
            "api-triples" | "triples" | "api" => Ok(MinimizeMode::ApiTriples),
            other => Err(format!("unknown minimize mode: {other}")),
        }
    }
}

/// An ordered window of three consecutive library calls.
pub type ApiTriple = (String, String, String);

/// The distinct call triples of a call log.
pub fn api_triples(calls: &[String]) -> BTreeSet<ApiTriple> {
    calls
        .windows(3)
        .filter_map(|w| match w {
            [a, b, c] => Some((a.clone(), b.clone(), c.clone())),
            _ => None,
        })
        .collect()
}

/// Outcome of a minimization pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinimizeReport {
    pub target: TargetLibrary,
    pub mode: MinimizeMode,
    /// Seeds forming the cover, in pick order.
    pub kept: Vec<u64>,
    /// Active seeds the cover makes redundant, by id.
    pub redundant: Vec<u64>,
    /// Distinct features reached by the active corpus.
    pub total_features: usize,
}

impl MinimizeReport {
    pub fn reduction(&self) -> f64 {
        let total = self.kept.len() + self.redundant.len();
        if total == 0 {
            0.0
        } else {
            self.redundant.len() as f64 / total as f64
        }
    }
}

/// Minimize `target`'s active seeds by branch coverage.
pub fn minimize(store: &SeedStore, target: TargetLibrary) -> MinimizeReport {
    minimize_by(store, target, MinimizeMode::Branches)
}

/// Compute a minimal-ish subset of `target`'s active seeds that keeps every
/// feature of `mode` they reach.
pub fn minimize_by(store: &SeedStore, target: TargetLibrary, mode: MinimizeMode) -> MinimizeReport {
    let listing = store.list_by_library(target, &SeedFilter::active());
    let seeds: Vec<&Seed> = listing.iter().collect();
    let (kept, redundant, total_features) = match mode {
        MinimizeMode::Branches => {
            greedy_cover(&seeds, |seed| seed.coverage.iter().cloned().collect())
        }
        MinimizeMode::ApiTriples => greedy_cover(&seeds, |seed| api_triples(&seed.quality.library_calls)),
    };

    MinimizeReport {
        target,
        mode,
        kept,
        redundant,
        total_features,
    }
}

fn greedy_cover<K, F>(seeds: &[&Seed], features: F) -> (Vec<u64>, Vec<u64>, usize)
where
    K: Ord,
    F: Fn(&Seed) -> BTreeSet<K>,
{
    let mut candidates: Vec<(&Seed, BTreeSet<K>)> =
        seeds.iter().map(|seed| (*seed, features(*seed))).collect();
    let universe = candidates
        .iter()
        .flat_map(|(_, f)| f.iter())
        .collect::<BTreeSet<&K>>()
        .len();

    let mut kept = Vec::new();
    let mut covered: BTreeSet<K> = BTreeSet::new();

    let mut remaining = Vec::with_capacity(candidates.len());
    for (seed, set) in candidates.drain(..) {
        if seed.crash_count > 0 {
            kept.push(seed.id);
            covered.extend(set);
        } else {
            remaining.push((seed, set));
        }
    }

    while covered.len() < universe {
        let best = remaining
            .iter()
            .enumerate()
            .map(|(i, (_, set))| (i, set.iter().filter(|k| !covered.contains(*k)).count()))
            .filter(|(_, gain)| *gain > 0)
            .max_by(|(ia, ga), (ib, gb)| {
                ga.cmp(gb)
                    .then_with(|| rank_order(remaining[*ib].0, remaining[*ia].0))
            });
        let Some((index, _)) = best else {
            break;
        };
        let (seed, set) = remaining.swap_remove(index);
        covered.extend(set);
        kept.push(seed.id);
    }

    let mut redundant: Vec<u64> = remaining.iter().map(|(s, _)| s.id).collect();
    redundant.sort_unstable();
    (kept, redundant, universe)
}
