//! Dominance pruning: retiring seeds an ancestor already subsumes.
//!
//! Two seeds reaching the same branches through a different API ordering
//! can both matter for a library's internal state machine (parse-then-mutate
//! versus create-then-mutate), so how strict the comparison is stays a
//! policy choice.

use crate::seed::Seed;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// How a descendant is compared against its ancestors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DominancePolicy {
    /// Never retire anything.
    Disabled,
    /// Branch set and distinct API set must both be covered by the ancestor.
    BranchSubset,
    /// As `BranchSubset`, and the call log must be a subsequence of the
    /// ancestor's, so a different call order keeps the seed alive.
    #[default]
    OrderSensitive,
}

impl fmt::Display for DominancePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DominancePolicy::Disabled => "disabled",
            DominancePolicy::BranchSubset => "branch-subset",
            DominancePolicy::OrderSensitive => "order-sensitive",
        })
    }
}

impl FromStr for DominancePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disabled" | "off" => Ok(DominancePolicy::Disabled),
            "branch-subset" | "subset" => Ok(DominancePolicy::BranchSubset),
            "order-sensitive" | "ordered" => Ok(DominancePolicy::OrderSensitive),
            other => Err(format!(
                "unknown dominance policy '{other}'. Use 'disabled', 'branch-subset' or 'order-sensitive'."
            )),
        }
    }
}

/// Whether `ancestor` is a strict lineage ancestor of `seed`.
///
/// Either it sits on `seed`'s explicit parent chain, or it is an older seed
/// whose non-empty combination is a prefix of `seed`'s combination.
pub fn is_strict_ancestor(ancestor: &Seed, seed: &Seed, by_id: &BTreeMap<u64, &Seed>) -> bool {
    if ancestor.id == seed.id || ancestor.target != seed.target {
        return false;
    }

    let mut seen = BTreeSet::new();
    let mut cursor = seed.parent;
    while let Some(parent) = cursor {
        if parent == ancestor.id {
            return true;
        }
        if !seen.insert(parent) {
            break;
        }
        cursor = by_id.get(&parent).and_then(|p| p.parent);
    }

    ancestor.id < seed.id
        && !ancestor.combination.is_empty()
        && seed.combination.starts_with(&ancestor.combination)
}

fn distinct_calls(seed: &Seed) -> BTreeSet<&str> {
    seed.quality.library_calls.iter().map(String::as_str).collect()
}

fn is_subsequence(needle: &[String], haystack: &[String]) -> bool {
    let mut rest = haystack.iter();
    needle.iter().all(|call| rest.any(|candidate| candidate == call))
}

/// Whether `ancestor`'s coverage subsumes `seed`'s under `policy`.
pub fn dominates(ancestor: &Seed, seed: &Seed, policy: DominancePolicy) -> bool {
    match policy {
        DominancePolicy::Disabled => false,
        DominancePolicy::BranchSubset => {
            seed.coverage.is_subset(&ancestor.coverage)
                && distinct_calls(seed).is_subset(&distinct_calls(ancestor))
        }
        DominancePolicy::OrderSensitive => {
            dominates(ancestor, seed, DominancePolicy::BranchSubset)
                && is_subsequence(&seed.quality.library_calls, &ancestor.quality.library_calls)
        }
    }
}

/// Find an ancestor that makes `seed` redundant.
///
/// Only seeds whose latest execution found nothing new are candidates, and
/// crash-producing seeds are never retired.
pub fn find_dominating_ancestor<'a>(
    seed: &Seed,
    corpus: &[&'a Seed],
    policy: DominancePolicy,
) -> Option<&'a Seed> {
    if policy == DominancePolicy::Disabled
        || seed.retired
        || seed.crash_count > 0
        || seed.quality.has_novelty()
    {
        return None;
    }

    let by_id: BTreeMap<u64, &Seed> = corpus.iter().map(|s| (s.id, *s)).collect();
    corpus
        .iter()
        .copied()
        .filter(|candidate| is_strict_ancestor(candidate, seed, &by_id))
        .find(|candidate| dominates(candidate, seed, policy))
}
