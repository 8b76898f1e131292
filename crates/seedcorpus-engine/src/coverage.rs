//! Branch coverage bookkeeping across the whole corpus run.
//!
//! Each target library is an independent coverage domain with its own
//! global branch set behind its own lock. Recording a trace computes the
//! novelty against that set and merges the trace in one critical section,
//! so two seeds executing concurrently can never both be credited with the
//! same branch.

use crate::target::{TargetError, TargetLibrary};
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Opaque identifier of one control-flow edge, as reported by the harness
/// instrumentation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchId(String);

impl BranchId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BranchId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for BranchId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for BranchId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Branches of one trace that no earlier trace of the same library hit.
pub type NoveltySet = BTreeSet<BranchId>;

/// The branch set of one library plus its trace counter.
#[derive(Debug, Default)]
struct GlobalBranchSet {
    branches: BTreeSet<BranchId>,
    traces: u64,
}

/// Tracks every branch ever observed, per target library.
pub struct BranchCoverageTracker {
    /// Libraries this tracker accepts traces for.
    registered: BTreeSet<TargetLibrary>,
    /// Lazily created per-library sets. The outer lock only guards the map
    /// shape; coverage updates take the inner per-library mutex.
    partitions: RwLock<BTreeMap<TargetLibrary, Arc<Mutex<GlobalBranchSet>>>>,
}

impl BranchCoverageTracker {
    /// Create a tracker accepting traces for the given libraries.
    pub fn new(targets: impl IntoIterator<Item = TargetLibrary>) -> Self {
        Self {
            registered: targets.into_iter().collect(),
            partitions: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create a tracker accepting every supported library.
    pub fn with_all_targets() -> Self {
        Self::new(TargetLibrary::ALL)
    }

    /// Libraries this tracker accepts.
    pub fn registered_targets(&self) -> impl Iterator<Item = TargetLibrary> + '_ {
        self.registered.iter().copied()
    }

    fn check_registered(&self, target: TargetLibrary) -> Result<(), TargetError> {
        if self.registered.contains(&target) {
            Ok(())
        } else {
            Err(TargetError::UnknownTarget(target.to_string()))
        }
    }

    /// Get the partition for `target`, creating it on first write.
    fn partition_for_write(&self, target: TargetLibrary) -> Arc<Mutex<GlobalBranchSet>> {
        if let Some(partition) = self.partitions.read().get(&target) {
            return Arc::clone(partition);
        }
        let mut partitions = self.partitions.write();
        Arc::clone(partitions.entry(target).or_default())
    }

    fn partition(&self, target: TargetLibrary) -> Option<Arc<Mutex<GlobalBranchSet>>> {
        self.partitions.read().get(&target).map(Arc::clone)
    }

    /// Record the branches hit by one execution.
    ///
    /// Returns the subset that was not yet in the library's global set, then
    /// merges the whole trace in. Linearizable per library.
    pub fn record_trace(
        &self,
        target: TargetLibrary,
        branch_ids: &BTreeSet<BranchId>,
    ) -> Result<NoveltySet, TargetError> {
        self.check_registered(target)?;
        let partition = self.partition_for_write(target);

        let (novelty, total) = {
            let mut set = partition.lock();
            let novelty: NoveltySet = branch_ids
                .iter()
                .filter(|id| !set.branches.contains(*id))
                .cloned()
                .collect();
            set.branches.extend(novelty.iter().cloned());
            set.traces += 1;
            (novelty, set.branches.len())
        };

        if novelty.is_empty() {
            debug!("{}: trace of {} branches, nothing new", target, branch_ids.len());
        } else {
            info!(
                "{}: new coverage: {} branches (total: {})",
                target,
                novelty.len(),
                total
            );
        }
        Ok(novelty)
    }

    /// Number of distinct branches observed for `target`.
    ///
    /// Does not create the library's set; a registered library that has not
    /// recorded anything yet reports zero.
    pub fn coverage_size(&self, target: TargetLibrary) -> Result<usize, TargetError> {
        self.check_registered(target)?;
        Ok(self
            .partition(target)
            .map_or(0, |partition| partition.lock().branches.len()))
    }

    /// Whether `target` already has a branch set.
    pub fn has_branch_set(&self, target: TargetLibrary) -> bool {
        self.partitions.read().contains_key(&target)
    }

    /// Copy of every library's branch set, for checkpointing.
    pub fn export(&self) -> BTreeMap<TargetLibrary, Vec<BranchId>> {
        let partitions = self.partitions.read();
        partitions
            .iter()
            .map(|(target, partition)| {
                let set = partition.lock();
                (*target, set.branches.iter().cloned().collect())
            })
            .collect()
    }

    /// Merge previously exported branch sets back in.
    ///
    /// Only ever grows the sets; restoring into a tracker that already saw
    /// branches keeps them.
    pub fn restore(
        &self,
        sets: &BTreeMap<TargetLibrary, Vec<BranchId>>,
    ) -> Result<(), TargetError> {
        for (target, branches) in sets {
            self.check_registered(*target)?;
            let partition = self.partition_for_write(*target);
            let mut set = partition.lock();
            set.branches.extend(branches.iter().cloned());
            info!("{}: restored {} branches", target, set.branches.len());
        }
        Ok(())
    }

    /// Get global coverage stats.
    pub fn stats(&self) -> CoverageStats {
        let partitions = self.partitions.read();
        let per_library: BTreeMap<TargetLibrary, LibraryCoverage> = partitions
            .iter()
            .map(|(target, partition)| {
                let set = partition.lock();
                (
                    *target,
                    LibraryCoverage {
                        total_branches: set.branches.len(),
                        total_traces: set.traces,
                    },
                )
            })
            .collect();

        let total_branches = per_library.values().map(|c| c.total_branches).sum();
        let total_traces = per_library.values().map(|c| c.total_traces).sum();

        CoverageStats {
            per_library,
            total_branches,
            total_traces,
            branches_per_trace_avg: if total_traces > 0 {
                total_branches as f64 / total_traces as f64
            } else {
                0.0
            },
        }
    }
}

/// Coverage of a single library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibraryCoverage {
    pub total_branches: usize,
    pub total_traces: u64,
}

/// Coverage statistics.
#[derive(Debug, Clone)]
pub struct CoverageStats {
    pub per_library: BTreeMap<TargetLibrary, LibraryCoverage>,
    pub total_branches: usize,
    pub total_traces: u64,
    pub branches_per_trace_avg: f64,
}
