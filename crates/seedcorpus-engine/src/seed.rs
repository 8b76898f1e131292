//! The seed record: one generated API-sequence harness and its bookkeeping.

use crate::coverage::BranchId;
use crate::quality::QualityRecord;
use crate::target::TargetLibrary;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// One generated harness targeting a single wrapped library.
///
/// `id` and `target` never change once assigned; the store refuses an
/// upsert that would move an id to another library. Everything else is
/// rewritten by the execute → score → persist pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seed {
    pub id: u64,
    pub target: TargetLibrary,
    /// Symbolic instructions that produced the seed.
    #[serde(default)]
    pub prompt: Vec<String>,
    /// API names the seed was built from, in order. Defines lineage.
    #[serde(default)]
    pub combination: Vec<String>,
    #[serde(default)]
    pub quality: QualityRecord,
    #[serde(default)]
    pub score: f64,
    /// Superseded by a dominating ancestor; excluded from selection.
    #[serde(default)]
    pub retired: bool,
    #[serde(default)]
    pub crash_count: u32,
    #[serde(default)]
    pub timeout_count: u32,
    /// Seed this one was mutated from, when the generator recorded it.
    #[serde(default)]
    pub parent: Option<u64>,
    /// Every branch the most recent execution hit (not only novel ones).
    #[serde(default)]
    pub coverage: BTreeSet<BranchId>,
    /// Source file the seed was ingested from.
    #[serde(default)]
    pub source: Option<PathBuf>,
    /// Compiled harness; when absent the scheduler derives it from the id.
    #[serde(default)]
    pub binary: Option<PathBuf>,
}

impl Seed {
    /// A never-run seed with empty quality.
    pub fn new(id: u64, target: TargetLibrary) -> Self {
        Self {
            id,
            target,
            prompt: Vec::new(),
            combination: Vec::new(),
            quality: QualityRecord::default(),
            score: 0.0,
            retired: false,
            crash_count: 0,
            timeout_count: 0,
            parent: None,
            coverage: BTreeSet::new(),
            source: None,
            binary: None,
        }
    }

    pub fn with_combination<S: Into<String>>(mut self, calls: impl IntoIterator<Item = S>) -> Self {
        self.combination = calls.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_prompt<S: Into<String>>(mut self, hints: impl IntoIterator<Item = S>) -> Self {
        self.prompt = hints.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_parent(mut self, parent: u64) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    /// Whether the seed has been executed at least once.
    pub fn is_executed(&self) -> bool {
        self.quality.visited > 0
    }
}
