//! Seed quality scoring.
//!
//! Turns one execution trace plus the tracker's novelty result into a
//! [`QualityRecord`], and collapses that record into the scalar `score`
//! used for ranking:
//!
//! ```text
//! score = w1 * density
//!       + w2 * ln(1 + |unique_branches|)
//!       + w3 * [critical_calls non-empty]
//!       - w4 * ln(1 + visited)
//! ```
//!
//! The `visited` term gives diminishing returns: a seed selected over and
//! over drifts below fresh seeds with equal coverage.

use crate::coverage::{BranchId, NoveltySet};
use crate::critical::CriticalApiTable;
use crate::seed::Seed;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;

/// Errors from scoring.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScoreError {
    #[error("invalid trace for seed {seed_id}: {reason}")]
    InvalidTrace { seed_id: u64, reason: String },
}

/// Quality of one seed, as of its most recent execution.
///
/// Field names match the `//<Quality>` header block of generated seeds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityRecord {
    /// Novel branches per executed instruction, in `[0, 1]`.
    #[serde(default)]
    pub density: f64,
    /// Branches first discovered by this seed.
    #[serde(default)]
    pub unique_branches: BTreeMap<BranchId, bool>,
    /// Target-library calls in call order.
    #[serde(default)]
    pub library_calls: Vec<String>,
    #[serde(default)]
    pub critical_calls: Vec<String>,
    /// Times the seed has been selected and executed.
    #[serde(default)]
    pub visited: u64,
}

impl QualityRecord {
    /// Number of branches credited to this seed.
    pub fn unique_count(&self) -> usize {
        self.unique_branches.values().filter(|covered| **covered).count()
    }

    /// Whether the most recent execution discovered anything.
    pub fn has_novelty(&self) -> bool {
        self.unique_count() > 0
    }
}

/// Weights of the score formula.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub density: f64,
    pub unique_branches: f64,
    pub critical_calls: f64,
    pub visited_penalty: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            density: 1.0,
            unique_branches: 1.0,
            critical_calls: 0.5,
            visited_penalty: 0.25,
        }
    }
}

impl ScoreWeights {
    /// Collapse a quality record into a ranking score.
    pub fn score(&self, quality: &QualityRecord) -> f64 {
        let critical = if quality.critical_calls.is_empty() {
            0.0
        } else {
            1.0
        };
        self.density * quality.density
            + self.unique_branches * (quality.unique_count() as f64).ln_1p()
            + self.critical_calls * critical
            - self.visited_penalty * (quality.visited as f64).ln_1p()
    }
}

/// Raw result of one harness execution, as written by the instrumentation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    /// Absent when the instrumentation never finished writing its trace.
    #[serde(default)]
    pub instruction_count: Option<u64>,
    #[serde(default)]
    pub branch_ids: BTreeSet<BranchId>,
    /// Every call the harness made, in order, including non-library calls.
    #[serde(default)]
    pub library_calls: Vec<String>,
}

/// Computes quality records for executed seeds.
pub struct QualityScorer {
    weights: ScoreWeights,
    critical: Arc<CriticalApiTable>,
}

impl QualityScorer {
    pub fn new(weights: ScoreWeights, critical: Arc<CriticalApiTable>) -> Self {
        Self { weights, critical }
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }

    /// Check a trace on its own, before any of its branches are recorded.
    ///
    /// A trace passing this check cannot be rejected by [`Self::score`] for
    /// a novelty set drawn from its own branches. Returns the instruction
    /// count.
    pub fn validate(&self, seed_id: u64, trace: &ExecutionTrace) -> Result<u64, ScoreError> {
        let invalid = |reason: String| ScoreError::InvalidTrace { seed_id, reason };

        let instruction_count = trace
            .instruction_count
            .ok_or_else(|| invalid("missing instruction_count".to_string()))?;
        if instruction_count > 0 && trace.branch_ids.len() as u64 > instruction_count {
            return Err(invalid(format!(
                "{} branches exceed {} instructions",
                trace.branch_ids.len(),
                instruction_count
            )));
        }
        Ok(instruction_count)
    }

    /// Score one execution of `seed`.
    ///
    /// All-or-nothing: on error nothing about the seed has changed and the
    /// caller keeps its previous record.
    pub fn score(
        &self,
        seed: &Seed,
        trace: &ExecutionTrace,
        novelty: &NoveltySet,
    ) -> Result<QualityRecord, ScoreError> {
        let invalid = |reason: String| ScoreError::InvalidTrace {
            seed_id: seed.id,
            reason,
        };

        let instruction_count = self.validate(seed.id, trace)?;

        if instruction_count > 0 && novelty.len() as u64 > instruction_count {
            return Err(invalid(format!(
                "{} novel branches exceed {} instructions",
                novelty.len(),
                instruction_count
            )));
        }
        if let Some(stray) = novelty.iter().find(|id| !trace.branch_ids.contains(*id)) {
            return Err(invalid(format!("novel branch {stray} is not in the trace")));
        }

        let density = if instruction_count == 0 {
            0.0
        } else {
            novelty.len() as f64 / instruction_count as f64
        };

        let library_calls: Vec<String> = trace
            .library_calls
            .iter()
            .filter(|call| seed.target.is_library_api(call))
            .cloned()
            .collect();
        let critical_calls = self.critical.classify(seed.target, &library_calls);

        Ok(QualityRecord {
            density,
            unique_branches: novelty.iter().map(|id| (id.clone(), true)).collect(),
            library_calls,
            critical_calls,
            visited: seed.quality.visited.saturating_add(1),
        })
    }

    /// Record an execution that produced no usable trace (timeout, or a
    /// crash before the instrumentation could write).
    ///
    /// Zero novelty and one more visit; call log and density carry over so
    /// the seed is not penalised beyond the `visited` term.
    pub fn score_without_trace(&self, seed: &Seed) -> QualityRecord {
        QualityRecord {
            unique_branches: BTreeMap::new(),
            visited: seed.quality.visited.saturating_add(1),
            ..seed.quality.clone()
        }
    }

    /// Ranking score for a quality record.
    pub fn seed_score(&self, quality: &QualityRecord) -> f64 {
        self.weights.score(quality)
    }
}
