//! The selection loop: pick seeds, run them, rescore, retire.
//!
//! One cycle walks **Idle → Selecting → Executing → Updating → Retiring →
//! Idle**. Execution fans out over the worker pool; every tracker, scorer
//! and store update happens back on the coordinating thread, so each
//! executed seed is updated exactly once per cycle.

use crate::config::{ConfigError, EngineConfig};
use crate::coverage::{BranchCoverageTracker, CoverageStats};
use crate::critical::{CriticalApiTable, CriticalTableError};
use crate::dominance::find_dominating_ancestor;
use crate::executor::{classify, ExecutionOutcome, HarnessAdapter, HarnessRun};
use crate::persistence::{save_checkpoint_to_dir, EngineCheckpoint, PersistError};
use crate::pool::{Job, JobResult, WorkerPool};
use crate::quality::{QualityRecord, QualityScorer, ScoreError};
use crate::seed::Seed;
use crate::store::{SeedFilter, SeedStore, StoreError};
use crate::target::{TargetError, TargetLibrary};
use log::{debug, info, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors from the scheduler.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Target error: {0}")]
    Target(#[from] TargetError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Scoring error: {0}")]
    Score(#[from] ScoreError),

    #[error("Critical API table error: {0}")]
    Critical(#[from] CriticalTableError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),
}

/// Where the scheduler is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Idle,
    Selecting,
    Executing,
    Updating,
    Retiring,
}

/// What happened to one seed during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    Success { novel: usize, sentinel_ok: bool },
    Crash { novel: usize },
    Timeout,
}

/// Result of a single cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub target: TargetLibrary,
    /// Whole-corpus recheck rather than a selection cycle.
    pub recheck: bool,
    /// Seeds picked for the batch, in selection order.
    pub selected: Vec<u64>,
    /// Seeds whose execution was recorded.
    pub executed: Vec<(u64, SeedOutcome)>,
    /// Seeds dropped from this cycle by an adapter, scoring or store error.
    pub skipped: Vec<u64>,
    pub retired: Vec<u64>,
    pub new_branches: usize,
    pub coverage_size: usize,
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn crashes(&self) -> usize {
        self.executed
            .iter()
            .filter(|(_, o)| matches!(o, SeedOutcome::Crash { .. }))
            .count()
    }

    pub fn timeouts(&self) -> usize {
        self.executed
            .iter()
            .filter(|(_, o)| matches!(o, SeedOutcome::Timeout))
            .count()
    }

    /// Runs that exited cleanly but not with the success sentinel.
    pub fn api_failures(&self) -> usize {
        self.executed
            .iter()
            .filter(|(_, o)| matches!(o, SeedOutcome::Success { sentinel_ok: false, .. }))
            .count()
    }
}

/// Why a campaign stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MaxCycles,
    /// `converge_rounds` consecutive cycles found nothing new.
    Converged,
    /// No active seeds left to select.
    Exhausted,
}

/// Final campaign report.
#[derive(Debug, Clone)]
pub struct CampaignReport {
    pub target: TargetLibrary,
    pub cycles: Vec<CycleReport>,
    pub stop_reason: StopReason,
    pub coverage_stats: CoverageStats,
    pub total_executions: u64,
    pub active_seeds: usize,
    pub retired_seeds: usize,
}

/// Scores, selects and evolves the seed corpus.
pub struct CorpusScheduler {
    config: EngineConfig,
    tracker: BranchCoverageTracker,
    scorer: QualityScorer,
    store: Arc<SeedStore>,
    adapter: Arc<dyn HarnessAdapter>,
    pool: WorkerPool,
    rng_seed: u64,
    rng: ChaCha8Rng,
    phase: SchedulerPhase,
    cycles_completed: u64,
    total_executions: u64,
}

impl CorpusScheduler {
    /// Create a scheduler over `store`, running harnesses through `adapter`.
    pub fn new(
        config: EngineConfig,
        store: Arc<SeedStore>,
        adapter: Arc<dyn HarnessAdapter>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;

        let critical = match &config.critical_table {
            Some(path) => CriticalApiTable::from_path(path)?,
            None => CriticalApiTable::builtin()?,
        };
        info!(
            "Critical API table v{} ({} libraries)",
            critical.version,
            critical.libraries.len()
        );

        let tracker = BranchCoverageTracker::new(config.targets.iter().copied());
        let scorer = QualityScorer::new(config.weights, Arc::new(critical));
        let pool = WorkerPool::new(config.workers, config.timeout());
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        let rng_seed = config.seed;

        Ok(Self {
            config,
            tracker,
            scorer,
            store,
            adapter,
            pool,
            rng_seed,
            rng,
            phase: SchedulerPhase::Idle,
            cycles_completed: 0,
            total_executions: 0,
        })
    }

    /// Resume from a checkpoint. Seeds go into a fresh store at the saved
    /// version and the global branch sets are restored, so only branches
    /// nobody found yet count as novel. Selection continues the saved RNG
    /// stream rather than restarting it.
    pub fn from_checkpoint(
        config: EngineConfig,
        checkpoint: EngineCheckpoint,
        adapter: Arc<dyn HarnessAdapter>,
    ) -> Result<Self, SchedulerError> {
        let store = Arc::new(SeedStore::from_seeds_at(
            checkpoint.seeds,
            checkpoint.store_version,
        )?);
        let mut scheduler = Self::new(config, store, adapter)?;
        scheduler.tracker.restore(&checkpoint.branch_sets)?;
        scheduler.cycles_completed = checkpoint.cycles_completed;
        scheduler.total_executions = checkpoint.total_executions;

        if checkpoint.rng_seed != scheduler.config.seed {
            warn!(
                "Checkpoint was taken with RNG seed {}, ignoring configured seed {}",
                checkpoint.rng_seed, scheduler.config.seed
            );
        }
        scheduler.rng_seed = checkpoint.rng_seed;
        scheduler.rng = ChaCha8Rng::seed_from_u64(checkpoint.rng_seed);
        scheduler.rng.set_word_pos(checkpoint.rng_word_pos);

        info!(
            "Restored checkpoint: {} cycles completed, {} executions, {} seeds",
            checkpoint.cycles_completed,
            checkpoint.total_executions,
            scheduler.store.len()
        );
        Ok(scheduler)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SeedStore> {
        &self.store
    }

    pub fn tracker(&self) -> &BranchCoverageTracker {
        &self.tracker
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.phase
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed
    }

    /// Run a campaign on `target` until it converges, runs out of active
    /// seeds or reaches `max_cycles`.
    pub fn run(&mut self, target: TargetLibrary) -> Result<CampaignReport, SchedulerError> {
        info!(
            "Starting campaign on {}: up to {} cycles of {} seeds, {} workers",
            target,
            self.config.max_cycles,
            self.config.batch_size,
            self.pool.workers()
        );

        let mut cycles = Vec::new();
        let mut quiet = 0u64;
        let mut rechecked = false;
        let mut stop_reason = StopReason::MaxCycles;

        for cycle in 0..self.config.max_cycles {
            info!("=== Cycle {}/{} ===", cycle + 1, self.config.max_cycles);
            let report = self.run_cycle(target, self.config.batch_size)?;
            self.save_checkpoint_if_configured();

            let selected = report.selected.len();
            quiet = if report.new_branches == 0 { quiet + 1 } else { 0 };
            cycles.push(report);

            if selected == 0 {
                info!("No active seeds left, stopping");
                stop_reason = StopReason::Exhausted;
                break;
            }
            if !rechecked && self.recheck_due(quiet) {
                info!("No new branches for {} cycles, rechecking the corpus", quiet);
                let report = self.recheck(target)?;
                self.save_checkpoint_if_configured();
                cycles.push(report);
                rechecked = true;
                quiet = 0;
                continue;
            }
            if self.config.converge_rounds > 0 && quiet >= self.config.converge_rounds {
                info!("No new branches for {} cycles, converged", quiet);
                stop_reason = StopReason::Converged;
                break;
            }
        }

        let all = self.store.list_by_library(target, &SeedFilter::all());
        let retired_seeds = all.iter().filter(|s| s.retired).count();

        Ok(CampaignReport {
            target,
            cycles,
            stop_reason,
            coverage_stats: self.tracker.stats(),
            total_executions: self.total_executions,
            active_seeds: all.len() - retired_seeds,
            retired_seeds,
        })
    }

    /// One recheck per campaign, once half of `converge_rounds` passed
    /// without new branches.
    fn recheck_due(&self, quiet: u64) -> bool {
        self.config.recheck
            && self.config.converge_rounds > 0
            && quiet >= (self.config.converge_rounds / 2).max(1)
    }

    fn save_checkpoint_if_configured(&self) {
        if let Some(dir) = &self.config.output_dir {
            if let Err(e) = self.save_checkpoint_to_dir(dir) {
                warn!("Failed to save checkpoint: {}", e);
            }
        }
    }

    /// Execute one selection cycle on `target` with up to `batch_size` seeds.
    pub fn run_cycle(
        &mut self,
        target: TargetLibrary,
        batch_size: usize,
    ) -> Result<CycleReport, SchedulerError> {
        self.tracker.coverage_size(target)?;

        self.phase = SchedulerPhase::Selecting;
        let batch = self.select(target, batch_size);
        self.execute_batch(target, batch, false)
    }

    /// Re-execute every active seed of `target` once.
    ///
    /// Seeds scored on an earlier corpus may no longer run cleanly. A
    /// recheck refreshes every record against the current global branch
    /// set and additionally retires seeds that now fail their success
    /// sentinel. Crashing seeds are kept.
    pub fn recheck(&mut self, target: TargetLibrary) -> Result<CycleReport, SchedulerError> {
        self.tracker.coverage_size(target)?;

        self.phase = SchedulerPhase::Selecting;
        let listing = self.store.list_by_library(target, &SeedFilter::active());
        let batch: Vec<Seed> = listing.iter().cloned().collect();
        info!("Rechecking {} active seeds of {}", batch.len(), target);
        self.execute_batch(target, batch, true)
    }

    fn execute_batch(
        &mut self,
        target: TargetLibrary,
        batch: Vec<Seed>,
        recheck: bool,
    ) -> Result<CycleReport, SchedulerError> {
        let started = Instant::now();
        let cycle = self.cycles_completed + 1;
        let selected: Vec<u64> = batch.iter().map(|s| s.id).collect();
        debug!("Cycle {}: selected {:?}", cycle, selected);

        self.phase = SchedulerPhase::Executing;
        let jobs: Vec<Job> = batch
            .iter()
            .map(|seed| Job {
                seed_id: seed.id,
                binary: self.config.binary_for(seed),
            })
            .collect();
        let mut results = Vec::with_capacity(jobs.len());
        self.pool
            .run(self.adapter.as_ref(), jobs, |result| results.push(result));
        self.total_executions += results.len() as u64;

        self.phase = SchedulerPhase::Updating;
        let mut executed = Vec::new();
        let mut skipped = Vec::new();
        let mut new_branches = 0;
        for JobResult { seed_id, result } in results {
            let run = match result {
                Ok(run) => run,
                Err(e) => {
                    warn!("Seed {} skipped: {}", seed_id, e);
                    skipped.push(seed_id);
                    continue;
                }
            };
            match self.apply_run(target, seed_id, run) {
                Ok(outcome) => {
                    new_branches += match outcome {
                        SeedOutcome::Success { novel, .. } | SeedOutcome::Crash { novel } => novel,
                        SeedOutcome::Timeout => 0,
                    };
                    executed.push((seed_id, outcome));
                }
                Err(e) => {
                    warn!("Seed {} skipped: {}", seed_id, e);
                    skipped.push(seed_id);
                }
            }
        }

        self.phase = SchedulerPhase::Retiring;
        let mut retired = Vec::new();
        if recheck {
            let failing: Vec<u64> = executed
                .iter()
                .filter(|(_, o)| matches!(o, SeedOutcome::Success { sentinel_ok: false, .. }))
                .map(|(id, _)| *id)
                .collect();
            retired.extend(self.retire_failing(target, &failing));
        }
        let executed_ids: Vec<u64> = executed
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| !retired.contains(id))
            .collect();
        retired.extend(self.retire_dominated(target, &executed_ids));

        self.phase = SchedulerPhase::Idle;
        self.cycles_completed += 1;

        let report = CycleReport {
            cycle,
            target,
            recheck,
            selected,
            executed,
            skipped,
            retired,
            new_branches,
            coverage_size: self.tracker.coverage_size(target)?,
            elapsed: started.elapsed(),
        };
        info!(
            "Cycle {}{}: {} executed, {} new branches, {} crashes, {} timeouts, {} retired, coverage {}",
            cycle,
            if recheck { " (recheck)" } else { "" },
            report.executed.len(),
            report.new_branches,
            report.crashes(),
            report.timeouts(),
            report.retired.len(),
            report.coverage_size
        );
        Ok(report)
    }

    /// Top of the store order, with each slot swapped for a random active
    /// seed at `exploration_rate`.
    fn select(&mut self, target: TargetLibrary, batch_size: usize) -> Vec<Seed> {
        let listing = self.store.list_by_library(target, &SeedFilter::active());
        let mut remaining: Vec<Seed> = listing.iter().cloned().collect();
        let rate = self.config.exploration_rate;

        let mut batch = Vec::with_capacity(batch_size.min(remaining.len()));
        while batch.len() < batch_size && !remaining.is_empty() {
            let index = if rate > 0.0 && self.rng.gen_bool(rate) {
                self.rng.gen_range(0..remaining.len())
            } else {
                0
            };
            batch.push(remaining.remove(index));
        }
        batch
    }

    /// Validate, then record, then score. A rejected trace never reaches
    /// the tracker, so its branches stay available to the next seed that
    /// hits them.
    fn score_trace(&self, seed: &Seed, run: &HarnessRun) -> Result<QualityRecord, SchedulerError> {
        self.scorer.validate(seed.id, &run.trace)?;
        let novelty = self.tracker.record_trace(seed.target, &run.trace.branch_ids)?;
        Ok(self.scorer.score(seed, &run.trace, &novelty)?)
    }

    /// Fold one execution into the seed's record.
    fn apply_run(
        &self,
        target: TargetLibrary,
        seed_id: u64,
        run: HarnessRun,
    ) -> Result<SeedOutcome, SchedulerError> {
        let current = self.store.get(target, seed_id)?;
        let outcome = classify(run.status, &self.config.crash_exit_codes);

        let (quality, coverage) = match outcome {
            ExecutionOutcome::Timeout => (self.scorer.score_without_trace(&current), None),
            ExecutionOutcome::Crash => match self.score_trace(&current, &run) {
                Ok(quality) => (quality, Some(run.trace.branch_ids.clone())),
                Err(e) => {
                    debug!("Seed {} crashed without a usable trace: {}", seed_id, e);
                    (self.scorer.score_without_trace(&current), None)
                }
            },
            ExecutionOutcome::Success { .. } => {
                let quality = self.score_trace(&current, &run)?;
                (quality, Some(run.trace.branch_ids.clone()))
            }
        };

        let novel = quality.unique_count();
        let score = self.scorer.seed_score(&quality);
        self.store.update(target, seed_id, |seed| {
            seed.quality = quality.clone();
            seed.score = score;
            if let Some(coverage) = &coverage {
                seed.coverage = coverage.clone();
            }
            match outcome {
                ExecutionOutcome::Crash => seed.crash_count += 1,
                ExecutionOutcome::Timeout => seed.timeout_count += 1,
                ExecutionOutcome::Success { .. } => {}
            }
        })?;

        let outcome = match outcome {
            ExecutionOutcome::Success { sentinel_ok } => SeedOutcome::Success { novel, sentinel_ok },
            ExecutionOutcome::Crash => {
                warn!("Seed {} crashed (score {:.3})", seed_id, score);
                SeedOutcome::Crash { novel }
            }
            ExecutionOutcome::Timeout => {
                warn!("Seed {} timed out", seed_id);
                SeedOutcome::Timeout
            }
        };
        debug!("Seed {}: {:?}, score {:.4}", seed_id, outcome, score);
        Ok(outcome)
    }

    /// Retire rechecked seeds that ran but no longer reach their success
    /// sentinel. Seeds with a crash on record stay.
    fn retire_failing(&self, target: TargetLibrary, failing: &[u64]) -> Vec<u64> {
        let mut retired = Vec::new();
        for id in failing {
            let result = self.store.update(target, *id, |s| {
                if s.crash_count == 0 {
                    s.retired = true;
                }
            });
            match result {
                Ok(seed) if seed.retired => {
                    info!("Retired seed {}: fails its success sentinel on recheck", id);
                    retired.push(*id);
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to retire seed {}: {}", id, e),
            }
        }
        retired
    }

    /// Retire seeds executed this cycle that an ancestor dominates.
    fn retire_dominated(&self, target: TargetLibrary, executed: &[u64]) -> Vec<u64> {
        let policy = self.config.dominance;
        let listing = self.store.list_by_library(target, &SeedFilter::all());
        let corpus: Vec<&Seed> = listing.iter().collect();

        let mut retired = Vec::new();
        for id in executed {
            let Some(seed) = corpus.iter().find(|s| s.id == *id) else {
                continue;
            };
            let Some(ancestor) = find_dominating_ancestor(seed, &corpus, policy) else {
                continue;
            };
            match self.store.update(target, *id, |s| s.retired = true) {
                Ok(_) => {
                    info!("Retired seed {}: dominated by seed {}", id, ancestor.id);
                    retired.push(*id);
                }
                Err(e) => warn!("Failed to retire seed {}: {}", id, e),
            }
        }
        retired
    }

    /// Current state as a checkpoint.
    pub fn checkpoint(&self) -> EngineCheckpoint {
        EngineCheckpoint::new(
            self.store.all_seeds(),
            self.tracker.export(),
            self.cycles_completed,
            self.total_executions,
            self.rng_seed,
        )
        .with_rng_word_pos(self.rng.get_word_pos())
        .with_store_version(self.store.version())
    }

    /// Save a checkpoint into `dir`.
    pub fn save_checkpoint_to_dir(&self, dir: &Path) -> Result<PathBuf, PersistError> {
        let path = save_checkpoint_to_dir(dir, &self.checkpoint())?;
        info!("Checkpoint saved to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::BranchId;
    use crate::dominance::DominancePolicy;
    use crate::executor::scripted::{exited, timed_out, ScriptedAdapter};
    use crate::executor::RunStatus;
    use crate::persistence::{load_checkpoint, CHECKPOINT_FILE};
    use crate::quality::ExecutionTrace;

    const CALLS: &[&str] = &["cJSON_Parse", "cJSON_GetObjectItem", "cJSON_Delete"];

    fn config() -> EngineConfig {
        EngineConfig {
            targets: vec![TargetLibrary::CJson],
            workers: 1,
            batch_size: 8,
            ..Default::default()
        }
    }

    fn branches(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn scheduler(
        config: EngineConfig,
        seeds: Vec<Seed>,
    ) -> (CorpusScheduler, Arc<ScriptedAdapter>) {
        let adapter = Arc::new(ScriptedAdapter::default());
        let store = Arc::new(SeedStore::from_seeds(seeds).unwrap());
        let scheduler = CorpusScheduler::new(config, store, adapter.clone()).unwrap();
        (scheduler, adapter)
    }

    fn get(s: &CorpusScheduler, id: u64) -> Seed {
        s.store().get(TargetLibrary::CJson, id).unwrap()
    }

    #[test]
    fn test_disjoint_novelty_accumulates() {
        let seeds = vec![Seed::new(1, TargetLibrary::CJson), Seed::new(2, TargetLibrary::CJson)];
        let (mut s, adapter) = scheduler(config(), seeds);
        adapter.push(1, exited(66, 100, &["a1", "a2", "a3", "a4", "a5"], CALLS));
        adapter.push(2, exited(66, 100, &["b1", "b2", "b3", "b4", "b5"], CALLS));

        let report = s.run_cycle(TargetLibrary::CJson, 2).unwrap();
        assert_eq!(report.new_branches, 10);
        assert_eq!(report.coverage_size, 10);
        assert_eq!(s.tracker().coverage_size(TargetLibrary::CJson).unwrap(), 10);
        assert_eq!(get(&s, 1).quality.unique_count(), 5);
        assert_eq!(get(&s, 2).quality.unique_count(), 5);
        assert_eq!(s.phase(), SchedulerPhase::Idle);
    }

    #[test]
    fn test_repeat_run_has_no_novelty() {
        let (mut s, adapter) = scheduler(config(), vec![Seed::new(1, TargetLibrary::CJson)]);
        adapter.push(1, exited(66, 100, &["a", "b", "c"], CALLS));

        s.run_cycle(TargetLibrary::CJson, 1).unwrap();
        let first = get(&s, 1);
        assert_eq!(first.quality.visited, 1);
        assert_eq!(first.quality.density, 0.03);

        let report = s.run_cycle(TargetLibrary::CJson, 1).unwrap();
        assert_eq!(report.new_branches, 0);
        let second = get(&s, 1);
        assert!(second.quality.unique_branches.is_empty());
        assert_eq!(second.quality.density, 0.0);
        assert_eq!(second.quality.visited, 2);
        assert!(second.score < first.score);
    }

    #[test]
    fn test_timeout_is_its_own_outcome() {
        let (mut s, adapter) = scheduler(config(), vec![Seed::new(1, TargetLibrary::CJson)]);
        adapter.push(1, exited(66, 100, &["a", "b"], CALLS));
        adapter.push(1, timed_out());

        s.run_cycle(TargetLibrary::CJson, 1).unwrap();
        let before = get(&s, 1);
        let report = s.run_cycle(TargetLibrary::CJson, 1).unwrap();
        let after = get(&s, 1);

        assert_eq!(report.timeouts(), 1);
        assert_eq!(after.timeout_count, before.timeout_count + 1);
        assert_eq!(after.crash_count, before.crash_count);
        assert_eq!(after.quality.visited, before.quality.visited + 1);
        assert!(after.quality.unique_branches.is_empty());
        assert_eq!(after.coverage, before.coverage);
    }

    #[test]
    fn test_dominated_descendant_is_retired() {
        let ancestor = Seed::new(1, TargetLibrary::CJson).with_combination(branches(&["cJSON_Parse"]));
        let descendant = Seed::new(2, TargetLibrary::CJson)
            .with_combination(branches(&["cJSON_Parse", "cJSON_Delete"]));
        let (mut s, adapter) = scheduler(config(), vec![ancestor, descendant]);
        adapter.push(1, exited(66, 100, &["x1", "x2", "x3"], CALLS));
        adapter.push(2, exited(66, 100, &["x1", "x2"], CALLS));

        let report = s.run_cycle(TargetLibrary::CJson, 2).unwrap();

        assert_eq!(report.executed.len(), 2);
        assert_eq!(report.retired, vec![2]);
        assert!(get(&s, 2).retired);
        assert!(!get(&s, 1).retired);

        let next = s.run_cycle(TargetLibrary::CJson, 2).unwrap();
        assert_eq!(next.selected, vec![1]);
    }

    #[test]
    fn test_call_order_protects_descendant() {
        let run_twice = |policy: DominancePolicy| {
            let ancestor =
                Seed::new(1, TargetLibrary::CJson).with_combination(branches(&["cJSON_Parse"]));
            let descendant = Seed::new(2, TargetLibrary::CJson)
                .with_combination(branches(&["cJSON_Parse", "cJSON_Delete"]));
            let cfg = EngineConfig {
                dominance: policy,
                ..config()
            };
            let (mut s, adapter) = scheduler(cfg, vec![ancestor, descendant]);
            adapter.push(1, exited(66, 100, &["x1", "x2"], &["cJSON_Parse", "cJSON_Print"]));
            adapter.push(2, exited(66, 100, &["x1", "x2"], &["cJSON_Print", "cJSON_Parse"]));
            let first = s.run_cycle(TargetLibrary::CJson, 2).unwrap();
            let second = s.run_cycle(TargetLibrary::CJson, 2).unwrap();
            [first.retired, second.retired].concat()
        };

        assert!(run_twice(DominancePolicy::OrderSensitive).is_empty());
        assert_eq!(run_twice(DominancePolicy::BranchSubset), vec![2]);
        assert!(run_twice(DominancePolicy::Disabled).is_empty());
    }

    #[test]
    fn test_crashing_seed_is_never_retired() {
        let ancestor = Seed::new(1, TargetLibrary::CJson).with_combination(branches(&["cJSON_Parse"]));
        let descendant = Seed::new(2, TargetLibrary::CJson)
            .with_combination(branches(&["cJSON_Parse", "cJSON_Delete"]));
        let (mut s, adapter) = scheduler(config(), vec![ancestor, descendant]);
        adapter.push(1, exited(66, 100, &["x1", "x2", "x3"], CALLS));
        adapter.push(2, exited(168, 100, &["x1"], CALLS));

        s.run_cycle(TargetLibrary::CJson, 2).unwrap();
        let report = s.run_cycle(TargetLibrary::CJson, 2).unwrap();
        assert_eq!(report.crashes(), 1);
        assert!(report.retired.is_empty());

        let crashed = get(&s, 2);
        assert_eq!(crashed.crash_count, 2);
        assert_eq!(crashed.quality.visited, 2);
        assert!(!crashed.retired);
    }

    #[test]
    fn test_crash_without_trace() {
        let (mut s, adapter) = scheduler(config(), vec![Seed::new(1, TargetLibrary::CJson)]);
        adapter.push(
            1,
            HarnessRun {
                status: RunStatus::Signaled(Some(11)),
                trace: ExecutionTrace::default(),
                elapsed: Duration::from_millis(3),
            },
        );
        let report = s.run_cycle(TargetLibrary::CJson, 1).unwrap();
        assert_eq!(report.executed, vec![(1, SeedOutcome::Crash { novel: 0 })]);
        let seed = get(&s, 1);
        assert_eq!(seed.crash_count, 1);
        assert_eq!(seed.quality.visited, 1);
    }

    #[test]
    fn test_invalid_trace_skips_seed() {
        let (mut s, adapter) = scheduler(config(), vec![Seed::new(1, TargetLibrary::CJson)]);
        let mut run = exited(66, 10, &["a"], CALLS);
        run.trace.instruction_count = None;
        adapter.push(1, run);

        let report = s.run_cycle(TargetLibrary::CJson, 1).unwrap();
        assert_eq!(report.skipped, vec![1]);
        assert!(report.executed.is_empty());
        assert_eq!(get(&s, 1).quality.visited, 0);
        assert_eq!(s.tracker().coverage_size(TargetLibrary::CJson).unwrap(), 0);
    }

    #[test]
    fn test_rejected_trace_leaves_branches_for_others() {
        let seeds = vec![Seed::new(1, TargetLibrary::CJson), Seed::new(2, TargetLibrary::CJson)];
        let (mut s, adapter) = scheduler(config(), seeds);
        let hits = ["a", "b", "c", "d", "e"];
        adapter.push(1, exited(66, 2, &hits, CALLS));

        let first = s.run_cycle(TargetLibrary::CJson, 1).unwrap();
        assert_eq!(first.skipped, vec![1]);
        assert_eq!(s.tracker().coverage_size(TargetLibrary::CJson).unwrap(), 0);

        adapter.push(2, exited(66, 100, &hits, CALLS));
        let batch = vec![get(&s, 2)];
        let second = s.execute_batch(TargetLibrary::CJson, batch, false).unwrap();
        assert_eq!(second.new_branches, 5);
        assert_eq!(get(&s, 2).quality.unique_count(), 5);
    }

    #[test]
    fn test_rejected_crash_trace_leaves_branches_for_others() {
        let seeds = vec![Seed::new(1, TargetLibrary::CJson), Seed::new(2, TargetLibrary::CJson)];
        let (mut s, adapter) = scheduler(config(), seeds);
        adapter.push(1, exited(168, 1, &["a", "b", "c"], CALLS));
        adapter.push(2, exited(66, 100, &["a", "b", "c"], CALLS));

        let report = s.run_cycle(TargetLibrary::CJson, 2).unwrap();
        assert_eq!(report.crashes(), 1);
        assert_eq!(get(&s, 1).crash_count, 1);
        assert_eq!(get(&s, 1).quality.unique_count(), 0);
        assert_eq!(get(&s, 2).quality.unique_count(), 3);
    }

    #[test]
    fn test_adapter_error_does_not_abort_cycle() {
        let seeds = vec![Seed::new(1, TargetLibrary::CJson), Seed::new(2, TargetLibrary::CJson)];
        let (mut s, adapter) = scheduler(config(), seeds);
        adapter.push(2, exited(66, 10, &["a"], CALLS));

        let report = s.run_cycle(TargetLibrary::CJson, 2).unwrap();
        assert_eq!(report.skipped, vec![1]);
        assert_eq!(report.executed.len(), 1);
    }

    #[test]
    fn test_api_failure_is_success_without_sentinel() {
        let (mut s, adapter) = scheduler(config(), vec![Seed::new(1, TargetLibrary::CJson)]);
        adapter.push(1, exited(1, 10, &["a"], CALLS));
        let report = s.run_cycle(TargetLibrary::CJson, 1).unwrap();
        assert_eq!(report.api_failures(), 1);
        assert_eq!(report.crashes(), 0);
    }

    #[test]
    fn test_unknown_target_rejected() {
        let (mut s, _) = scheduler(config(), vec![]);
        let err = s.run_cycle(TargetLibrary::Zlib, 4).unwrap_err();
        assert!(matches!(err, SchedulerError::Target(TargetError::UnknownTarget(_))));
    }

    #[test]
    fn test_selection_follows_store_order() {
        let mut seeds = Vec::new();
        for (id, score) in [(1, 0.5), (2, 2.0), (3, 1.0), (4, 0.1)] {
            let mut seed = Seed::new(id, TargetLibrary::CJson);
            seed.score = score;
            seeds.push(seed);
        }
        seeds[3].retired = true;
        let (mut s, _) = scheduler(config(), seeds);
        let picked: Vec<u64> = s.select(TargetLibrary::CJson, 3).iter().map(|s| s.id).collect();
        assert_eq!(picked, vec![2, 3, 1]);
        let picked: Vec<u64> = s.select(TargetLibrary::CJson, 10).iter().map(|s| s.id).collect();
        assert_eq!(picked.len(), 3);
    }

    #[test]
    fn test_exploration_is_deterministic_per_seed() {
        let seeds: Vec<Seed> = (1..=20)
            .map(|id| {
                let mut seed = Seed::new(id, TargetLibrary::CJson);
                seed.score = id as f64;
                seed
            })
            .collect();
        let explore = EngineConfig {
            exploration_rate: 0.5,
            seed: 7,
            ..config()
        };
        let (mut a, _) = scheduler(explore.clone(), seeds.clone());
        let (mut b, _) = scheduler(explore, seeds);
        let pick_a: Vec<u64> = a.select(TargetLibrary::CJson, 5).iter().map(|s| s.id).collect();
        let pick_b: Vec<u64> = b.select(TargetLibrary::CJson, 5).iter().map(|s| s.id).collect();
        assert_eq!(pick_a, pick_b);
        assert_eq!(pick_a.len(), 5);
        let unique: std::collections::BTreeSet<u64> = pick_a.iter().copied().collect();
        assert_eq!(unique.len(), 5);
    }

    #[test]
    fn test_resume_continues_selection_stream() {
        let seeds: Vec<Seed> = (1..=20)
            .map(|id| {
                let mut seed = Seed::new(id, TargetLibrary::CJson);
                seed.score = id as f64;
                seed
            })
            .collect();
        let explore = EngineConfig {
            exploration_rate: 0.5,
            seed: 7,
            ..config()
        };
        let picks = |s: &mut CorpusScheduler| -> Vec<u64> {
            s.select(TargetLibrary::CJson, 5).iter().map(|seed| seed.id).collect()
        };

        let (mut straight, _) = scheduler(explore.clone(), seeds.clone());
        let first = picks(&mut straight);
        let second = picks(&mut straight);

        let (mut interrupted, _) = scheduler(explore.clone(), seeds);
        assert_eq!(picks(&mut interrupted), first);
        let checkpoint = interrupted.checkpoint();
        assert_eq!(checkpoint.rng_seed, 7);
        assert!(checkpoint.rng_word_pos > 0);

        // The checkpoint's stream wins over a different configured seed.
        let other_seed = EngineConfig { seed: 99, ..explore };
        let adapter = Arc::new(ScriptedAdapter::default());
        let mut resumed = CorpusScheduler::from_checkpoint(other_seed, checkpoint, adapter).unwrap();
        assert_eq!(picks(&mut resumed), second);
        assert_eq!(resumed.checkpoint().rng_seed, 7);
    }

    #[test]
    fn test_campaign_converges() {
        let cfg = EngineConfig {
            converge_rounds: 2,
            max_cycles: 50,
            ..config()
        };
        let (mut s, adapter) = scheduler(cfg, vec![Seed::new(1, TargetLibrary::CJson)]);
        adapter.push(1, exited(66, 100, &["a", "b"], CALLS));

        let report = s.run(TargetLibrary::CJson).unwrap();
        assert_eq!(report.stop_reason, StopReason::Converged);
        assert_eq!(report.cycles.len(), 3);
        assert_eq!(report.total_executions, 3);
        assert_eq!(report.coverage_stats.total_branches, 2);
        assert_eq!(report.active_seeds, 1);
    }

    #[test]
    fn test_recheck_retires_seeds_failing_their_sentinel() {
        let mut crasher = Seed::new(3, TargetLibrary::CJson);
        crasher.crash_count = 1;
        let seeds = vec![
            Seed::new(1, TargetLibrary::CJson),
            Seed::new(2, TargetLibrary::CJson),
            crasher,
        ];
        let (mut s, adapter) = scheduler(config(), seeds);
        adapter.push(1, exited(66, 100, &["a"], CALLS));
        adapter.push(2, exited(1, 100, &["b"], CALLS));
        adapter.push(3, exited(1, 100, &["c"], CALLS));

        let report = s.recheck(TargetLibrary::CJson).unwrap();
        assert!(report.recheck);
        assert_eq!(report.selected.len(), 3);
        assert_eq!(report.retired, vec![2]);
        assert!(get(&s, 2).retired);
        assert!(!get(&s, 3).retired);
        assert!(!get(&s, 1).retired);
        assert_eq!(s.phase(), SchedulerPhase::Idle);
    }

    #[test]
    fn test_campaign_rechecks_once_before_converging() {
        let cfg = EngineConfig {
            converge_rounds: 2,
            max_cycles: 50,
            recheck: true,
            ..config()
        };
        let (mut s, adapter) = scheduler(cfg, vec![Seed::new(1, TargetLibrary::CJson)]);
        adapter.push(1, exited(66, 100, &["a", "b"], CALLS));

        let report = s.run(TargetLibrary::CJson).unwrap();
        assert_eq!(report.stop_reason, StopReason::Converged);
        let kinds: Vec<bool> = report.cycles.iter().map(|c| c.recheck).collect();
        assert_eq!(kinds, vec![false, false, true, false, false]);
        assert_eq!(report.total_executions, 5);
        assert_eq!(get(&s, 1).quality.visited, 5);
    }

    #[test]
    fn test_campaign_exhausts_empty_corpus() {
        let (mut s, _) = scheduler(config(), vec![]);
        let report = s.run(TargetLibrary::CJson).unwrap();
        assert_eq!(report.stop_reason, StopReason::Exhausted);
        assert_eq!(report.cycles.len(), 1);
    }

    #[test]
    fn test_checkpoint_and_resume() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = EngineConfig {
            output_dir: Some(dir.path().to_path_buf()),
            max_cycles: 2,
            converge_rounds: 0,
            ..config()
        };
        let (mut s, adapter) = scheduler(cfg.clone(), vec![Seed::new(1, TargetLibrary::CJson)]);
        adapter.push(1, exited(66, 100, &["a", "b", "c"], CALLS));
        let report = s.run(TargetLibrary::CJson).unwrap();
        assert_eq!(report.stop_reason, StopReason::MaxCycles);

        let checkpoint = load_checkpoint(dir.path().join(CHECKPOINT_FILE)).unwrap();
        assert_eq!(checkpoint.cycles_completed, 2);
        assert_eq!(checkpoint.branch_sets[&TargetLibrary::CJson].len(), 3);
        assert_eq!(checkpoint.store_version, s.store().version());
        assert!(checkpoint.store_version > 1);
        let store_version = checkpoint.store_version;

        let adapter = Arc::new(ScriptedAdapter::default());
        adapter.push(1, exited(66, 100, &["a", "b", "c", "d"], CALLS));
        let mut resumed = CorpusScheduler::from_checkpoint(cfg, checkpoint, adapter).unwrap();
        assert_eq!(resumed.cycles_completed(), 2);
        assert_eq!(resumed.store().version(), store_version);
        assert_eq!(resumed.store().snapshot(TargetLibrary::CJson).store_version, store_version);
        assert_eq!(resumed.tracker().coverage_size(TargetLibrary::CJson).unwrap(), 3);

        let cycle = resumed.run_cycle(TargetLibrary::CJson, 1).unwrap();
        assert_eq!(cycle.cycle, 3);
        assert_eq!(cycle.new_branches, 1);
        let seed = resumed.store().get(TargetLibrary::CJson, 1).unwrap();
        assert_eq!(seed.quality.visited, 3);
        assert!(seed.quality.unique_branches.contains_key(&BranchId::from("d")));
    }

    #[test]
    fn test_parallel_workers_update_each_seed_once() {
        let seeds: Vec<Seed> = (1..=32).map(|id| Seed::new(id, TargetLibrary::CJson)).collect();
        let cfg = EngineConfig {
            workers: 4,
            ..config()
        };
        let (mut s, adapter) = scheduler(cfg, seeds);
        for id in 1..=32u64 {
            let branch = format!("b{id}");
            adapter.push(id, exited(66, 10, &[branch.as_str()], CALLS));
        }
        let report = s.run_cycle(TargetLibrary::CJson, 32).unwrap();
        assert_eq!(report.executed.len(), 32);
        assert_eq!(report.new_branches, 32);
        for id in 1..=32 {
            assert_eq!(get(&s, id).quality.visited, 1);
        }
    }
}
