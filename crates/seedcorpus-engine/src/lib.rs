//! Seed corpus quality and selection engine.
//!
//! Generated library-API harnesses ("seeds") each drive one wrapped C
//! library (cJSON, lcms2, libpcap, libpng, re2, sqlite3, zlib) through a
//! short call sequence. This crate keeps score of them: which branches each
//! seed reached first, how dense that discovery was, which lifecycle APIs it
//! touched and how often it has already been run. It uses that to pick
//! the next batch to execute and retires seeds an ancestor already covers.
//!
//! # Cycle
//!
//! ```text
//! 1. Select the top-N active seeds of a library (optionally epsilon-greedy)
//! 2. Execute them in parallel under a hard timeout
//! 3. Per result: merge branches into the library's global set → novelty
//! 4. Score: density, unique branches, critical calls, visit penalty
//! 5. Persist the record (compare-and-swap on a versioned store)
//! 6. Retire executed seeds a lineage ancestor dominates
//! ```
//!
//! # Example Usage
//!
//! ```no_run
//! use seedcorpus_engine::config::EngineConfig;
//! use seedcorpus_engine::executor::CommandAdapter;
//! use seedcorpus_engine::header::ingest_dir;
//! use seedcorpus_engine::report::format_report;
//! use seedcorpus_engine::scheduler::CorpusScheduler;
//! use seedcorpus_engine::store::SeedStore;
//! use seedcorpus_engine::target::TargetLibrary;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let (seeds, _summary) = ingest_dir(Path::new("seeds/cJSON"), Some(TargetLibrary::CJson)).unwrap();
//! let store = Arc::new(SeedStore::from_seeds(seeds).unwrap());
//!
//! let config = EngineConfig {
//!     binary_dir: "build/cJSON".into(),
//!     ..Default::default()
//! };
//! let adapter = Arc::new(CommandAdapter::new(&config.work_dir));
//! let mut scheduler = CorpusScheduler::new(config, store, adapter).unwrap();
//! let report = scheduler.run(TargetLibrary::CJson).unwrap();
//!
//! println!("{}", format_report(&report));
//! ```
//!
//! # Module Structure
//!
//! - [`target`]: Wrapped libraries and their API surfaces
//! - [`coverage`]: Per-library global branch sets and novelty
//! - [`critical`]: Versioned table of lifecycle/safety-sensitive APIs
//! - [`quality`]: Quality records and the score formula
//! - [`seed`]: The seed record
//! - [`store`]: Versioned copy-on-write seed store and snapshots
//! - [`dominance`]: Lineage and dominance-based retirement
//! - [`header`]: Seed header parsing, rendering and directory ingest
//! - [`executor`]: Harness adapter seam and outcome classification
//! - [`pool`]: Bounded worker pool
//! - [`scheduler`]: The selection cycle and campaign loop
//! - [`minimize`]: Greedy set-cover corpus minimization
//! - [`persistence`]: Checkpoints and snapshot files
//! - [`config`]: Engine configuration
//! - [`report`]: Human-readable reports
//!
//! # Determinism
//!
//! Given the same seed and the same execution results, selection is
//! deterministic: the selection RNG is a seeded ChaCha8 and all maps are
//! BTreeMaps.

pub mod config;
pub mod coverage;
pub mod critical;
pub mod dominance;
pub mod executor;
pub mod header;
pub mod minimize;
pub mod persistence;
pub mod pool;
pub mod quality;
pub mod report;
pub mod scheduler;
pub mod seed;
pub mod store;
pub mod target;

// Re-export main types for convenience
pub use config::{load_config, ConfigError, EngineConfig};
pub use coverage::{BranchCoverageTracker, BranchId, CoverageStats, NoveltySet};
pub use critical::{CriticalApiTable, CriticalTableError};
pub use dominance::DominancePolicy;
pub use executor::{
    classify, AdapterError, CommandAdapter, ExecutionOutcome, HarnessAdapter, HarnessRun,
    RunStatus,
};
pub use header::{format_header, ingest_dir, parse_header, HeaderParse, IngestError, IngestSummary};
pub use minimize::{minimize, minimize_by, MinimizeMode, MinimizeReport};
pub use persistence::{EngineCheckpoint, PersistError};
pub use quality::{ExecutionTrace, QualityRecord, QualityScorer, ScoreError, ScoreWeights};
pub use scheduler::{
    CampaignReport, CorpusScheduler, CycleReport, SchedulerError, SchedulerPhase, StopReason,
};
pub use seed::Seed;
pub use store::{CorpusSnapshot, SeedFilter, SeedListing, SeedStore, StoreError};
pub use target::{TargetError, TargetLibrary};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        let _ = BranchCoverageTracker::with_all_targets();
        let _ = SeedStore::new();
        let _ = EngineConfig::default();
        let _ = ScoreWeights::default();
        let _ = DominancePolicy::default();
        let _ = CriticalApiTable::builtin().unwrap();
        let _ = Seed::new(1, TargetLibrary::CJson);
    }
}
