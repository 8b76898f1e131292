//! Checkpoints and corpus snapshots on disk.
//!
//! A checkpoint holds what a campaign needs to resume:
//! - Every seed record
//! - The global branch set of each library
//! - Progress counters
//!
//! Global branch sets are carried forward so a resumed campaign only
//! credits branches nobody has found yet.
//!
//! Snapshots are exports for external analysis. Each one is written to a
//! fresh file and never overwritten; later snapshots supersede earlier ones
//! by name.

use crate::coverage::BranchId;
use crate::seed::Seed;
use crate::store::CorpusSnapshot;
use crate::target::TargetLibrary;
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// File name of the campaign checkpoint inside an output directory.
pub const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Directory for snapshots inside an output directory.
pub const SNAPSHOT_DIR: &str = "snapshots";

const CHECKPOINT_FORMAT: u32 = 1;

/// Errors from checkpoint and snapshot operations.
#[derive(Debug, Snafu)]
pub enum PersistError {
    #[snafu(display("I/O error"), context(false))]
    Io { source: std::io::Error },

    #[snafu(display("JSON error"), context(false))]
    Json { source: serde_json::Error },

    #[snafu(display("snapshot {} already exists", path.display()))]
    SnapshotExists { path: PathBuf },

    #[snafu(display("unsupported checkpoint format {found}"))]
    Format { found: u32 },
}

/// Resumable engine state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineCheckpoint {
    pub format: u32,
    pub seeds: Vec<Seed>,
    pub branch_sets: BTreeMap<TargetLibrary, Vec<BranchId>>,
    pub cycles_completed: u64,
    pub total_executions: u64,
    /// Selection RNG seed of the campaign.
    pub rng_seed: u64,
    /// Words the selection RNG had consumed when the checkpoint was taken.
    #[serde(default)]
    pub rng_word_pos: u128,
    /// Store version the seeds were saved at.
    #[serde(default)]
    pub store_version: u64,
}

impl EngineCheckpoint {
    pub fn new(
        seeds: Vec<Seed>,
        branch_sets: BTreeMap<TargetLibrary, Vec<BranchId>>,
        cycles_completed: u64,
        total_executions: u64,
        rng_seed: u64,
    ) -> Self {
        Self {
            format: CHECKPOINT_FORMAT,
            seeds,
            branch_sets,
            cycles_completed,
            total_executions,
            rng_seed,
            rng_word_pos: 0,
            store_version: 0,
        }
    }

    pub fn with_rng_word_pos(mut self, word_pos: u128) -> Self {
        self.rng_word_pos = word_pos;
        self
    }

    pub fn with_store_version(mut self, version: u64) -> Self {
        self.store_version = version;
        self
    }
}

/// Save a checkpoint to a JSON file, replacing any previous one.
pub fn save_checkpoint<P: AsRef<Path>>(
    path: P,
    checkpoint: &EngineCheckpoint,
) -> Result<(), PersistError> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(checkpoint)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Load a checkpoint from a JSON file.
pub fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<EngineCheckpoint, PersistError> {
    let json = fs::read_to_string(path)?;
    let checkpoint: EngineCheckpoint = serde_json::from_str(&json)?;
    if checkpoint.format != CHECKPOINT_FORMAT {
        return FormatSnafu {
            found: checkpoint.format,
        }
        .fail();
    }
    Ok(checkpoint)
}

/// Save a checkpoint as `<dir>/checkpoint.json`, creating `dir`.
pub fn save_checkpoint_to_dir<P: AsRef<Path>>(
    dir: P,
    checkpoint: &EngineCheckpoint,
) -> Result<PathBuf, PersistError> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let path = dir.join(CHECKPOINT_FILE);
    save_checkpoint(&path, checkpoint)?;
    Ok(path)
}

/// Write a snapshot to `<dir>/snapshots/<target>-v<version>-<millis>.json`.
pub fn save_snapshot<P: AsRef<Path>>(
    dir: P,
    snapshot: &CorpusSnapshot,
) -> Result<PathBuf, PersistError> {
    let snapshots = dir.as_ref().join(SNAPSHOT_DIR);
    fs::create_dir_all(&snapshots)?;
    let path = snapshots.join(format!(
        "{}-v{}-{}.json",
        snapshot.target, snapshot.store_version, snapshot.created_at_ms
    ));

    let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return SnapshotExistsSnafu { path }.fail();
        }
        Err(e) => return Err(e.into()),
    };
    let json = serde_json::to_string_pretty(snapshot)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    Ok(path)
}

pub fn load_snapshot<P: AsRef<Path>>(path: P) -> Result<CorpusSnapshot, PersistError> {
    let json = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}
