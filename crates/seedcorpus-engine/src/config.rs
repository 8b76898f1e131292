//! Engine configuration.

use crate::dominance::DominancePolicy;
use crate::pool::default_workers;
use crate::quality::ScoreWeights;
use crate::seed::Seed;
use crate::target::TargetLibrary;
use seedcorpus_protocol::{DEFAULT_TIMEOUT_MS, SANITIZER_CRASH_EXIT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors loading or validating a configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration for a corpus engine.
///
/// Every field has a default, so a config file only lists what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Libraries with a branch set; anything else is rejected.
    pub targets: Vec<TargetLibrary>,
    /// Seeds executed per cycle.
    pub batch_size: usize,
    /// Concurrent harness executions.
    pub workers: usize,
    /// Hard per-seed timeout.
    pub timeout_ms: u64,
    /// Exit codes treated as a crash rather than an API failure.
    pub crash_exit_codes: Vec<i32>,
    pub weights: ScoreWeights,
    pub dominance: DominancePolicy,
    /// Fraction of batch slots given to random non-retired seeds.
    pub exploration_rate: f64,
    /// Seed for the selection RNG.
    pub seed: u64,
    /// Upper bound on cycles per campaign.
    pub max_cycles: u64,
    /// Consecutive cycles without new branches before a campaign stops.
    /// Zero disables the check.
    pub converge_rounds: u64,
    /// Re-execute the whole corpus once, halfway to convergence.
    pub recheck: bool,
    /// Where compiled harnesses live, named by seed id.
    pub binary_dir: PathBuf,
    /// Scratch space for trace files.
    pub work_dir: PathBuf,
    /// Checkpoints and snapshots go here when set.
    pub output_dir: Option<PathBuf>,
    /// Critical-API table overriding the built-in one.
    pub critical_table: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            targets: TargetLibrary::ALL.to_vec(),
            batch_size: 16,
            workers: default_workers(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            crash_exit_codes: vec![SANITIZER_CRASH_EXIT],
            weights: ScoreWeights::default(),
            dominance: DominancePolicy::default(),
            exploration_rate: 0.0,
            seed: 42,
            max_cycles: 100,
            converge_rounds: 10,
            recheck: false,
            binary_dir: PathBuf::from("bin"),
            work_dir: std::env::temp_dir().join("seedcorpus"),
            output_dir: None,
            critical_table: None,
        }
    }
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Compiled harness for `seed`: its own path if recorded, else
    /// `binary_dir/<id>`.
    pub fn binary_for(&self, seed: &Seed) -> PathBuf {
        seed.binary
            .clone()
            .unwrap_or_else(|| self.binary_dir.join(seed.id.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::Invalid("no target libraries registered".into()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeout_ms must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.exploration_rate) {
            return Err(ConfigError::Invalid(format!(
                "exploration_rate {} outside [0, 1]",
                self.exploration_rate
            )));
        }
        Ok(())
    }
}

/// Load and validate a JSON configuration file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig, ConfigError> {
    let json = fs::read_to_string(path)?;
    let config: EngineConfig = serde_json::from_str(&json)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.targets.len(), 7);
        assert_eq!(config.timeout(), Duration::from_millis(5000));
        assert_eq!(config.crash_exit_codes, vec![168]);
        assert_eq!(config.exploration_rate, 0.0);
        assert_eq!(config.converge_rounds, 10);
        assert!(config.workers >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        fs::write(
            &path,
            r#"{"targets": ["cJSON", "zlib"], "batch_size": 4, "dominance": "branch-subset",
                "weights": {"critical_calls": 2.0}}"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.targets, vec![TargetLibrary::CJson, TargetLibrary::Zlib]);
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.dominance, DominancePolicy::BranchSubset);
        assert_eq!(config.weights.critical_calls, 2.0);
        assert_eq!(config.weights.density, 1.0);
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = EngineConfig {
            exploration_rate: 1.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = EngineConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            targets: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_binary_for() {
        let config = EngineConfig {
            binary_dir: PathBuf::from("/corpus/bin"),
            ..Default::default()
        };
        let seed = Seed::new(12, TargetLibrary::CJson);
        assert_eq!(config.binary_for(&seed), PathBuf::from("/corpus/bin/12"));

        let seed = seed.with_binary("/elsewhere/h12");
        assert_eq!(config.binary_for(&seed), PathBuf::from("/elsewhere/h12"));
    }

    #[test]
    fn test_unknown_library_in_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        fs::write(&path, r#"{"targets": ["libxml2"]}"#).unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Json(_))));
    }
}
