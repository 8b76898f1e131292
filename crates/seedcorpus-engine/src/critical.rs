//! Per-library classification of lifecycle/safety-sensitive API calls.
//!
//! The table is an explicit, versioned artifact (`data/critical_apis.json`)
//! rather than something inferred at runtime. Entries are exact API names,
//! or prefixes when they end in `*`. It is an allow-list: anything not
//! listed is never critical.

use crate::target::TargetLibrary;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// The table shipped with the engine.
const BUILTIN_TABLE: &str = include_str!("../data/critical_apis.json");

/// Errors loading a critical-API table.
#[derive(Error, Debug)]
pub enum CriticalTableError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("empty pattern in table for {0}")]
    EmptyPattern(TargetLibrary),
}

/// Versioned mapping from library to critical API patterns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalApiTable {
    pub version: u32,
    pub libraries: BTreeMap<TargetLibrary, Vec<String>>,
}

impl CriticalApiTable {
    /// The table embedded in the binary.
    pub fn builtin() -> Result<Self, CriticalTableError> {
        Self::from_json(BUILTIN_TABLE)
    }

    /// Load a table from a JSON file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, CriticalTableError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self, CriticalTableError> {
        let table: CriticalApiTable = serde_json::from_str(json)?;
        for (target, patterns) in &table.libraries {
            if patterns.iter().any(|p| p.trim_end_matches('*').trim().is_empty()) {
                return Err(CriticalTableError::EmptyPattern(*target));
            }
        }
        Ok(table)
    }

    /// Whether `call` is a critical API of `target`.
    pub fn is_critical(&self, target: TargetLibrary, call: &str) -> bool {
        let Some(patterns) = self.libraries.get(&target) else {
            return false;
        };
        let call = call.trim();
        patterns.iter().any(|pattern| match pattern.strip_suffix('*') {
            Some(prefix) => call.starts_with(prefix),
            None => call == pattern,
        })
    }

    /// The critical subset of `calls`, keeping call order and duplicates.
    pub fn classify(&self, target: TargetLibrary, calls: &[String]) -> Vec<String> {
        calls
            .iter()
            .filter(|call| self.is_critical(target, call))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calls(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_builtin_covers_every_library() {
        let table = CriticalApiTable::builtin().unwrap();
        assert_eq!(table.version, 1);
        for target in TargetLibrary::ALL {
            assert!(table.libraries.contains_key(&target), "{target}");
        }
    }

    #[test]
    fn test_exact_and_prefix_patterns() {
        let table = CriticalApiTable::builtin().unwrap();
        assert!(table.is_critical(TargetLibrary::CJson, "cJSON_Delete"));
        assert!(table.is_critical(TargetLibrary::CJson, "cJSON_ParseWithLength"));
        assert!(table.is_critical(TargetLibrary::Sqlite3, "sqlite3_open_v2"));
        assert!(table.is_critical(TargetLibrary::Sqlite3, "sqlite3_finalize"));
        assert!(!table.is_critical(TargetLibrary::CJson, "cJSON_GetArraySize"));
        assert!(!table.is_critical(TargetLibrary::CJson, "cJSON_DeleteItemFromArray"));
    }

    #[test]
    fn test_classification_is_per_library() {
        let table = CriticalApiTable::builtin().unwrap();
        assert!(!table.is_critical(TargetLibrary::Zlib, "cJSON_Delete"));
    }

    #[test]
    fn test_classify_keeps_order_and_duplicates() {
        let table = CriticalApiTable::builtin().unwrap();
        let log = calls(&[
            "cJSON_Parse",
            "cJSON_GetObjectItem",
            "cJSON_Delete",
            "cJSON_Parse",
            "cJSON_Delete",
        ]);
        assert_eq!(
            table.classify(TargetLibrary::CJson, &log),
            calls(&["cJSON_Parse", "cJSON_Delete", "cJSON_Parse", "cJSON_Delete"])
        );
    }

    #[test]
    fn test_missing_library_is_never_critical() {
        let table = CriticalApiTable::from_json(r#"{"version": 2, "libraries": {}}"#).unwrap();
        assert!(!table.is_critical(TargetLibrary::CJson, "cJSON_Delete"));
    }

    #[test]
    fn test_rejects_empty_pattern() {
        let err = CriticalApiTable::from_json(r#"{"version": 1, "libraries": {"zlib": ["*"]}}"#)
            .unwrap_err();
        assert!(matches!(err, CriticalTableError::EmptyPattern(TargetLibrary::Zlib)));
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.json");
        fs::write(&path, r#"{"version": 3, "libraries": {"re2": ["cre2_new"]}}"#).unwrap();
        let table = CriticalApiTable::from_path(&path).unwrap();
        assert_eq!(table.version, 3);
        assert!(table.is_critical(TargetLibrary::Re2, "cre2_new"));
    }
}
