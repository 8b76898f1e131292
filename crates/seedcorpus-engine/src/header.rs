//! Seed artifact headers: best-effort parsing and rendering.
//!
//! Generated seed sources carry their metadata as comment lines:
//!
//! ```text
//! //<ID> 42
//! //<Prompt> ["parse a document", "walk the tree"]
//! /*<Combination>: [cJSON_Parse, cJSON_GetObjectItem, cJSON_Delete]*/
//! //<score> 1.25, nr_unique_branch: 7
//! //<Quality> {"density":0.05,"unique_branches":{...},"library_calls":[...],"critical_calls":[...],"visited":3}
//! int test_cJSON_api_sequence() { ... return 66; }
//! ```
//!
//! The comments are ad hoc, not a schema. Parsing never fails hard: a header
//! with an id but damaged fields comes back as [`HeaderParse::Partial`],
//! and one without a usable id as [`HeaderParse::Unparseable`].

use crate::quality::QualityRecord;
use crate::seed::Seed;
use crate::store::{SeedStore, StoreError};
use crate::target::TargetLibrary;
use log::{debug, info, warn};
use seedcorpus_protocol::{
    HARNESS_FN_PREFIX, HARNESS_FN_SUFFIX, TAG_COMBINATION, TAG_COMBINATION_END, TAG_ID,
    TAG_NR_UNIQUE_BRANCH, TAG_PROMPT, TAG_QUALITY, TAG_SCORE,
};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Source file extensions considered seed artifacts.
const SEED_EXTENSIONS: &[&str] = &["c", "cc", "cpp", "cxx"];

/// Errors that stop an ingest before any file is looked at.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),
}

/// A header field that was absent or could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HeaderField {
    Prompt,
    Combination,
    Score,
    Quality,
    Target,
}

impl fmt::Display for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HeaderField::Prompt => "prompt",
            HeaderField::Combination => "combination",
            HeaderField::Score => "score",
            HeaderField::Quality => "quality",
            HeaderField::Target => "target",
        })
    }
}

/// Fields recovered from a seed header.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedHeader {
    pub id: u64,
    /// From the `test_<library>_api_sequence` entry point.
    pub target: Option<TargetLibrary>,
    pub prompt: Vec<String>,
    pub combination: Vec<String>,
    pub score: Option<f64>,
    pub nr_unique_branch: Option<u64>,
    pub quality: Option<QualityRecord>,
}

impl SeedHeader {
    fn empty(id: u64) -> Self {
        Self {
            id,
            target: None,
            prompt: Vec::new(),
            combination: Vec::new(),
            score: None,
            nr_unique_branch: None,
            quality: None,
        }
    }

    /// Build a seed record. A missing quality block becomes a zeroed,
    /// never-visited record; the header score is kept as recorded.
    pub fn into_seed(self, target: TargetLibrary) -> Seed {
        let mut seed = Seed::new(self.id, target);
        seed.prompt = self.prompt;
        seed.combination = self.combination;
        match self.quality {
            Some(quality) => {
                seed.quality = quality;
                seed.score = self.score.unwrap_or(0.0);
            }
            None => seed.score = 0.0,
        }
        seed
    }
}

/// Outcome of parsing one header.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderParse {
    Parsed(SeedHeader),
    Partial {
        header: SeedHeader,
        missing: Vec<HeaderField>,
    },
    Unparseable {
        reason: String,
    },
}

/// Split a bracketed list that is either JSON or a bare comma list.
fn parse_list(raw: &str) -> Option<Vec<String>> {
    let raw = raw.trim();
    if let Ok(items) = serde_json::from_str::<Vec<String>>(raw) {
        return Some(items);
    }
    let inner = raw.strip_prefix('[')?.strip_suffix(']')?;
    Some(
        inner
            .split(',')
            .map(|item| item.trim().trim_matches(|c| c == '"' || c == '\'').trim())
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

fn parse_score_line(raw: &str) -> (Option<f64>, Option<u64>) {
    let mut parts = raw.splitn(2, ',');
    let score = parts.next().and_then(|s| s.trim().parse::<f64>().ok());
    let branches = parts
        .next()
        .and_then(|rest| rest.trim().strip_prefix(TAG_NR_UNIQUE_BRANCH))
        .and_then(|n| n.trim().parse::<u64>().ok());
    (score.filter(|s| s.is_finite()), branches)
}

fn find_target(text: &str) -> Option<TargetLibrary> {
    text.match_indices(HARNESS_FN_PREFIX).find_map(|(start, _)| {
        let rest = &text[start + HARNESS_FN_PREFIX.len()..];
        let end = rest.find(HARNESS_FN_SUFFIX)?;
        let name = &rest[..end];
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return None;
        }
        name.parse().ok()
    })
}

fn find_combination(text: &str) -> Option<Vec<String>> {
    let start = text.find(TAG_COMBINATION)? + TAG_COMBINATION.len();
    let body = &text[start..];
    let end = body.find(TAG_COMBINATION_END)?;
    parse_list(&body[..end])
}

/// Parse the metadata header of one seed source file.
pub fn parse_header(text: &str) -> HeaderParse {
    let mut id = None;
    let mut prompt = None;
    let mut score = (None, None);
    let mut quality = None;

    for line in text.lines().map(str::trim_start) {
        if let Some(rest) = line.strip_prefix(TAG_ID) {
            id = rest.trim().parse::<u64>().ok();
        } else if let Some(rest) = line.strip_prefix(TAG_PROMPT) {
            prompt = parse_list(rest);
        } else if let Some(rest) = line.strip_prefix(TAG_SCORE) {
            score = parse_score_line(rest);
        } else if let Some(rest) = line.strip_prefix(TAG_QUALITY) {
            quality = serde_json::from_str::<QualityRecord>(rest.trim()).ok();
        }
    }

    let Some(id) = id else {
        return HeaderParse::Unparseable {
            reason: format!("no readable {TAG_ID} line"),
        };
    };

    let mut header = SeedHeader::empty(id);
    let mut missing = Vec::new();

    header.target = find_target(text);
    if header.target.is_none() {
        missing.push(HeaderField::Target);
    }
    match prompt {
        Some(p) => header.prompt = p,
        None => missing.push(HeaderField::Prompt),
    }
    match find_combination(text) {
        Some(c) => header.combination = c,
        None => missing.push(HeaderField::Combination),
    }
    (header.score, header.nr_unique_branch) = score;
    if header.score.is_none() {
        missing.push(HeaderField::Score);
    }
    header.quality = quality;
    if header.quality.is_none() {
        missing.push(HeaderField::Quality);
    }

    if missing.is_empty() {
        HeaderParse::Parsed(header)
    } else {
        missing.sort();
        HeaderParse::Partial { header, missing }
    }
}

/// Render the header block for a seed, in the same layout it is parsed from.
pub fn format_header(seed: &Seed) -> String {
    let list = |items: &[String]| serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string());
    let quality = serde_json::to_string(&seed.quality).unwrap_or_else(|_| "{}".to_string());
    format!(
        "{TAG_ID} {}\n{TAG_PROMPT} {}\n{TAG_COMBINATION} {}{TAG_COMBINATION_END}\n{TAG_SCORE} {}, {TAG_NR_UNIQUE_BRANCH} {}\n{TAG_QUALITY} {}\n",
        seed.id,
        list(&seed.prompt),
        list(&seed.combination),
        seed.score,
        seed.quality.unique_count(),
        quality,
    )
}

/// What happened to each file of an ingest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestSummary {
    pub files_seen: usize,
    pub parsed: usize,
    /// Seeds ingested from a damaged header, with the fields that fell back.
    pub partial: Vec<(u64, Vec<HeaderField>)>,
    pub unparseable: Vec<(PathBuf, String)>,
    /// Ids seen more than once; the first file wins.
    pub duplicates: Vec<u64>,
}

impl IngestSummary {
    pub fn ingested(&self) -> usize {
        self.parsed + self.partial.len()
    }
}

fn collect_sources(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), IngestError> {
    let io = |source| IngestError::Io {
        path: dir.to_path_buf(),
        source,
    };
    for entry in fs::read_dir(dir).map_err(io)? {
        let path = entry.map_err(io)?.path();
        if path.is_dir() {
            collect_sources(&path, out)?;
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| SEED_EXTENSIONS.contains(&e))
        {
            out.push(path);
        }
    }
    Ok(())
}

/// Load every seed source under `dir`.
///
/// Files whose entry point names no known library fall back to
/// `target_hint`; without a hint they are reported as unparseable.
pub fn ingest_dir(
    dir: &Path,
    target_hint: Option<TargetLibrary>,
) -> Result<(Vec<Seed>, IngestSummary), IngestError> {
    if !dir.is_dir() {
        return Err(IngestError::NotADirectory(dir.to_path_buf()));
    }
    let mut paths = Vec::new();
    collect_sources(dir, &mut paths)?;
    paths.sort();

    let mut summary = IngestSummary::default();
    let mut seen = BTreeSet::new();
    let mut seeds = Vec::new();

    for path in paths {
        summary.files_seen += 1;
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                summary.unparseable.push((path, e.to_string()));
                continue;
            }
        };

        let (header, missing) = match parse_header(&text) {
            HeaderParse::Parsed(header) => (header, Vec::new()),
            HeaderParse::Partial { header, missing } => (header, missing),
            HeaderParse::Unparseable { reason } => {
                warn!("Unparseable header in {}: {}", path.display(), reason);
                summary.unparseable.push((path, reason));
                continue;
            }
        };

        let Some(target) = header.target.or(target_hint) else {
            warn!("No target library for seed {} in {}", header.id, path.display());
            summary
                .unparseable
                .push((path, format!("seed {} names no target library", header.id)));
            continue;
        };

        if !seen.insert(header.id) {
            warn!("Duplicate seed id {} in {}", header.id, path.display());
            summary.duplicates.push(header.id);
            continue;
        }

        let id = header.id;
        let mut seed = header.into_seed(target);
        seed.source = Some(path);
        // A target recovered from the hint is not counted against the header.
        let missing: Vec<HeaderField> = missing
            .into_iter()
            .filter(|field| *field != HeaderField::Target)
            .collect();
        if missing.is_empty() {
            summary.parsed += 1;
        } else {
            debug!("Seed {} ingested with fallback for {:?}", id, missing);
            summary.partial.push((id, missing));
        }
        seeds.push(seed);
    }

    info!(
        "Ingested {} seeds from {} files ({} partial, {} unparseable)",
        summary.ingested(),
        summary.files_seen,
        summary.partial.len(),
        summary.unparseable.len()
    );
    Ok((seeds, summary))
}

/// How ingested seeds landed in a store.
#[derive(Debug, Default)]
pub struct IngestMerge {
    pub added: Vec<u64>,
    /// Ids already stored; their execution history is kept as is.
    pub already_present: Vec<u64>,
    /// Ids stored under another library.
    pub conflicts: Vec<StoreError>,
}

/// Add freshly ingested seeds to `store` without touching seeds it already
/// holds. A header only carries what the generator wrote, so it never
/// replaces a record the engine has since executed and scored.
pub fn merge_into_store(store: &SeedStore, seeds: impl IntoIterator<Item = Seed>) -> IngestMerge {
    let mut merge = IngestMerge::default();
    for seed in seeds {
        let id = seed.id;
        match store.insert_if_absent(seed) {
            Ok(true) => merge.added.push(id),
            Ok(false) => merge.already_present.push(id),
            Err(e) => {
                warn!("{}", e);
                merge.conflicts.push(e);
            }
        }
    }
    if !merge.already_present.is_empty() {
        debug!("{} ingested seeds were already stored", merge.already_present.len());
    }
    merge
}
