//! CLI binary for the seed corpus engine.
//!
//! Ingests generated seed harnesses, runs selection campaigns over them and
//! exports what the engine learned.
//!
//! # Usage
//!
//! ```bash
//! # Load seed headers into a state directory
//! seedcorpus ingest --seeds generated/cJSON --state corpus/ --target cJSON
//!
//! # Run a campaign (compiled harnesses named by seed id under --bin-dir)
//! seedcorpus run --state corpus/ --target cJSON --bin-dir build/cJSON --cycles 50
//!
//! # Inspect and export
//! seedcorpus list --state corpus/ --target cJSON --limit 20
//! seedcorpus snapshot --state corpus/ --target cJSON
//! seedcorpus minimize --state corpus/ --target cJSON --by api-triples
//! seedcorpus export-headers --state corpus/ --target cJSON --out headers/
//! ```
//!
//! # State
//!
//! Everything lives in `{state}/checkpoint.json`: seed records, global
//! branch sets and progress counters. `run` rewrites it after every cycle,
//! so a campaign can be interrupted and resumed with another `run`.
//! Re-running `ingest` only adds ids the state does not hold yet; seeds
//! already there keep their execution history.
//! Snapshots go to `{state}/snapshots/` and are never overwritten.

use clap::{Parser, Subcommand};
use seedcorpus_engine::config::{load_config, EngineConfig};
use seedcorpus_engine::dominance::DominancePolicy;
use seedcorpus_engine::executor::CommandAdapter;
use seedcorpus_engine::header::{format_header, ingest_dir, merge_into_store};
use seedcorpus_engine::minimize::{minimize_by, MinimizeMode};
use seedcorpus_engine::persistence::{
    load_checkpoint, save_checkpoint_to_dir, save_snapshot, EngineCheckpoint, CHECKPOINT_FILE,
};
use seedcorpus_engine::report::{format_minimize, format_report, format_seed_table};
use seedcorpus_engine::scheduler::CorpusScheduler;
use seedcorpus_engine::store::{SeedFilter, SeedStore};
use seedcorpus_engine::target::TargetLibrary;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "seedcorpus")]
#[command(about = "Seed corpus quality scoring and selection for library-API harnesses")]
#[command(version)]
struct Cli {
    /// Engine configuration file (JSON). Flags override its values.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse seed headers from a directory into the state.
    Ingest {
        /// Directory of generated seed sources (searched recursively).
        #[arg(long)]
        seeds: PathBuf,

        /// State directory.
        #[arg(short, long)]
        state: PathBuf,

        /// Library for seeds whose entry point does not name one.
        #[arg(short, long)]
        target: Option<TargetLibrary>,
    },

    /// Run a selection campaign.
    Run {
        #[arg(short, long)]
        state: PathBuf,

        #[arg(short, long)]
        target: TargetLibrary,

        /// Directory of compiled harnesses, one per seed id.
        #[arg(long)]
        bin_dir: Option<PathBuf>,

        /// Seeds per cycle.
        #[arg(short, long)]
        batch: Option<usize>,

        /// Maximum cycles.
        #[arg(long)]
        cycles: Option<u64>,

        /// Concurrent executions.
        #[arg(short, long)]
        workers: Option<usize>,

        /// Per-seed timeout in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Selection RNG seed.
        #[arg(long)]
        seed: Option<u64>,

        /// Fraction of slots given to random seeds (0.0 - 1.0).
        #[arg(long)]
        exploration: Option<f64>,

        /// "disabled", "branch-subset" or "order-sensitive".
        #[arg(long)]
        dominance: Option<DominancePolicy>,

        /// Quiet cycles before the campaign counts as converged (0 = never).
        #[arg(long)]
        converge: Option<u64>,

        /// Re-execute the whole corpus once, halfway to convergence.
        #[arg(long)]
        recheck: bool,
    },

    /// Print a library's seeds in scheduling order.
    List {
        #[arg(short, long)]
        state: PathBuf,

        #[arg(short, long)]
        target: TargetLibrary,

        /// Include retired seeds.
        #[arg(long)]
        all: bool,

        /// Only seeds scoring at least this much.
        #[arg(long)]
        min_score: Option<f64>,

        /// Only seeds that have never been executed.
        #[arg(long)]
        unvisited: bool,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Write an immutable snapshot of a library's seeds.
    Snapshot {
        #[arg(short, long)]
        state: PathBuf,

        #[arg(short, long)]
        target: TargetLibrary,
    },

    /// Report the smallest seed set keeping all branches or call triples.
    Minimize {
        #[arg(short, long)]
        state: PathBuf,

        #[arg(short, long)]
        target: TargetLibrary,

        /// "branches" or "api-triples".
        #[arg(long, default_value_t = MinimizeMode::Branches)]
        by: MinimizeMode,
    },

    /// Render current seed headers, one file per seed.
    ExportHeaders {
        #[arg(short, long)]
        state: PathBuf,

        #[arg(short, long)]
        target: TargetLibrary,

        /// Output directory.
        #[arg(short, long)]
        out: PathBuf,
    },
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path).unwrap_or_else(|e| {
            fail(format!("failed to load config {}: {}", path.display(), e))
        }),
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Ingest {
            seeds,
            state,
            target,
        } => cmd_ingest(&seeds, &state, target),
        Commands::Run {
            state,
            target,
            bin_dir,
            batch,
            cycles,
            workers,
            timeout_ms,
            seed,
            exploration,
            dominance,
            converge,
            recheck,
        } => {
            let mut config = config;
            config.output_dir = Some(state.clone());
            if let Some(dir) = bin_dir {
                config.binary_dir = dir;
            }
            if let Some(n) = batch {
                config.batch_size = n;
            }
            if let Some(n) = cycles {
                config.max_cycles = n;
            }
            if let Some(n) = workers {
                config.workers = n;
            }
            if let Some(ms) = timeout_ms {
                config.timeout_ms = ms;
            }
            if let Some(s) = seed {
                config.seed = s;
            }
            if let Some(rate) = exploration {
                config.exploration_rate = rate;
            }
            if let Some(policy) = dominance {
                config.dominance = policy;
            }
            if let Some(n) = converge {
                config.converge_rounds = n;
            }
            if recheck {
                config.recheck = true;
            }
            cmd_run(config, &state, target)
        }
        Commands::List {
            state,
            target,
            all,
            min_score,
            unvisited,
            limit,
        } => {
            let filter = SeedFilter {
                include_retired: all,
                min_score,
                only_unvisited: unvisited,
            };
            cmd_list(&state, target, &filter, limit)
        }
        Commands::Snapshot { state, target } => cmd_snapshot(&state, target),
        Commands::Minimize { state, target, by } => cmd_minimize(&state, target, by),
        Commands::ExportHeaders { state, target, out } => cmd_export_headers(&state, target, &out),
    }
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

fn load_state(state: &Path) -> EngineCheckpoint {
    let path = state.join(CHECKPOINT_FILE);
    if !path.exists() {
        fail(format!(
            "no state at {} (run `seedcorpus ingest` first)",
            path.display()
        ));
    }
    load_checkpoint(&path).unwrap_or_else(|e| fail(format!("failed to load {}: {}", path.display(), e)))
}

fn load_store(state: &Path) -> SeedStore {
    let checkpoint = load_state(state);
    SeedStore::from_seeds_at(checkpoint.seeds, checkpoint.store_version).unwrap_or_else(|e| fail(e))
}

fn cmd_ingest(seeds: &Path, state: &Path, target: Option<TargetLibrary>) {
    let (ingested, summary) = ingest_dir(seeds, target).unwrap_or_else(|e| fail(e));

    let mut checkpoint = if state.join(CHECKPOINT_FILE).exists() {
        load_state(state)
    } else {
        EngineCheckpoint::new(Vec::new(), BTreeMap::new(), 0, 0, EngineConfig::default().seed)
    };

    let store = SeedStore::from_seeds_at(checkpoint.seeds, checkpoint.store_version)
        .unwrap_or_else(|e| fail(e));
    let merge = merge_into_store(&store, ingested);
    for e in &merge.conflicts {
        eprintln!("Warning: {}", e);
    }
    checkpoint.seeds = store.all_seeds();
    checkpoint.store_version = store.version();

    let path = save_checkpoint_to_dir(state, &checkpoint).unwrap_or_else(|e| fail(e));

    eprintln!("Files seen:        {}", summary.files_seen);
    eprintln!("Parsed:            {}", summary.parsed);
    eprintln!("Partial headers:   {}", summary.partial.len());
    for (id, missing) in &summary.partial {
        let fields: Vec<String> = missing.iter().map(|f| f.to_string()).collect();
        eprintln!("  seed {}: fell back on {}", id, fields.join(", "));
    }
    eprintln!("Unparseable:       {}", summary.unparseable.len());
    for (file, reason) in &summary.unparseable {
        eprintln!("  {}: {}", file.display(), reason);
    }
    if !summary.duplicates.is_empty() {
        eprintln!("Duplicate ids:     {:?}", summary.duplicates);
    }
    eprintln!("Added:             {}", merge.added.len());
    if !merge.already_present.is_empty() {
        eprintln!("Already present:   {} (kept as is)", merge.already_present.len());
    }
    if !merge.conflicts.is_empty() {
        eprintln!("Conflicts:         {}", merge.conflicts.len());
    }
    eprintln!("Seeds in state:    {}", checkpoint.seeds.len());
    eprintln!("Saved state to:    {}", path.display());
}

fn cmd_run(config: EngineConfig, state: &Path, target: TargetLibrary) {
    let checkpoint = load_state(state);
    let adapter = Arc::new(CommandAdapter::new(&config.work_dir));

    eprintln!("═══════════════════════════════════════════════════════════════════════");
    eprintln!("  Seed Corpus Campaign");
    eprintln!("═══════════════════════════════════════════════════════════════════════");
    eprintln!();
    eprintln!("Configuration:");
    eprintln!("  Target:         {}", target);
    eprintln!("  Binaries:       {}", config.binary_dir.display());
    eprintln!("  Batch size:     {}", config.batch_size);
    eprintln!("  Max cycles:     {}", config.max_cycles);
    eprintln!("  Workers:        {}", config.workers);
    eprintln!("  Timeout:        {} ms", config.timeout_ms);
    eprintln!("  Seed:           {}", config.seed);
    eprintln!("  Exploration:    {}", config.exploration_rate);
    eprintln!("  Dominance:      {}", config.dominance);
    eprintln!("  Converge after: {} quiet cycles", config.converge_rounds);
    eprintln!("  Recheck:        {}", config.recheck);
    eprintln!("  State:          {}", state.display());
    eprintln!();

    let mut scheduler = CorpusScheduler::from_checkpoint(config, checkpoint, adapter)
        .unwrap_or_else(|e| fail(e));

    let report = match scheduler.run(target) {
        Ok(r) => r,
        Err(e) => {
            eprintln!();
            fail(format!("campaign failed: {}", e));
        }
    };

    let formatted = format_report(&report);
    println!("{}", formatted);

    let report_path = state.join("report.txt");
    if let Err(e) = fs::write(&report_path, &formatted) {
        eprintln!("Warning: failed to save report: {}", e);
    } else {
        eprintln!("Saved report to: {}", report_path.display());
    }
}

fn cmd_list(state: &Path, target: TargetLibrary, filter: &SeedFilter, limit: Option<usize>) {
    let store = load_store(state);
    let listing = store.list_by_library(target, filter);
    let shown = limit.unwrap_or(listing.len());
    print!("{}", format_seed_table(listing.iter().take(shown)));
    if shown < listing.len() {
        eprintln!("({} of {} seeds shown)", shown, listing.len());
    }
}

fn cmd_snapshot(state: &Path, target: TargetLibrary) {
    let store = load_store(state);
    let snapshot = store.snapshot(target);
    let path = save_snapshot(state, &snapshot).unwrap_or_else(|e| fail(e));
    eprintln!(
        "Saved {} seeds of {} (store version {}) to: {}",
        snapshot.seeds.len(),
        target,
        snapshot.store_version,
        path.display()
    );
}

fn cmd_minimize(state: &Path, target: TargetLibrary, by: MinimizeMode) {
    let store = load_store(state);
    print!("{}", format_minimize(&minimize_by(&store, target, by)));
}

fn cmd_export_headers(state: &Path, target: TargetLibrary, out: &Path) {
    let store = load_store(state);
    let dir = out.join(target.name());
    if let Err(e) = fs::create_dir_all(&dir) {
        fail(format!("failed to create {}: {}", dir.display(), e));
    }

    let listing = store.list_by_library(target, &SeedFilter::all());
    for seed in &listing {
        let path = dir.join(format!("{}.header", seed.id));
        if let Err(e) = fs::write(&path, format_header(seed)) {
            eprintln!("Warning: failed to write {}: {}", path.display(), e);
        }
    }
    eprintln!("Wrote {} headers to: {}", listing.len(), dir.display());
}
