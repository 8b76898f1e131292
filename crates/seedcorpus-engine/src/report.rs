//! Format campaign reports for human consumption.

use crate::minimize::{MinimizeMode, MinimizeReport};
use crate::scheduler::{CampaignReport, CycleReport, StopReason};
use crate::seed::Seed;

/// Format a campaign report for human consumption.
pub fn format_report(report: &CampaignReport) -> String {
    let mut output = String::new();

    output.push_str("═══════════════════════════════════════════════════════════════════════\n");
    output.push_str(&format!("  Seed Corpus Campaign Report: {}\n", report.target));
    output.push_str("═══════════════════════════════════════════════════════════════════════\n\n");

    let crashes: usize = report.cycles.iter().map(CycleReport::crashes).sum();
    let timeouts: usize = report.cycles.iter().map(CycleReport::timeouts).sum();
    let retired: usize = report.cycles.iter().map(|c| c.retired.len()).sum();
    let rechecks = report.cycles.iter().filter(|c| c.recheck).count();
    let stop = match report.stop_reason {
        StopReason::MaxCycles => "cycle limit reached",
        StopReason::Converged => "converged (no new branches)",
        StopReason::Exhausted => "no active seeds left",
    };

    output.push_str(&format!("Cycles run:             {}\n", report.cycles.len()));
    if rechecks > 0 {
        output.push_str(&format!("Corpus rechecks:        {}\n", rechecks));
    }
    output.push_str(&format!("Stopped:                {}\n", stop));
    output.push_str(&format!("Total executions:       {}\n", report.total_executions));
    output.push_str(&format!("Active seeds:           {}\n", report.active_seeds));
    output.push_str(&format!("Retired seeds:          {}\n", report.retired_seeds));
    output.push_str(&format!("Retired this campaign:  {}\n", retired));
    output.push_str(&format!("Crashes:                {}\n", crashes));
    output.push_str(&format!("Timeouts:               {}\n", timeouts));
    output.push('\n');

    let stats = &report.coverage_stats;
    output.push_str("─── Coverage Statistics ───────────────────────────────────────────────\n");
    output.push_str(&format!("Total traces:           {}\n", stats.total_traces));
    output.push_str(&format!("Unique branches:        {}\n", stats.total_branches));
    output.push_str(&format!(
        "Avg branches/trace:     {:.2}\n",
        stats.branches_per_trace_avg
    ));
    for (target, coverage) in &stats.per_library {
        output.push_str(&format!(
            "  {:<10} {:>8} branches over {} traces\n",
            target.name(),
            coverage.total_branches,
            coverage.total_traces
        ));
    }
    output.push('\n');

    if !report.cycles.is_empty() {
        output.push_str("─── Cycles ────────────────────────────────────────────────────────────\n");
        for cycle in &report.cycles {
            output.push_str(&format_cycle(cycle));
        }
        output.push('\n');
    }

    output.push_str("═══════════════════════════════════════════════════════════════════════\n");
    output
}

/// One-line summary of a cycle.
pub fn format_cycle(cycle: &CycleReport) -> String {
    let mut line = format!(
        "#{:<4} ran {:>3}  new {:>5}  coverage {:>6}",
        cycle.cycle,
        cycle.executed.len(),
        cycle.new_branches,
        cycle.coverage_size
    );
    if cycle.recheck {
        line.push_str("  (recheck)");
    }
    if cycle.crashes() > 0 {
        line.push_str(&format!("  crashes {}", cycle.crashes()));
    }
    if cycle.timeouts() > 0 {
        line.push_str(&format!("  timeouts {}", cycle.timeouts()));
    }
    if !cycle.retired.is_empty() {
        line.push_str(&format!("  retired {:?}", cycle.retired));
    }
    if !cycle.skipped.is_empty() {
        line.push_str(&format!("  skipped {:?}", cycle.skipped));
    }
    line.push('\n');
    line
}

/// Ranked seed table, as printed by `seedcorpus list`.
pub fn format_seed_table<'a>(seeds: impl IntoIterator<Item = &'a Seed>) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "{:>8}  {:>9}  {:>8}  {:>6}  {:>7}  {:>5}  {:>5}  {}\n",
        "id", "score", "density", "unique", "visited", "crash", "tmout", "combination"
    ));
    for seed in seeds {
        let mut combination = seed.combination.join(", ");
        if combination.len() > 48 {
            let cut = (0..=45).rev().find(|i| combination.is_char_boundary(*i)).unwrap_or(0);
            combination.truncate(cut);
            combination.push_str("...");
        }
        output.push_str(&format!(
            "{:>8}  {:>9.4}  {:>8.4}  {:>6}  {:>7}  {:>5}  {:>5}  {}{}\n",
            seed.id,
            seed.score,
            seed.quality.density,
            seed.quality.unique_count(),
            seed.quality.visited,
            seed.crash_count,
            seed.timeout_count,
            combination,
            if seed.retired { "  [retired]" } else { "" }
        ));
    }
    output
}

/// Format a minimization report.
pub fn format_minimize(report: &MinimizeReport) -> String {
    let mut output = String::new();
    output.push_str(&format!("─── Minimized corpus: {} ", report.target));
    output.push_str("─────────────────────────────────────────────\n");
    let label = match report.mode {
        MinimizeMode::Branches => "Branches covered:",
        MinimizeMode::ApiTriples => "Call triples covered:",
    };
    output.push_str(&format!("{:<24}{}\n", label, report.total_features));
    output.push_str(&format!("Seeds kept:             {}\n", report.kept.len()));
    output.push_str(&format!("Seeds redundant:        {}\n", report.redundant.len()));
    output.push_str(&format!(
        "Reduction:              {:.1}%\n",
        report.reduction() * 100.0
    ));
    if !report.kept.is_empty() {
        output.push_str(&format!("Keep: {:?}\n", report.kept));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::{CoverageStats, LibraryCoverage};
    use crate::scheduler::SeedOutcome;
    use crate::target::TargetLibrary;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn cycle() -> CycleReport {
        CycleReport {
            cycle: 3,
            target: TargetLibrary::Re2,
            recheck: false,
            selected: vec![1, 2, 3],
            executed: vec![
                (1, SeedOutcome::Success { novel: 4, sentinel_ok: true }),
                (2, SeedOutcome::Crash { novel: 0 }),
                (3, SeedOutcome::Timeout),
            ],
            skipped: vec![],
            retired: vec![3],
            new_branches: 4,
            coverage_size: 120,
            elapsed: Duration::from_millis(40),
        }
    }

    #[test]
    fn test_format_cycle() {
        let line = format_cycle(&cycle());
        assert!(line.starts_with("#3"));
        assert!(line.contains("crashes 1"));
        assert!(line.contains("timeouts 1"));
        assert!(line.contains("retired [3]"));
        assert!(!line.contains("skipped"));
        assert!(!line.contains("recheck"));

        let recheck = CycleReport {
            recheck: true,
            ..cycle()
        };
        assert!(format_cycle(&recheck).contains("(recheck)"));
    }

    #[test]
    fn test_format_report() {
        let mut per_library = BTreeMap::new();
        per_library.insert(
            TargetLibrary::Re2,
            LibraryCoverage {
                total_branches: 120,
                total_traces: 9,
            },
        );
        let report = CampaignReport {
            target: TargetLibrary::Re2,
            cycles: vec![cycle()],
            stop_reason: StopReason::Converged,
            coverage_stats: CoverageStats {
                per_library,
                total_branches: 120,
                total_traces: 9,
                branches_per_trace_avg: 120.0 / 9.0,
            },
            total_executions: 9,
            active_seeds: 5,
            retired_seeds: 1,
        };
        let text = format_report(&report);
        assert!(text.contains("Campaign Report: re2"));
        assert!(text.contains("converged"));
        assert!(text.contains("Unique branches:        120"));
        assert!(text.contains("Crashes:                1"));
    }

    #[test]
    fn test_seed_table_marks_retired() {
        let mut seed = Seed::new(7, TargetLibrary::Zlib).with_combination(["deflateInit_", "deflate"]);
        seed.retired = true;
        let table = format_seed_table([&seed]);
        assert_eq!(table.lines().count(), 2);
        assert!(table.contains("deflateInit_, deflate"));
        assert!(table.contains("[retired]"));
    }

    #[test]
    fn test_long_combination_truncated() {
        let seed = Seed::new(1, TargetLibrary::Sqlite3)
            .with_combination(std::iter::repeat("sqlite3_exec").take(20));
        let table = format_seed_table([&seed]);
        assert!(table.lines().nth(1).unwrap().ends_with("..."));
    }

    #[test]
    fn test_format_minimize() {
        let text = format_minimize(&MinimizeReport {
            target: TargetLibrary::Libpng,
            mode: MinimizeMode::Branches,
            kept: vec![2, 3],
            redundant: vec![1, 4],
            total_features: 5,
        });
        assert!(text.contains("Branches covered:       5"));
        assert!(text.contains("Reduction:              50.0%"));
        assert!(text.contains("Keep: [2, 3]"));

        let text = format_minimize(&MinimizeReport {
            target: TargetLibrary::Libpng,
            mode: MinimizeMode::ApiTriples,
            kept: vec![2],
            redundant: vec![],
            total_features: 7,
        });
        assert!(text.contains("Call triples covered:   7"));
    }
}
