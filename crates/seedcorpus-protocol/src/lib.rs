//! Contract between generated seed harnesses and the seedcorpus engine.
//!
//! This crate defines the constants both sides agree on: the harness exit
//! sentinel, the environment variable used to hand a trace file to the
//! instrumentation, and the header tags that generated seed sources carry.
//! It has zero dependencies so harness-side tooling can link it freely.
//!
//! # Trace hand-off
//!
//! 1. Engine picks a fresh path and exports it as [`TRACE_FILE_ENV`]
//! 2. Engine spawns the seed binary
//! 3. Instrumentation writes a JSON trace object to that path on exit:
//!    `{"instruction_count": N, "branch_ids": [...], "library_calls": [...]}`
//! 4. Engine reads the file after the process exits (or is killed)
//!
//! A missing or unreadable trace file is not a protocol error: the engine
//! treats it as a trace without an instruction count.

// ═══════════════════════════════════════════════════════════════════════
//  Exit codes
// ═══════════════════════════════════════════════════════════════════════

/// Exit code a generated `test_<library>_api_sequence` harness returns when
/// its whole call sequence completed.
pub const HARNESS_SUCCESS_EXIT: i32 = 66;

/// Exit code sanitizer runtimes are configured to use (`ASAN_OPTIONS=exitcode=168`).
pub const SANITIZER_CRASH_EXIT: i32 = 168;

// ═══════════════════════════════════════════════════════════════════════
//  Trace hand-off
// ═══════════════════════════════════════════════════════════════════════

/// Environment variable naming the file the instrumentation writes its trace to.
pub const TRACE_FILE_ENV: &str = "SEEDCORPUS_TRACE_FILE";

/// Environment variable carrying the seed id, for instrumentation logging.
pub const SEED_ID_ENV: &str = "SEEDCORPUS_SEED_ID";

/// Default hard per-seed execution timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

// ═══════════════════════════════════════════════════════════════════════
//  Seed header tags
// ═══════════════════════════════════════════════════════════════════════

/// `//<ID> 42`
pub const TAG_ID: &str = "//<ID>";

/// `//<Prompt> [...]`
pub const TAG_PROMPT: &str = "//<Prompt>";

/// `/*<Combination>: [...]*/`
pub const TAG_COMBINATION: &str = "/*<Combination>:";

/// Closing marker of the combination block comment.
pub const TAG_COMBINATION_END: &str = "*/";

/// `//<score> 1.25, nr_unique_branch: 7`
pub const TAG_SCORE: &str = "//<score>";

/// Label of the unique-branch count inside the score line.
pub const TAG_NR_UNIQUE_BRANCH: &str = "nr_unique_branch:";

/// `//<Quality> {"density":...}`
pub const TAG_QUALITY: &str = "//<Quality>";

/// Prefix of the exported harness entry point, followed by the library name.
pub const HARNESS_FN_PREFIX: &str = "test_";

/// Suffix of the exported harness entry point.
pub const HARNESS_FN_SUFFIX: &str = "_api_sequence";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_are_distinct() {
        assert_ne!(HARNESS_SUCCESS_EXIT, SANITIZER_CRASH_EXIT);
        assert_ne!(HARNESS_SUCCESS_EXIT, 0);
    }

    #[test]
    fn test_tags_are_comment_prefixed() {
        for tag in [TAG_ID, TAG_PROMPT, TAG_SCORE, TAG_QUALITY] {
            assert!(tag.starts_with("//<"), "{tag}");
        }
        assert!(TAG_COMBINATION.starts_with("/*<"));
    }
}
