//! Harness execution: the adapter seam and outcome classification.
//!
//! The engine never runs seeds itself. A [`HarnessAdapter`] executes one
//! compiled harness under a hard timeout and reports how the process ended
//! plus whatever trace the instrumentation left behind. Deciding whether
//! that was a success, a crash or a timeout is the engine's job
//! ([`classify`]), so adapters stay dumb.

use crate::quality::ExecutionTrace;
use log::{debug, warn};
use seedcorpus_protocol::{HARNESS_SUCCESS_EXIT, SEED_ID_ENV, TRACE_FILE_ENV};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors from running a harness. These are infrastructure failures, not
/// seed outcomes: a crashing seed is a successful execution.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for {binary}: {source}")]
    Wait {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("work directory {path} unavailable: {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How the harness process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Exited(i32),
    /// Terminated by a signal (number when the platform reports one).
    Signaled(Option<i32>),
    /// Killed by the adapter at the deadline.
    TimedOut,
}

/// Raw result of one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessRun {
    pub status: RunStatus,
    pub trace: ExecutionTrace,
    pub elapsed: Duration,
}

impl HarnessRun {
    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            RunStatus::Exited(code) => Some(code),
            _ => None,
        }
    }
}

/// Engine-level meaning of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Ran to completion. `sentinel_ok` is false when the harness returned
    /// something other than its success sentinel (an API call failed).
    Success { sentinel_ok: bool },
    Crash,
    Timeout,
}

/// Map a process ending to an outcome.
pub fn classify(status: RunStatus, crash_exit_codes: &[i32]) -> ExecutionOutcome {
    match status {
        RunStatus::TimedOut => ExecutionOutcome::Timeout,
        RunStatus::Signaled(_) => ExecutionOutcome::Crash,
        RunStatus::Exited(code) if crash_exit_codes.contains(&code) => ExecutionOutcome::Crash,
        RunStatus::Exited(code) => ExecutionOutcome::Success {
            sentinel_ok: code == HARNESS_SUCCESS_EXIT,
        },
    }
}

/// Runs one compiled seed harness.
///
/// Implementations are shared across worker threads.
pub trait HarnessAdapter: Send + Sync {
    fn execute(&self, binary: &Path, seed_id: u64, timeout: Duration)
        -> Result<HarnessRun, AdapterError>;
}

/// Runs harnesses as subprocesses and collects the JSON trace file the
/// instrumentation writes to `$SEEDCORPUS_TRACE_FILE`.
pub struct CommandAdapter {
    work_dir: PathBuf,
    args: Vec<String>,
    poll_interval: Duration,
    next_trace: AtomicU64,
}

impl CommandAdapter {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            args: Vec::new(),
            poll_interval: Duration::from_millis(10),
            next_trace: AtomicU64::new(0),
        }
    }

    /// Extra arguments passed to every harness.
    pub fn with_args<S: Into<String>>(mut self, args: impl IntoIterator<Item = S>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn trace_path(&self, seed_id: u64) -> PathBuf {
        let n = self.next_trace.fetch_add(1, Ordering::Relaxed);
        self.work_dir.join(format!("trace-{seed_id}-{n}.json"))
    }
}

#[cfg(unix)]
fn signal_of(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn signal_of(_status: &ExitStatus) -> Option<i32> {
    None
}

fn run_status(status: ExitStatus) -> RunStatus {
    match status.code() {
        Some(code) => RunStatus::Exited(code),
        None => RunStatus::Signaled(signal_of(&status)),
    }
}

/// Read and remove a trace file. Absent or malformed traces become a trace
/// without an instruction count, which the scorer rejects.
fn take_trace(path: &Path) -> ExecutionTrace {
    let trace = match fs::read_to_string(path) {
        Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
            warn!("Malformed trace {}: {}", path.display(), e);
            ExecutionTrace::default()
        }),
        Err(_) => ExecutionTrace::default(),
    };
    let _ = fs::remove_file(path);
    trace
}

impl HarnessAdapter for CommandAdapter {
    fn execute(
        &self,
        binary: &Path,
        seed_id: u64,
        timeout: Duration,
    ) -> Result<HarnessRun, AdapterError> {
        fs::create_dir_all(&self.work_dir).map_err(|source| AdapterError::WorkDir {
            path: self.work_dir.clone(),
            source,
        })?;
        let trace_path = self.trace_path(seed_id);
        let _ = fs::remove_file(&trace_path);

        let started = Instant::now();
        let mut child = Command::new(binary)
            .args(&self.args)
            .env(TRACE_FILE_ENV, &trace_path)
            .env(SEED_ID_ENV, seed_id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| AdapterError::Spawn {
                binary: binary.to_path_buf(),
                source,
            })?;

        let deadline = started + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break run_status(status),
                Ok(None) => {
                    let now = Instant::now();
                    if now >= deadline {
                        debug!("Seed {} hit its {:?} deadline, killing", seed_id, timeout);
                        let _ = child.kill();
                        let _ = child.wait();
                        break RunStatus::TimedOut;
                    }
                    thread::sleep(self.poll_interval.min(deadline - now));
                }
                Err(source) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(AdapterError::Wait {
                        binary: binary.to_path_buf(),
                        source,
                    });
                }
            }
        };

        Ok(HarnessRun {
            status,
            trace: take_trace(&trace_path),
            elapsed: started.elapsed(),
        })
    }
}
