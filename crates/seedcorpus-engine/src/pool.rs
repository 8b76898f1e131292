//! Bounded worker pool for harness execution.
//!
//! One producer fills a shared queue, `workers` scoped threads drain it and
//! stream results back over a channel. The calling thread consumes results
//! as they arrive and is the only place state gets updated.

use crate::executor::{AdapterError, HarnessAdapter, HarnessRun};
use log::debug;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// One seed to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub seed_id: u64,
    pub binary: PathBuf,
}

/// A finished job.
#[derive(Debug)]
pub struct JobResult {
    pub seed_id: u64,
    pub result: Result<HarnessRun, AdapterError>,
}

/// Worker one per available CPU, at least one.
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

pub struct WorkerPool {
    workers: usize,
    timeout: Duration,
}

impl WorkerPool {
    pub fn new(workers: usize, timeout: Duration) -> Self {
        Self {
            workers: workers.max(1),
            timeout,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Execute every job, calling `on_result` on this thread for each one
    /// in completion order. Returns once all jobs have reported.
    pub fn run<F>(&self, adapter: &dyn HarnessAdapter, jobs: Vec<Job>, mut on_result: F) -> usize
    where
        F: FnMut(JobResult),
    {
        if jobs.is_empty() {
            return 0;
        }
        let workers = self.workers.min(jobs.len());
        let queue = Mutex::new(VecDeque::from(jobs));
        let (tx, rx) = mpsc::channel();
        let timeout = self.timeout;

        thread::scope(|scope| {
            for worker in 0..workers {
                let tx = tx.clone();
                let queue = &queue;
                scope.spawn(move || {
                    let mut done = 0usize;
                    loop {
                        let Some(job) = queue.lock().pop_front() else {
                            break;
                        };
                        let result = adapter.execute(&job.binary, job.seed_id, timeout);
                        done += 1;
                        if tx
                            .send(JobResult {
                                seed_id: job.seed_id,
                                result,
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                    debug!("Worker {} finished after {} jobs", worker, done);
                });
            }
            drop(tx);

            let mut received = 0;
            for result in rx {
                on_result(result);
                received += 1;
            }
            received
        })
    }
}
