//! In-memory job queue with completion-based filtering.
//!
//! The queue is the only shared mutable structure of a run and is owned
//! exclusively by the scheduler loop (single writer). It preserves
//! insertion order so jobs are considered for dispatch in a stable,
//! reproducible order.
//!
//! A filter pass re-reads every non-running job's result artifact:
//! satisfied jobs leave the queue, budget-exhausted jobs are evicted for
//! final reporting, everything else stays runnable.

use thiserror::Error;

use crate::inspector::{ResultInspector, Verdict};

use super::job::{AttemptOutcome, JobKey, JobState, JobStatus};

/// Errors that can occur during queue operations.
///
/// These indicate invariant violations and are fatal to the run; per-job
/// execution failures never surface here.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A job with the same (route id, seed) key is already queued.
    #[error("Job '{0}' already exists in queue")]
    DuplicateJob(JobKey),

    /// An outcome was recorded for a job the queue does not hold.
    #[error("Job '{0}' not found in queue")]
    JobNotFound(JobKey),

    /// An outcome was recorded for a job that was not running.
    #[error("Job '{key}' is {status}, expected running")]
    NotRunning { key: JobKey, status: JobStatus },
}

/// Result of one filter pass over the queue.
#[derive(Debug, Clone, Default)]
pub struct FilterReport {
    /// Jobs whose artifact reports completion; removed this pass.
    pub satisfied: Vec<JobKey>,
    /// Jobs evicted with spent budget; removed this pass.
    pub exhausted: Vec<JobState>,
    /// Jobs still in the queue after the pass.
    pub remaining: usize,
}

/// Insertion-ordered working set of jobs.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: Vec<JobState>,
}

impl JobQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a job, enforcing the (route id, seed) uniqueness invariant.
    pub fn push(&mut self, job: JobState) -> Result<(), QueueError> {
        let key = job.spec.key();
        if self.jobs.iter().any(|j| j.spec.key() == key) {
            return Err(QueueError::DuplicateJob(key));
        }
        self.jobs.push(job);
        Ok(())
    }

    /// Number of jobs currently held.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Read-only view of the queued jobs, in insertion order.
    pub fn jobs(&self) -> &[JobState] {
        &self.jobs
    }

    /// Re-evaluates every non-running job against its result artifact.
    ///
    /// Verdicts are computed fresh on each pass; the artifact can change
    /// between passes. Satisfied jobs are removed. Jobs that still need a
    /// run but have no budget left are evicted as exhausted. Running jobs
    /// are skipped until their outcome is recorded.
    pub fn filter_pass(&mut self, inspector: &ResultInspector) -> FilterReport {
        let mut report = FilterReport::default();
        let mut kept = Vec::with_capacity(self.jobs.len());

        for mut job in self.jobs.drain(..) {
            if job.status == JobStatus::Running {
                kept.push(job);
                continue;
            }

            match inspector.inspect(&job.spec.result_file) {
                Verdict::Satisfied => {
                    job.status = JobStatus::Satisfied;
                    report.satisfied.push(job.spec.key());
                }
                Verdict::NeedsRetry | Verdict::Unreadable => {
                    if job.tries_remaining == 0 {
                        job.status = JobStatus::Exhausted;
                        report.exhausted.push(job);
                    } else {
                        kept.push(job);
                    }
                }
            }
        }

        self.jobs = kept;
        report.remaining = self.jobs.len();
        report
    }

    /// Marks the first runnable job as running and returns its spec.
    ///
    /// Jobs are offered in insertion order; running jobs and jobs with a
    /// spent budget are skipped.
    pub fn take_runnable(&mut self) -> Option<super::job::JobSpec> {
        let job = self.jobs.iter_mut().find(|j| j.is_runnable())?;
        job.mark_running();
        Some(job.spec.clone())
    }

    /// Records the outcome of a finished attempt and consumes one try.
    pub fn record_outcome(
        &mut self,
        key: &JobKey,
        outcome: AttemptOutcome,
    ) -> Result<(), QueueError> {
        let job = self
            .jobs
            .iter_mut()
            .find(|j| j.spec.key() == *key)
            .ok_or_else(|| QueueError::JobNotFound(key.clone()))?;

        if job.status != JobStatus::Running {
            return Err(QueueError::NotRunning {
                key: key.clone(),
                status: job.status,
            });
        }

        job.record_attempt(outcome);
        Ok(())
    }

    /// Number of jobs currently marked running.
    pub fn running(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.status == JobStatus::Running)
            .count()
    }
}
