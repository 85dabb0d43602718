//! Job definitions for the scheduler.
//!
//! - `JobSpec`: one immutable (route, seed) evaluation unit
//! - `JobState`: a spec plus its remaining retry budget and status
//! - `AttemptOutcome`: result of one supervised execution attempt

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::EvalConfig;
use crate::layout::ArtifactLayout;

/// Unique key of a job within a benchmark run.
///
/// No two jobs with the same (route id, seed) coexist in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub route_id: String,
    pub seed: u32,
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.route_id, self.seed)
    }
}

/// Immutable description of one evaluation unit, created at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Name of the evaluated agent.
    pub agent: String,
    /// Agent checkpoint handed to the evaluator.
    pub checkpoint: PathBuf,
    /// Route definition file driving this episode.
    pub route_file: PathBuf,
    /// Zero-padded route identifier.
    pub route_id: String,
    /// Traffic-manager seed for this variant.
    pub seed: u32,
    /// Result artifact written by the evaluator.
    pub result_file: PathBuf,
    /// Captured stdout of the evaluator, plus the configuration header.
    pub stdout_log: PathBuf,
    /// Captured stderr of the evaluator.
    pub stderr_log: PathBuf,
    /// Visualization scratch directory, reset before every attempt.
    pub viz_dir: PathBuf,
}

impl JobSpec {
    /// Builds the spec for one (route, seed) pair with paths derived from
    /// the layout.
    pub fn new(
        config: &EvalConfig,
        layout: &ArtifactLayout,
        route_file: PathBuf,
        raw_route_id: &str,
        seed: u32,
    ) -> Self {
        let route_id = layout.pad_route_id(raw_route_id);
        Self {
            agent: config.agent.clone(),
            checkpoint: config.checkpoint.clone(),
            route_file,
            result_file: layout.result_file(seed, &route_id),
            stdout_log: layout.stdout_log(seed, &route_id),
            stderr_log: layout.stderr_log(seed, &route_id),
            viz_dir: layout.viz_dir(seed, &route_id),
            route_id,
            seed,
        }
    }

    /// Unique key of this job.
    pub fn key(&self) -> JobKey {
        JobKey {
            route_id: self.route_id.clone(),
            seed: self.seed,
        }
    }

    /// Human-readable label used in logs.
    pub fn label(&self) -> String {
        format!("{}_{}_{}", self.agent, self.seed, self.route_id)
    }
}

/// Transient status of a job in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Waiting for dispatch.
    Pending,
    /// An attempt is in flight; excluded from filtering.
    Running,
    /// The result artifact reports completion; leaves the queue.
    Satisfied,
    /// Retry budget spent without satisfaction; leaves the queue.
    Exhausted,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Satisfied => write!(f, "satisfied"),
            JobStatus::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Outcome of one supervised execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    /// Child exited with code 0.
    Success,
    /// Child exited with a non-zero code.
    Failure(i32),
    /// Child exceeded the wall-clock budget and was terminated.
    Timeout,
    /// Preparing or launching the child failed before it could run.
    LaunchError(String),
    /// The run was aborted and the child was killed.
    Cancelled,
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptOutcome::Success => write!(f, "success"),
            AttemptOutcome::Failure(code) => write!(f, "failure (exit code {code})"),
            AttemptOutcome::Timeout => write!(f, "timeout"),
            AttemptOutcome::LaunchError(cause) => write!(f, "launch error: {cause}"),
            AttemptOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Mutable per-job state owned by the scheduler.
#[derive(Debug, Clone)]
pub struct JobState {
    pub spec: JobSpec,
    /// Remaining attempts; decremented after every attempt, success or not.
    pub tries_remaining: u32,
    pub status: JobStatus,
    /// Outcome of the most recent attempt, for reporting.
    pub last_outcome: Option<AttemptOutcome>,
}

impl JobState {
    /// Creates a pending job with the configured retry budget.
    pub fn new(spec: JobSpec, tries: u32) -> Self {
        Self {
            spec,
            tries_remaining: tries,
            status: JobStatus::Pending,
            last_outcome: None,
        }
    }

    /// Whether the job may be dispatched right now.
    pub fn is_runnable(&self) -> bool {
        self.status == JobStatus::Pending && self.tries_remaining > 0
    }

    /// Marks the job as dispatched.
    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
    }

    /// Records an attempt outcome and consumes one try.
    ///
    /// Satisfaction is decided by the next filter pass, not by the exit
    /// code: the evaluator can exit 0 with a failed record in the artifact.
    pub fn record_attempt(&mut self, outcome: AttemptOutcome) {
        self.tries_remaining = self.tries_remaining.saturating_sub(1);
        self.last_outcome = Some(outcome);
        self.status = JobStatus::Pending;
    }
}
