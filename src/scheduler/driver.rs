//! The run control loop.
//!
//! Repeatedly filters the queue against the result artifacts, dispatches
//! runnable jobs through the process supervisor (one per free port
//! assignment), decrements retry budgets and records outcomes. The loop
//! terminates when a filter pass leaves the queue empty, or when a
//! shutdown is requested and all in-flight children have been killed.
//!
//! Waiting is event-driven: with attempts in flight the loop blocks on
//! the next completion; only an idle loop falls back to a bounded poll
//! interval.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EvalConfig;
use crate::inspector::ResultInspector;
use crate::ports::{PortAssignment, PortPool, PortPoolError};
use crate::supervisor::ProcessSupervisor;

use super::job::{AttemptOutcome, JobKey};
use super::queue::{FilterReport, JobQueue, QueueError};

/// Errors that abort the whole run.
///
/// Per-job failures are recorded outcomes and never surface here; only
/// invariant violations in the queue or a panicked attempt task do.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Queue invariant violated: {0}")]
    Queue(#[from] QueueError),

    #[error("Port pool setup failed: {0}")]
    Ports(#[from] PortPoolError),

    #[error("Attempt task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Final accounting of a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Jobs in the initial queue.
    pub total: usize,
    /// Jobs whose artifact reported completion.
    pub satisfied: usize,
    /// Jobs abandoned after spending their retry budget.
    pub exhausted: Vec<JobKey>,
    /// Supervised attempts dispatched over the whole run.
    pub attempts: u64,
    /// Whether the run was aborted by a shutdown request.
    pub aborted: bool,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

impl RunSummary {
    /// Fraction of jobs satisfied, as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.satisfied as f64 / self.total as f64) * 100.0
    }
}

/// Owns the queue, the port pool and the supervisor for one run.
///
/// The queue is mutated only from this loop (single writer); dispatched
/// attempts receive a cloned [`crate::scheduler::job::JobSpec`] and
/// report back through the join set.
pub struct RunDriver {
    config: Arc<EvalConfig>,
    queue: JobQueue,
    inspector: ResultInspector,
    supervisor: ProcessSupervisor,
    ports: PortPool,
    shutdown_tx: broadcast::Sender<()>,
}

impl RunDriver {
    /// Creates a driver over a populated queue.
    pub fn new(config: EvalConfig, queue: JobQueue) -> Result<Self, DriverError> {
        let ports = PortPool::new(
            config.world_port,
            config.traffic_manager_port,
            config.port_stride,
            config.port_pool_size,
        )?;
        let config = Arc::new(config);
        let inspector = ResultInspector::new(config.failure_statuses.clone());
        let supervisor = ProcessSupervisor::new(Arc::clone(&config));
        let (shutdown_tx, _) = broadcast::channel(4);

        Ok(Self {
            config,
            queue,
            inspector,
            supervisor,
            ports,
            shutdown_tx,
        })
    }

    /// Handle for requesting a whole-run abort (e.g. from a Ctrl-C
    /// handler). One message kills every in-flight child.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Drives the queue to completion and returns the final accounting.
    pub async fn run(mut self) -> Result<RunSummary, DriverError> {
        let total = self.queue.len();
        let started = Instant::now();
        let mut satisfied = 0usize;
        let mut exhausted: Vec<JobKey> = Vec::new();
        let mut attempts = 0u64;
        let mut aborted = false;
        let mut in_flight: JoinSet<(JobKey, PortAssignment, AttemptOutcome)> = JoinSet::new();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let run_id = format!("run-{}", Uuid::new_v4());
        info!(
            run = %run_id,
            jobs = total,
            pool = self.ports.capacity(),
            "Starting run"
        );

        loop {
            let report = self.queue.filter_pass(&self.inspector);
            self.log_filter_report(&report, &mut satisfied, &mut exhausted);
            info!(
                satisfied,
                total,
                remaining = report.remaining,
                in_flight = in_flight.len(),
                "Progress"
            );

            if self.queue.is_empty() && in_flight.is_empty() {
                break;
            }

            if !aborted {
                attempts += self.dispatch_runnable(&mut in_flight);
            }

            if in_flight.is_empty() {
                if aborted {
                    break;
                }
                // Queue non-empty but nothing dispatchable right now;
                // pace the next pass instead of spinning.
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval()) => {}
                    result = shutdown_rx.recv() => {
                        if result.is_ok() {
                            aborted = true;
                        }
                    }
                }
                if aborted {
                    break;
                }
                continue;
            }

            tokio::select! {
                Some(joined) = in_flight.join_next() => {
                    let (key, assignment, outcome) = joined?;
                    self.ports.release(assignment);
                    match &outcome {
                        AttemptOutcome::Success => {
                            info!(job = %key, "Attempt finished: success");
                        }
                        AttemptOutcome::Cancelled => {
                            aborted = true;
                            warn!(job = %key, "Attempt cancelled");
                        }
                        other => {
                            warn!(job = %key, outcome = %other, "Attempt finished");
                        }
                    }
                    self.queue.record_outcome(&key, outcome)?;
                }
                result = shutdown_rx.recv() => {
                    if result.is_ok() {
                        aborted = true;
                        info!("Shutdown requested; killing in-flight attempts");
                    }
                }
            }

            if aborted {
                // The broadcast already reached every supervisor; wait for
                // the children to die so none is left orphaned.
                while let Some(joined) = in_flight.join_next().await {
                    let (key, assignment, outcome) = joined?;
                    self.ports.release(assignment);
                    self.queue.record_outcome(&key, outcome)?;
                }
                break;
            }
        }

        if aborted {
            // Pick up results that landed during the drain.
            let report = self.queue.filter_pass(&self.inspector);
            self.log_filter_report(&report, &mut satisfied, &mut exhausted);
        }

        let summary = RunSummary {
            total,
            satisfied,
            exhausted,
            attempts,
            aborted,
            elapsed: started.elapsed(),
        };
        info!(
            run = %run_id,
            satisfied = summary.satisfied,
            exhausted = summary.exhausted.len(),
            attempts = summary.attempts,
            aborted = summary.aborted,
            elapsed_secs = summary.elapsed.as_secs(),
            "Run complete"
        );
        Ok(summary)
    }

    /// Spawns attempts for runnable jobs while port assignments are free.
    /// Returns the number of attempts dispatched.
    fn dispatch_runnable(
        &mut self,
        in_flight: &mut JoinSet<(JobKey, PortAssignment, AttemptOutcome)>,
    ) -> u64 {
        let mut dispatched = 0;
        while self.ports.available() > 0 {
            let Some(spec) = self.queue.take_runnable() else {
                break;
            };
            let Some(assignment) = self.ports.acquire() else {
                break;
            };

            info!(job = %spec.label(), ports = %assignment, "Dispatching job");
            let supervisor = self.supervisor.clone();
            let shutdown = self.shutdown_tx.subscribe();
            in_flight.spawn(async move {
                let key = spec.key();
                let outcome = supervisor.execute(&spec, assignment, shutdown).await;
                (key, assignment, outcome)
            });
            dispatched += 1;
        }
        dispatched
    }

    fn log_filter_report(
        &self,
        report: &FilterReport,
        satisfied: &mut usize,
        exhausted: &mut Vec<JobKey>,
    ) {
        *satisfied += report.satisfied.len();
        for key in &report.satisfied {
            info!(job = %key, "Job satisfied");
        }
        for job in &report.exhausted {
            warn!(
                job = %job.spec.key(),
                last_outcome = ?job.last_outcome,
                "Retry budget exhausted, job abandoned"
            );
            exhausted.push(job.spec.key());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_success_rate() {
        let summary = RunSummary {
            total: 10,
            satisfied: 8,
            exhausted: vec![],
            attempts: 12,
            aborted: false,
            elapsed: Duration::from_secs(30),
        };
        assert!((summary.success_rate() - 80.0).abs() < f64::EPSILON);

        let empty = RunSummary {
            total: 0,
            satisfied: 0,
            exhausted: vec![],
            attempts: 0,
            aborted: false,
            elapsed: Duration::ZERO,
        };
        assert!((empty.success_rate() - 0.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_empty_queue_completes_immediately() {
        let config = EvalConfig::default();
        let driver = RunDriver::new(config, JobQueue::new()).expect("driver");

        let summary = driver.run().await.expect("run");

        assert_eq!(summary.total, 0);
        assert_eq!(summary.satisfied, 0);
        assert_eq!(summary.attempts, 0);
        assert!(!summary.aborted);
    }

    #[tokio::test]
    async fn test_pre_satisfied_jobs_never_dispatched() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EvalConfig::default();
        config.out_root = dir.path().to_path_buf();
        // An interpreter that would fail loudly if any dispatch happened.
        config.python_bin = "/nonexistent/interpreter".to_string();

        let layout = crate::layout::ArtifactLayout::from_config(&config);
        let spec = crate::scheduler::job::JobSpec::new(
            &config,
            &layout,
            std::path::PathBuf::from("routes/route_1.xml"),
            "1",
            1,
        );
        std::fs::create_dir_all(spec.result_file.parent().unwrap()).unwrap();
        std::fs::write(
            &spec.result_file,
            r#"{"_checkpoint":{"progress":[1,1],"records":[{"status":"Completed"}]}}"#,
        )
        .unwrap();

        let mut queue = JobQueue::new();
        queue
            .push(crate::scheduler::job::JobState::new(spec, config.tries))
            .unwrap();

        let driver = RunDriver::new(config, queue).expect("driver");
        let summary = driver.run().await.expect("run");

        assert_eq!(summary.satisfied, 1);
        assert_eq!(summary.attempts, 0);
        assert!(summary.exhausted.is_empty());
    }
}
