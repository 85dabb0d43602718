//! Job lifecycle management: queue construction, filtering and the run
//! control loop.
//!
//! # Architecture
//!
//! ```text
//! route files x seeds → JobQueue → filter (ResultInspector)
//!                          │
//!                          ▼
//!                  RunDriver picks runnable job
//!                          │  port assignment from the pool
//!                          ▼
//!                  ProcessSupervisor executes evaluator
//!                          │  artifacts land in the output tree
//!                          ▼
//!                  outcome recorded, budget decremented, repeat
//! ```
//!
//! The loop ends when a filter pass leaves the queue empty; jobs either
//! reach satisfaction via their result artifact or are abandoned once
//! their retry budget is spent.

pub mod driver;
pub mod job;
pub mod queue;

use thiserror::Error;
use tracing::info;

use crate::config::EvalConfig;
use crate::layout::{self, ArtifactLayout};

pub use driver::{DriverError, RunDriver, RunSummary};
pub use job::{AttemptOutcome, JobKey, JobSpec, JobState, JobStatus};
pub use queue::{FilterReport, JobQueue, QueueError};

/// Errors that can occur while building the initial job queue.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Failed to list route files in '{path}': {source}")]
    RouteDiscovery {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No route files found in '{0}'")]
    NoRoutes(std::path::PathBuf),

    #[error("Route file '{0}' has no extractable route id")]
    BadRouteName(std::path::PathBuf),

    #[error("Failed to create output directories: {0}")]
    OutputTree(#[from] std::io::Error),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Builds the job queue for a run: the cross product of discovered
/// routes and configured seeds, with the output tree created up front.
///
/// Jobs are inserted seed-major in sorted route order, so the schedule
/// is reproducible across runs.
pub fn build_job_queue(config: &EvalConfig) -> Result<JobQueue, SetupError> {
    let layout = ArtifactLayout::from_config(config);
    let routes =
        layout::discover_routes(&config.route_dir).map_err(|source| SetupError::RouteDiscovery {
            path: config.route_dir.clone(),
            source,
        })?;
    if routes.is_empty() {
        return Err(SetupError::NoRoutes(config.route_dir.clone()));
    }

    let mut queue = JobQueue::new();
    for &seed in &config.seeds {
        layout.ensure_seed_dirs(seed)?;
        for route_file in &routes {
            let raw_id = layout::route_id_from_file(route_file)
                .ok_or_else(|| SetupError::BadRouteName(route_file.clone()))?;
            let spec = JobSpec::new(config, &layout, route_file.clone(), &raw_id, seed);
            queue.push(JobState::new(spec, config.tries))?;
        }
    }

    info!(
        routes = routes.len(),
        seeds = config.seeds.len(),
        jobs = queue.len(),
        "Job queue built"
    );
    Ok(queue)
}
