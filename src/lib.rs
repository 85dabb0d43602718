//! drivebench: evaluation orchestrator for driving-simulation benchmarks.
//!
//! Drives a batch of independent, long-running evaluator processes, one
//! per (route, seed) pair, retrying crashed or incomplete runs under a
//! bounded budget until the result artifact reports success.

pub mod cli;
pub mod config;
pub mod inspector;
pub mod layout;
pub mod ports;
pub mod scheduler;
pub mod supervisor;

// Re-export the types most callers need.
pub use config::{ConfigError, EvalConfig};
pub use inspector::{ResultInspector, Verdict};
pub use layout::ArtifactLayout;
pub use ports::{PortAssignment, PortPool};
pub use scheduler::{
    build_job_queue, AttemptOutcome, JobQueue, JobSpec, JobState, RunDriver, RunSummary,
};
pub use supervisor::ProcessSupervisor;
