//! Run configuration for benchmark evaluation.
//!
//! An [`EvalConfig`] describes one batch of evaluations: which agent and
//! checkpoint to evaluate, which benchmark routes to drive, how often to
//! retry a failing route, and where the simulator and repository live on
//! disk. Configs are loaded from a YAML file and can be tweaked with
//! builder-style setters or CLI overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default per-attempt wall-clock budget (3 hours).
const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 3 * 60 * 60;

/// Default simulator-side timeout handed to the evaluator, in seconds.
const DEFAULT_EVALUATOR_TIMEOUT_SECS: u64 = 600;

/// Default retry budget per (route, seed) job.
const DEFAULT_TRIES: u32 = 2;

/// Failure statuses that mark a route record as needing resubmission.
///
/// Evaluator versions may extend this vocabulary; the config field
/// `failure_statuses` overrides this default set.
pub const DEFAULT_FAILURE_STATUSES: [&str; 4] = [
    "Failed - Agent couldn't be set up",
    "Failed",
    "Failed - Simulation crashed",
    "Failed - Agent crashed",
];

/// Errors that can occur while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("No seeds configured; at least one seed is required")]
    NoSeeds,

    #[error("Retry budget must be at least 1")]
    ZeroTries,

    #[error("Port pool size must be at least 1")]
    EmptyPortPool,

    #[error("No failure statuses configured; an empty set would treat every record as success")]
    NoFailureStatuses,
}

/// Configuration for one evaluation batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Name of the evaluated agent (used in the output tree and job labels).
    pub agent: String,
    /// Agent checkpoint passed to the evaluator via `--agent-config`.
    pub checkpoint: PathBuf,
    /// Benchmark name (controls route-id padding and the output tree).
    pub benchmark: String,
    /// Directory containing the benchmark route XML files.
    pub route_dir: PathBuf,
    /// Traffic-manager seeds; the job queue is routes x seeds.
    pub seeds: Vec<u32>,
    /// Retry budget per job. Every supervised attempt consumes one try.
    pub tries: u32,
    /// Root of the output tree (results, logs, viz scratch).
    pub out_root: PathBuf,
    /// Simulator installation root (CARLA_ROOT for the child process).
    pub carla_root: PathBuf,
    /// Repository root; also the working directory of the child process.
    pub repo_root: PathBuf,
    /// Agent entry script passed to the evaluator via `--agent`.
    pub agent_file: PathBuf,
    /// Name of the team-code directory under the repository root.
    pub team_code: String,
    /// Name of the benchmark checkout under the repository root
    /// (scenario runner and leaderboard live beneath it).
    pub benchmark_subdir: String,
    /// Interpreter used to launch the evaluator.
    pub python_bin: String,
    /// Wall-clock budget for one supervised attempt, in seconds.
    pub attempt_timeout_secs: u64,
    /// Simulator-side timeout handed to the evaluator as `--timeout`.
    pub evaluator_timeout_secs: u64,
    /// First simulator world port.
    pub world_port: u16,
    /// First traffic-manager port.
    pub traffic_manager_port: u16,
    /// Distance between consecutive port assignments in the pool.
    pub port_stride: u16,
    /// Number of disjoint port pairs, i.e. the max number of concurrent jobs.
    pub port_pool_size: usize,
    /// Record statuses that mark a route as failed and retryable.
    pub failure_statuses: Vec<String>,
    /// Pacing delay between scheduling passes when nothing is in flight.
    pub poll_interval_secs: u64,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            agent: "simlingo".to_string(),
            checkpoint: PathBuf::from("checkpoints/model.pt"),
            benchmark: "bench2drive".to_string(),
            route_dir: PathBuf::from("leaderboard/data/bench2drive_split"),
            seeds: vec![1, 2, 3],
            tries: DEFAULT_TRIES,
            out_root: PathBuf::from("eval_results/Bench2Drive"),
            carla_root: std::env::var("CARLA_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/opt/carla")),
            repo_root: std::env::var("REPO_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            agent_file: PathBuf::from("team_code/agent.py"),
            team_code: "team_code".to_string(),
            benchmark_subdir: "Bench2Drive".to_string(),
            python_bin: "python".to_string(),
            attempt_timeout_secs: DEFAULT_ATTEMPT_TIMEOUT_SECS,
            evaluator_timeout_secs: DEFAULT_EVALUATOR_TIMEOUT_SECS,
            world_port: 10000,
            traffic_manager_port: 8000,
            port_stride: 50,
            port_pool_size: 1,
            failure_statuses: DEFAULT_FAILURE_STATUSES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            poll_interval_secs: 1,
        }
    }
}

impl EvalConfig {
    /// Loads a configuration from a YAML file.
    ///
    /// Missing fields fall back to their defaults, so a minimal config only
    /// needs to name the paths that differ from the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.seeds.is_empty() {
            return Err(ConfigError::NoSeeds);
        }
        if self.tries == 0 {
            return Err(ConfigError::ZeroTries);
        }
        if self.port_pool_size == 0 {
            return Err(ConfigError::EmptyPortPool);
        }
        if self.failure_statuses.is_empty() {
            return Err(ConfigError::NoFailureStatuses);
        }
        Ok(())
    }

    /// Sets the retry budget.
    pub fn with_tries(mut self, tries: u32) -> Self {
        self.tries = tries;
        self
    }

    /// Sets the seeds to evaluate.
    pub fn with_seeds(mut self, seeds: Vec<u32>) -> Self {
        self.seeds = seeds;
        self
    }

    /// Sets the output root.
    pub fn with_out_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.out_root = root.into();
        self
    }

    /// Sets the per-attempt wall-clock budget.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout_secs = timeout.as_secs();
        self
    }

    /// Sets the port pool size (max concurrent jobs).
    pub fn with_port_pool_size(mut self, size: usize) -> Self {
        self.port_pool_size = size;
        self
    }

    /// Per-attempt wall-clock budget as a [`Duration`].
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    /// Pacing delay between scheduling passes.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// Zero-padding width for route identifiers of this benchmark.
    pub fn route_id_width(&self) -> usize {
        if self.benchmark.eq_ignore_ascii_case("bench2drive") {
            3
        } else {
            2
        }
    }

    /// Root of the benchmark checkout (scenario runner, leaderboard).
    pub fn benchmark_root(&self) -> PathBuf {
        self.repo_root.join(&self.benchmark_subdir)
    }

    /// Path of the scenario-runner checkout.
    pub fn scenario_runner_root(&self) -> PathBuf {
        self.benchmark_root().join("scenario_runner")
    }

    /// Path of the leaderboard checkout.
    pub fn leaderboard_root(&self) -> PathBuf {
        self.benchmark_root().join("leaderboard")
    }

    /// Path of the evaluator entry script.
    pub fn evaluator_script(&self) -> PathBuf {
        self.leaderboard_root()
            .join("leaderboard")
            .join("leaderboard_evaluator.py")
    }

    /// Path of the team-code directory.
    pub fn team_code_root(&self) -> PathBuf {
        self.repo_root.join(&self.team_code)
    }

    /// Returns whether `status` is a recognized failure status.
    pub fn is_failure_status(&self, status: &str) -> bool {
        self.failure_statuses.iter().any(|s| s == status)
    }
}
