//! Supervised execution of one evaluation attempt.
//!
//! The supervisor launches the external evaluator for a job with an
//! isolated environment and port assignment, captures stdout/stderr to
//! the job's log files, enforces the wall-clock budget and converts
//! every failure into a recorded [`AttemptOutcome`]. Nothing raised
//! here ever crashes the scheduler loop.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::EvalConfig;
use crate::ports::PortAssignment;
use crate::scheduler::job::{AttemptOutcome, JobSpec};

/// Errors raised while preparing or launching an attempt.
///
/// These never propagate past [`ProcessSupervisor::execute`]; they are
/// appended to the job's error file and reported as
/// [`AttemptOutcome::LaunchError`].
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Failed to reset viz directory '{path}': {source}")]
    VizReset {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open log file '{path}': {source}")]
    LogOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn evaluator: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Launches and supervises evaluator processes.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    config: Arc<EvalConfig>,
}

impl ProcessSupervisor {
    /// Creates a supervisor for the given configuration.
    pub fn new(config: Arc<EvalConfig>) -> Self {
        Self { config }
    }

    /// Runs one attempt for `spec` on the given port assignment.
    ///
    /// All side effects are confined to the job's own artifact files and
    /// the child process. A message on `shutdown` kills the child and
    /// yields [`AttemptOutcome::Cancelled`].
    pub async fn execute(
        &self,
        spec: &JobSpec,
        ports: PortAssignment,
        shutdown: broadcast::Receiver<()>,
    ) -> AttemptOutcome {
        match self.try_execute(spec, ports, shutdown).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(job = %spec.label(), error = %e, "Attempt failed before the evaluator ran");
                self.append_note(spec, &format!("LAUNCH ERROR: {e}"));
                AttemptOutcome::LaunchError(e.to_string())
            }
        }
    }

    async fn try_execute(
        &self,
        spec: &JobSpec,
        ports: PortAssignment,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<AttemptOutcome, SupervisorError> {
        let config = &self.config;

        // Stale artifacts from a prior failed attempt must not leak into
        // this one.
        reset_dir(&spec.viz_dir).map_err(|source| SupervisorError::VizReset {
            path: spec.viz_dir.clone(),
            source,
        })?;

        let inherited = std::env::var("PYTHONPATH").ok();
        let search_path = module_search_path(config, inherited.as_deref());
        let env = build_child_env(config, spec, &search_path);
        let args = build_command_args(config, spec, ports);

        // Stdout log is opened fresh per attempt and starts with the
        // resolved configuration, for post-mortem diagnosability.
        let mut stdout_log = open_log(&spec.stdout_log)?;
        write_config_header(&mut stdout_log, config, spec, &env, &search_path, &args)?;
        stdout_log.flush()?;
        let stderr_log = open_log(&spec.stderr_log)?;

        info!(
            job = %spec.label(),
            route = %spec.route_file.display(),
            %ports,
            "Launching evaluator"
        );
        debug!(job = %spec.label(), ?args, "Evaluator command line");

        let mut command = tokio::process::Command::new(&config.python_bin);
        command
            .args(&args)
            .env_clear()
            .envs(std::env::vars())
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&config.repo_root)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_log))
            .stderr(Stdio::from(stderr_log))
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(SupervisorError::Spawn)?;

        // A closed channel means no abort will ever arrive; keep waiting
        // on the child instead of treating it as a signal.
        let abort = async move {
            loop {
                match shutdown.recv().await {
                    Ok(()) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        std::future::pending::<()>().await;
                    }
                }
            }
        };
        tokio::pin!(abort);

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                match status.code() {
                    Some(0) => Ok(AttemptOutcome::Success),
                    Some(code) => {
                        self.append_note(spec, &format!("EXIT CODE: {code}"));
                        Ok(AttemptOutcome::Failure(code))
                    }
                    // Terminated by a signal.
                    None => {
                        self.append_note(spec, "TERMINATED: evaluator killed by signal");
                        Ok(AttemptOutcome::Failure(-1))
                    }
                }
            }
            _ = tokio::time::sleep(config.attempt_timeout()) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                self.append_note(
                    spec,
                    &format!(
                        "TIMEOUT: attempt exceeded the {}s wall-clock budget and was terminated",
                        config.attempt_timeout_secs
                    ),
                );
                Ok(AttemptOutcome::Timeout)
            }
            _ = &mut abort => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                self.append_note(spec, "ABORTED: run shutdown requested, evaluator killed");
                Ok(AttemptOutcome::Cancelled)
            }
        }
    }

    /// Appends a marker line to the job's error file.
    ///
    /// Failure detail must survive in the artifact, not only on the
    /// console; if even the append fails, that is logged rather than
    /// swallowed.
    fn append_note(&self, spec: &JobSpec, note: &str) {
        if let Err(e) = append_line(&spec.stderr_log, note) {
            warn!(
                job = %spec.label(),
                path = %spec.stderr_log.display(),
                error = %e,
                "Failed to append note to error file"
            );
        }
    }
}

/// Removes and recreates a directory (idempotent reset).
fn reset_dir(path: &Path) -> std::io::Result<()> {
    if path.exists() {
        std::fs::remove_dir_all(path)?;
    }
    std::fs::create_dir_all(path)
}

/// Opens a log file fresh (truncating), creating parent directories.
fn open_log(path: &Path) -> Result<std::fs::File, SupervisorError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| SupervisorError::LogOpen {
            path: path.to_path_buf(),
            source,
        })?;
    }
    std::fs::File::create(path).map_err(|source| SupervisorError::LogOpen {
        path: path.to_path_buf(),
        source,
    })
}

/// Appends one line to a file, creating it if needed.
fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{line}")
}

/// Assembles the module search path for the child process.
///
/// Orchestrator-managed roots come first, then any inherited search
/// path, de-duplicated preserving first occurrence.
pub fn module_search_path(config: &EvalConfig, inherited: Option<&str>) -> Vec<String> {
    let local_roots = [
        config.repo_root.clone(),
        config.team_code_root(),
        config.carla_root.join("PythonAPI").join("carla"),
        config.benchmark_root(),
        config.scenario_runner_root(),
        config.leaderboard_root(),
    ];

    let mut seen = HashSet::new();
    let mut paths = Vec::new();
    for root in local_roots {
        let entry = root.to_string_lossy().to_string();
        if seen.insert(entry.clone()) {
            paths.push(entry);
        }
    }
    if let Some(inherited) = inherited {
        for entry in inherited.split(':') {
            if !entry.is_empty() && seen.insert(entry.to_string()) {
                paths.push(entry.to_string());
            }
        }
    }
    paths
}

/// Builds the child environment as a pure function of the configuration,
/// the job and the search path.
///
/// The ambient process environment is never mutated; each child gets its
/// own copy with these variables layered on top.
pub fn build_child_env(
    config: &EvalConfig,
    spec: &JobSpec,
    search_path: &[String],
) -> Vec<(String, String)> {
    vec![
        (
            "CARLA_ROOT".to_string(),
            config.carla_root.to_string_lossy().to_string(),
        ),
        (
            "WORK_DIR".to_string(),
            config.repo_root.to_string_lossy().to_string(),
        ),
        ("PYTHONPATH".to_string(), search_path.join(":")),
        (
            "SCENARIO_RUNNER_ROOT".to_string(),
            config.scenario_runner_root().to_string_lossy().to_string(),
        ),
        (
            "LEADERBOARD_ROOT".to_string(),
            config.leaderboard_root().to_string_lossy().to_string(),
        ),
        (
            "SAVE_PATH".to_string(),
            spec.viz_dir.to_string_lossy().to_string(),
        ),
        (
            "TEAM_CODE_ROOT".to_string(),
            config.team_code_root().to_string_lossy().to_string(),
        ),
    ]
}

/// Builds the evaluator argv for one attempt.
pub fn build_command_args(
    config: &EvalConfig,
    spec: &JobSpec,
    ports: PortAssignment,
) -> Vec<String> {
    vec![
        "-u".to_string(),
        config.evaluator_script().to_string_lossy().to_string(),
        format!("--routes={}", spec.route_file.display()),
        "--repetitions=1".to_string(),
        "--track=SENSORS".to_string(),
        format!("--checkpoint={}", spec.result_file.display()),
        format!("--timeout={}", config.evaluator_timeout_secs),
        format!("--agent={}", config.agent_file.display()),
        format!("--agent-config={}", spec.checkpoint.display()),
        format!("--traffic-manager-seed={}", spec.seed),
        format!("--port={}", ports.world),
        format!("--traffic-manager-port={}", ports.traffic_manager),
    ]
}

/// Writes the resolved configuration to the top of the stdout log.
fn write_config_header(
    out: &mut std::fs::File,
    config: &EvalConfig,
    spec: &JobSpec,
    env: &[(String, String)],
    search_path: &[String],
    args: &[String],
) -> std::io::Result<()> {
    let rule = "=".repeat(70);
    let thin = "-".repeat(70);

    writeln!(out, "{rule}")?;
    writeln!(out, "JOB CONFIGURATION")?;
    writeln!(out, "{rule}")?;
    writeln!(out, "JOB ID: local_{}_{}", spec.route_id, spec.seed)?;
    writeln!(out, "Started: {}", chrono::Utc::now().to_rfc3339())?;
    writeln!(out, "Agent: {}", spec.agent)?;
    writeln!(out, "Checkpoint: {}", spec.checkpoint.display())?;
    writeln!(out, "Route: {}", spec.route_file.display())?;
    writeln!(out, "{thin}")?;
    writeln!(out, "ENVIRONMENT VARIABLES:")?;
    writeln!(out, "{thin}")?;
    for (key, value) in env {
        if key != "PYTHONPATH" {
            writeln!(out, "{key}: {value}")?;
        }
    }
    writeln!(out)?;
    writeln!(out, "PYTHONPATH entries:")?;
    for (i, entry) in search_path.iter().enumerate() {
        let marker = if Path::new(entry).exists() {
            "exists"
        } else {
            "NOT FOUND"
        };
        writeln!(out, "  {}. {entry} [{marker}]", i + 1)?;
    }
    writeln!(out, "{thin}")?;
    writeln!(out, "REQUIRED FILES:")?;
    for path in [&config.agent_file, &config.evaluator_script(), &spec.checkpoint] {
        let marker = if path.exists() { "exists" } else { "NOT FOUND" };
        writeln!(out, "  {} [{marker}]", path.display())?;
    }
    writeln!(out, "{thin}")?;
    writeln!(out, "COMMAND:")?;
    writeln!(out, "{} {}", config.python_bin, args.join(" "))?;
    writeln!(out, "{rule}")?;
    writeln!(out)?;
    writeln!(out, "OUTPUT:")?;
    writeln!(out, "{thin}")?;
    Ok(())
}
