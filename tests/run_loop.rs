//! End-to-end tests for the run loop.
//!
//! These drive the full scheduler against a stub evaluator (a shell
//! script standing in for the external benchmark process) so the whole
//! dispatch → supervise → inspect → retry cycle is exercised with real
//! child processes and real artifacts on disk.

use std::path::PathBuf;

use tempfile::TempDir;

use drivebench::scheduler::{build_job_queue, RunDriver};
use drivebench::{ArtifactLayout, EvalConfig};

const SATISFIED_ARTIFACT: &str =
    r#"{"_checkpoint":{"progress":[1,1],"records":[{"status":"Completed"}]}}"#;
const FAILED_ARTIFACT: &str =
    r#"{"_checkpoint":{"progress":[1,1],"records":[{"status":"Failed - Agent crashed"}]}}"#;

/// Prelude shared by every stub evaluator: extracts the checkpoint path
/// from the argv surface the orchestrator passes.
const STUB_PRELUDE: &str = r#"
out=""
for arg in "$@"; do
  case "$arg" in
    --checkpoint=*) out="${arg#--checkpoint=}" ;;
  esac
done
"#;

/// Builds a config rooted in a temp dir with a stub evaluator script.
fn setup(stub_body: &str) -> (TempDir, EvalConfig) {
    let dir = tempfile::tempdir().expect("tempdir");

    let repo_root = dir.path().join("repo");
    let evaluator = repo_root
        .join("Bench2Drive")
        .join("leaderboard")
        .join("leaderboard")
        .join("leaderboard_evaluator.py");
    std::fs::create_dir_all(evaluator.parent().unwrap()).expect("evaluator dir");
    std::fs::write(&evaluator, format!("{STUB_PRELUDE}\n{stub_body}\n")).expect("stub script");

    let route_dir = dir.path().join("routes");
    std::fs::create_dir_all(&route_dir).expect("route dir");
    std::fs::write(route_dir.join("route_1.xml"), "<routes/>").expect("route file");

    let mut config = EvalConfig::default();
    // The stub is a shell script; launch it with bash instead of python.
    config.python_bin = "bash".to_string();
    config.repo_root = repo_root;
    config.carla_root = dir.path().join("carla");
    config.route_dir = route_dir;
    config.out_root = dir.path().join("out");
    config.seeds = vec![1];
    config.tries = 2;
    config.poll_interval_secs = 1;

    (dir, config)
}

#[tokio::test]
async fn successful_evaluation_satisfies_job_in_one_attempt() {
    let (_dir, config) = setup(&format!("printf '%s' '{SATISFIED_ARTIFACT}' > \"$out\"\nexit 0"));
    let layout = ArtifactLayout::from_config(&config);

    let queue = build_job_queue(&config).expect("queue");
    assert_eq!(queue.len(), 1);

    let driver = RunDriver::new(config, queue).expect("driver");
    let summary = driver.run().await.expect("run");

    assert_eq!(summary.satisfied, 1);
    assert_eq!(summary.attempts, 1);
    assert!(summary.exhausted.is_empty());
    assert!(!summary.aborted);

    // The evaluator wrote its artifact where the layout says it must.
    let result = std::fs::read_to_string(layout.result_file(1, "001")).expect("artifact");
    assert!(result.contains("\"progress\":[1,1]"));

    // The stdout log starts with the configuration header.
    let log = std::fs::read_to_string(layout.stdout_log(1, "001")).expect("stdout log");
    assert!(log.contains("JOB CONFIGURATION"));
    assert!(log.contains("JOB ID: local_001_1"));
    assert!(log.contains("--traffic-manager-seed=1"));
}

#[tokio::test]
async fn failing_evaluation_retries_until_budget_exhausted() {
    let (_dir, config) = setup(&format!("printf '%s' '{FAILED_ARTIFACT}' > \"$out\"\nexit 1"));
    let layout = ArtifactLayout::from_config(&config);

    let queue = build_job_queue(&config).expect("queue");
    let driver = RunDriver::new(config, queue).expect("driver");
    let summary = driver.run().await.expect("run");

    // tries = 2: dispatched twice, then abandoned.
    assert_eq!(summary.attempts, 2);
    assert_eq!(summary.satisfied, 0);
    assert_eq!(summary.exhausted.len(), 1);
    assert_eq!(summary.exhausted[0].to_string(), "001_1");

    // The non-zero exit code landed in the error artifact.
    let err = std::fs::read_to_string(layout.stderr_log(1, "001")).expect("stderr log");
    assert!(err.contains("EXIT CODE: 1"));
}

#[tokio::test]
async fn failure_then_success_consumes_two_tries() {
    // First attempt writes a failing artifact and exits non-zero; the
    // second succeeds. The marker file is keyed by the checkpoint path,
    // so state is scoped to this job.
    let stub = format!(
        r#"marker="$out.attempted"
if [ -f "$marker" ]; then
  printf '%s' '{SATISFIED_ARTIFACT}' > "$out"
  exit 0
fi
touch "$marker"
printf '%s' '{FAILED_ARTIFACT}' > "$out"
exit 1"#
    );
    let (_dir, config) = setup(&stub);

    let queue = build_job_queue(&config).expect("queue");
    let driver = RunDriver::new(config, queue).expect("driver");
    let summary = driver.run().await.expect("run");

    assert_eq!(summary.attempts, 2);
    assert_eq!(summary.satisfied, 1);
    assert!(summary.exhausted.is_empty());
}

#[tokio::test]
async fn timed_out_evaluation_is_terminated_and_marked() {
    let (_dir, mut config) = setup("sleep 30");
    config.attempt_timeout_secs = 1;
    config.tries = 1;
    let layout = ArtifactLayout::from_config(&config);

    let queue = build_job_queue(&config).expect("queue");
    let driver = RunDriver::new(config, queue).expect("driver");

    let started = std::time::Instant::now();
    let summary = driver.run().await.expect("run");

    // Terminated well before the stub's sleep would have finished.
    assert!(started.elapsed() < std::time::Duration::from_secs(20));
    assert_eq!(summary.attempts, 1);
    assert_eq!(summary.satisfied, 0);
    assert_eq!(summary.exhausted.len(), 1);

    let err = std::fs::read_to_string(layout.stderr_log(1, "001")).expect("stderr log");
    assert!(err.contains("TIMEOUT"));
}

#[tokio::test]
async fn viz_scratch_is_reset_before_every_attempt() {
    // The stub refuses to succeed if the scratch directory handed to it
    // via SAVE_PATH is not empty.
    let stub = format!(
        r#"if [ -n "$(ls -A "$SAVE_PATH")" ]; then
  exit 7
fi
printf '%s' '{SATISFIED_ARTIFACT}' > "$out"
exit 0"#
    );
    let (_dir, config) = setup(&stub);
    let layout = ArtifactLayout::from_config(&config);

    // Leave a stale artifact from a "previous" attempt behind.
    let viz = layout.viz_dir(1, "001");
    std::fs::create_dir_all(&viz).expect("viz dir");
    std::fs::write(viz.join("stale_frame.png"), "old").expect("stale file");

    let queue = build_job_queue(&config).expect("queue");
    let driver = RunDriver::new(config, queue).expect("driver");
    let summary = driver.run().await.expect("run");

    assert_eq!(summary.satisfied, 1, "stale scratch leaked into the attempt");
}

#[tokio::test]
async fn pre_satisfied_artifact_short_circuits_the_run() {
    // Artifact already reports completion before the run starts: the job
    // must be filtered out without a single dispatch, even though the
    // stub would fail loudly.
    let (_dir, config) = setup("exit 9");
    let layout = ArtifactLayout::from_config(&config);

    let result_file = layout.result_file(1, "001");
    std::fs::create_dir_all(result_file.parent().unwrap()).expect("res dir");
    std::fs::write(&result_file, SATISFIED_ARTIFACT).expect("artifact");

    let queue = build_job_queue(&config).expect("queue");
    let driver = RunDriver::new(config, queue).expect("driver");
    let summary = driver.run().await.expect("run");

    assert_eq!(summary.satisfied, 1);
    assert_eq!(summary.attempts, 0);
}

#[tokio::test]
async fn multiple_seeds_produce_disjoint_artifacts() {
    let (_dir, mut config) = setup(&format!("printf '%s' '{SATISFIED_ARTIFACT}' > \"$out\"\nexit 0"));
    config.seeds = vec![1, 2];
    let layout = ArtifactLayout::from_config(&config);

    let queue = build_job_queue(&config).expect("queue");
    assert_eq!(queue.len(), 2);

    let driver = RunDriver::new(config, queue).expect("driver");
    let summary = driver.run().await.expect("run");

    assert_eq!(summary.satisfied, 2);
    assert_eq!(summary.attempts, 2);
    assert!(layout.result_file(1, "001").is_file());
    assert!(layout.result_file(2, "001").is_file());
    assert_ne!(
        layout.result_file(1, "001"),
        layout.result_file(2, "001"),
        "seeds must not share a result artifact"
    );
}

#[tokio::test]
async fn shutdown_kills_in_flight_child_and_aborts() {
    let (_dir, mut config) = setup("sleep 30");
    config.tries = 1;
    let layout = ArtifactLayout::from_config(&config);

    let queue = build_job_queue(&config).expect("queue");
    let driver = RunDriver::new(config, queue).expect("driver");
    let shutdown = driver.shutdown_handle();

    let abort = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        let _ = shutdown.send(());
    });

    let started = std::time::Instant::now();
    let summary = driver.run().await.expect("run");
    abort.await.expect("abort task");

    assert!(summary.aborted);
    assert!(
        started.elapsed() < std::time::Duration::from_secs(20),
        "abort must not wait for the child's sleep"
    );

    let err = std::fs::read_to_string(layout.stderr_log(1, "001")).expect("stderr log");
    assert!(err.contains("ABORTED"));
}

#[test]
fn duplicate_route_seed_pairs_are_rejected() {
    let (_dir, config) = setup("exit 0");
    let layout = ArtifactLayout::from_config(&config);

    let mut queue = drivebench::JobQueue::new();
    let spec = drivebench::JobSpec::new(
        &config,
        &layout,
        PathBuf::from("routes/route_1.xml"),
        "1",
        1,
    );
    queue
        .push(drivebench::JobState::new(spec.clone(), config.tries))
        .expect("first push");
    let err = queue
        .push(drivebench::JobState::new(spec, config.tries))
        .expect_err("duplicate key must be rejected");
    assert!(err.to_string().contains("already exists"));
}
