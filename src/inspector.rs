//! Result artifact inspection.
//!
//! The external evaluator writes a checkpoint document next to each run.
//! The inspector derives a completion verdict from it without ever
//! mutating the file. The verdict is re-evaluated on every scheduling
//! pass: a crashed-then-restarted evaluator can rewrite the artifact
//! between passes.

use std::path::Path;

use serde::Deserialize;

/// Completion verdict for one job's result artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// All routes completed and no record carries a failure status.
    Satisfied,
    /// The artifact parsed but reports incomplete progress or a failed
    /// record; the job should be resubmitted while budget remains.
    NeedsRetry,
    /// The artifact is missing or not parseable; treated as "never ran".
    Unreadable,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Satisfied => write!(f, "satisfied"),
            Verdict::NeedsRetry => write!(f, "needs-retry"),
            Verdict::Unreadable => write!(f, "unreadable"),
        }
    }
}

/// Top-level shape of the evaluator's checkpoint document.
#[derive(Debug, Deserialize)]
pub struct ResultArtifact {
    #[serde(rename = "_checkpoint")]
    pub checkpoint: Checkpoint,
}

/// Progress pair and per-route records.
#[derive(Debug, Deserialize)]
pub struct Checkpoint {
    /// `[completed_steps, total_steps]`; may be short while a run is live.
    #[serde(default)]
    pub progress: Vec<u64>,
    /// One record per attempted route, in execution order.
    #[serde(default)]
    pub records: Vec<RouteRecord>,
}

/// A single per-route execution record.
///
/// The status vocabulary is open-ended; only the recognized failure
/// statuses are inspected.
#[derive(Debug, Deserialize)]
pub struct RouteRecord {
    #[serde(default)]
    pub status: String,
}

/// Read-only gate deciding whether a job re-enters the runnable set.
#[derive(Debug, Clone)]
pub struct ResultInspector {
    failure_statuses: Vec<String>,
}

impl ResultInspector {
    /// Creates an inspector with the given failure-status vocabulary.
    pub fn new(failure_statuses: Vec<String>) -> Self {
        Self { failure_statuses }
    }

    /// Derives the verdict for the artifact at `path`.
    ///
    /// Never mutates or deletes the artifact.
    pub fn inspect(&self, path: &Path) -> Verdict {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return Verdict::Unreadable,
        };

        let artifact: ResultArtifact = match serde_json::from_str(&raw) {
            Ok(artifact) => artifact,
            Err(_) => return Verdict::Unreadable,
        };

        self.judge(&artifact)
    }

    /// Applies the completion rule to a parsed artifact.
    pub fn judge(&self, artifact: &ResultArtifact) -> Verdict {
        let progress = &artifact.checkpoint.progress;
        if progress.len() < 2 || progress[0] < progress[1] {
            return Verdict::NeedsRetry;
        }

        let failed = artifact
            .checkpoint
            .records
            .iter()
            .any(|record| self.failure_statuses.iter().any(|s| *s == record.status));

        if failed {
            Verdict::NeedsRetry
        } else {
            Verdict::Satisfied
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_FAILURE_STATUSES;

    fn inspector() -> ResultInspector {
        ResultInspector::new(
            DEFAULT_FAILURE_STATUSES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    fn write_artifact(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("res.json");
        std::fs::write(&path, body).expect("write artifact");
        path
    }

    #[test]
    fn test_complete_run_is_satisfied() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_artifact(
            dir.path(),
            r#"{"_checkpoint":{"progress":[1,1],"records":[{"status":"Completed"}]}}"#,
        );

        assert_eq!(inspector().inspect(&path), Verdict::Satisfied);
    }

    #[test]
    fn test_incomplete_progress_needs_retry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_artifact(
            dir.path(),
            r#"{"_checkpoint":{"progress":[0,1],"records":[]}}"#,
        );

        assert_eq!(inspector().inspect(&path), Verdict::NeedsRetry);
    }

    #[test]
    fn test_incomplete_progress_overrides_clean_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_artifact(
            dir.path(),
            r#"{"_checkpoint":{"progress":[2,5],"records":[{"status":"Completed"},{"status":"Completed"}]}}"#,
        );

        assert_eq!(inspector().inspect(&path), Verdict::NeedsRetry);
    }

    #[test]
    fn test_short_progress_pair_needs_retry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_artifact(dir.path(), r#"{"_checkpoint":{"progress":[1],"records":[]}}"#);

        assert_eq!(inspector().inspect(&path), Verdict::NeedsRetry);
    }

    #[test]
    fn test_failure_record_needs_retry() {
        let dir = tempfile::tempdir().expect("tempdir");
        for status in DEFAULT_FAILURE_STATUSES {
            let body = format!(
                r#"{{"_checkpoint":{{"progress":[1,1],"records":[{{"status":"{status}"}}]}}}}"#
            );
            let path = write_artifact(dir.path(), &body);
            assert_eq!(
                inspector().inspect(&path),
                Verdict::NeedsRetry,
                "status {status:?} must trigger a retry"
            );
        }
    }

    #[test]
    fn test_unrecognized_status_is_not_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_artifact(
            dir.path(),
            r#"{"_checkpoint":{"progress":[1,1],"records":[{"status":"Perfect"}]}}"#,
        );

        assert_eq!(inspector().inspect(&path), Verdict::Satisfied);
    }

    #[test]
    fn test_custom_failure_vocabulary() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_artifact(
            dir.path(),
            r#"{"_checkpoint":{"progress":[1,1],"records":[{"status":"Failed - Watchdog"}]}}"#,
        );

        // Default vocabulary does not know this status.
        assert_eq!(inspector().inspect(&path), Verdict::Satisfied);

        let custom = ResultInspector::new(vec!["Failed - Watchdog".to_string()]);
        assert_eq!(custom.inspect(&path), Verdict::NeedsRetry);
    }

    #[test]
    fn test_missing_artifact_is_unreadable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("does_not_exist.json");

        assert_eq!(inspector().inspect(&path), Verdict::Unreadable);
    }

    #[test]
    fn test_malformed_artifact_is_unreadable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_artifact(dir.path(), "{not json");

        assert_eq!(inspector().inspect(&path), Verdict::Unreadable);
    }

    #[test]
    fn test_inspect_does_not_mutate_artifact() {
        let dir = tempfile::tempdir().expect("tempdir");
        let body = r#"{"_checkpoint":{"progress":[1,1],"records":[]}}"#;
        let path = write_artifact(dir.path(), body);

        inspector().inspect(&path);

        let after = std::fs::read_to_string(&path).expect("read back");
        assert_eq!(after, body);
    }
}
