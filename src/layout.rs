//! Output tree layout for evaluation artifacts.
//!
//! Each job owns a deterministic triple of (result file, stdout log,
//! stderr log) plus a visualization scratch directory, namespaced by
//! agent, benchmark, seed and zero-padded route id:
//!
//! ```text
//! <out_root>/<agent>/<benchmark>/<seed>/
//!     res/<route_id>_res.json
//!     out/<route_id>_out.log
//!     err/<route_id>_err.log
//!     viz/<route_id>/
//! ```

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::EvalConfig;

/// Deterministic path scheme for one agent/benchmark combination.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    out_root: PathBuf,
    agent: String,
    benchmark: String,
    pad_width: usize,
}

impl ArtifactLayout {
    /// Builds the layout for a configuration.
    pub fn from_config(config: &EvalConfig) -> Self {
        Self {
            out_root: config.out_root.clone(),
            agent: config.agent.clone(),
            benchmark: config.benchmark.clone(),
            pad_width: config.route_id_width(),
        }
    }

    /// Base directory for one seed.
    pub fn seed_dir(&self, seed: u32) -> PathBuf {
        self.out_root
            .join(&self.agent)
            .join(&self.benchmark)
            .join(seed.to_string())
    }

    /// Creates the per-seed subdirectories (`run`, `res`, `out`, `err`).
    pub fn ensure_seed_dirs(&self, seed: u32) -> std::io::Result<()> {
        let base = self.seed_dir(seed);
        for sub in ["run", "res", "out", "err"] {
            std::fs::create_dir_all(base.join(sub))?;
        }
        Ok(())
    }

    /// Zero-pads a raw route identifier to the benchmark's width.
    pub fn pad_route_id(&self, raw: &str) -> String {
        format!("{:0>width$}", raw, width = self.pad_width)
    }

    /// Result artifact path written by the external evaluator.
    pub fn result_file(&self, seed: u32, route_id: &str) -> PathBuf {
        self.seed_dir(seed)
            .join("res")
            .join(format!("{route_id}_res.json"))
    }

    /// Stdout log path for a job.
    pub fn stdout_log(&self, seed: u32, route_id: &str) -> PathBuf {
        self.seed_dir(seed)
            .join("out")
            .join(format!("{route_id}_out.log"))
    }

    /// Stderr log path for a job.
    pub fn stderr_log(&self, seed: u32, route_id: &str) -> PathBuf {
        self.seed_dir(seed)
            .join("err")
            .join(format!("{route_id}_err.log"))
    }

    /// Visualization scratch directory for a job.
    ///
    /// The supervisor clears and recreates this directory before every
    /// attempt.
    pub fn viz_dir(&self, seed: u32, route_id: &str) -> PathBuf {
        self.seed_dir(seed).join("viz").join(route_id)
    }
}

/// Extracts the raw route identifier from a route file name.
///
/// Route files are named like `route_training_12.xml`; the identifier is
/// the last `_`-separated token of the stem.
pub fn route_id_from_file(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let raw = stem.rsplit('_').next()?;
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

/// Enumerates the benchmark route XML files under `route_dir`.
///
/// Entries are sorted by file name so the queue order is reproducible
/// across runs.
pub fn discover_routes(route_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut routes = Vec::new();
    for entry in WalkDir::new(route_dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            e.into_io_error()
                .unwrap_or_else(|| std::io::Error::other("route directory walk failed"))
        })?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("xml") {
            routes.push(path.to_path_buf());
        }
    }
    routes.sort();
    Ok(routes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> ArtifactLayout {
        let mut config = EvalConfig::default();
        config.out_root = PathBuf::from("/results");
        config.agent = "simlingo".to_string();
        config.benchmark = "bench2drive".to_string();
        ArtifactLayout::from_config(&config)
    }

    #[test]
    fn test_artifact_triple_paths() {
        let layout = layout();

        assert_eq!(
            layout.result_file(1, "012"),
            PathBuf::from("/results/simlingo/bench2drive/1/res/012_res.json")
        );
        assert_eq!(
            layout.stdout_log(1, "012"),
            PathBuf::from("/results/simlingo/bench2drive/1/out/012_out.log")
        );
        assert_eq!(
            layout.stderr_log(1, "012"),
            PathBuf::from("/results/simlingo/bench2drive/1/err/012_err.log")
        );
        assert_eq!(
            layout.viz_dir(1, "012"),
            PathBuf::from("/results/simlingo/bench2drive/1/viz/012")
        );
    }

    #[test]
    fn test_pad_route_id() {
        let layout = layout();
        assert_eq!(layout.pad_route_id("7"), "007");
        assert_eq!(layout.pad_route_id("42"), "042");
        assert_eq!(layout.pad_route_id("123"), "123");
        assert_eq!(layout.pad_route_id("1234"), "1234");
    }

    #[test]
    fn test_route_id_from_file() {
        assert_eq!(
            route_id_from_file(Path::new("/data/route_training_12.xml")),
            Some("12".to_string())
        );
        assert_eq!(
            route_id_from_file(Path::new("routes_5.xml")),
            Some("5".to_string())
        );
        // No underscore: the whole stem is the id.
        assert_eq!(
            route_id_from_file(Path::new("17.xml")),
            Some("17".to_string())
        );
    }

    #[test]
    fn test_ensure_seed_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = EvalConfig::default();
        config.out_root = dir.path().to_path_buf();
        let layout = ArtifactLayout::from_config(&config);

        layout.ensure_seed_dirs(3).expect("create dirs");

        for sub in ["run", "res", "out", "err"] {
            assert!(layout.seed_dir(3).join(sub).is_dir());
        }
    }

    #[test]
    fn test_discover_routes_sorted_xml_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("route_2.xml"), "<r/>").unwrap();
        std::fs::write(dir.path().join("route_1.xml"), "<r/>").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let routes = discover_routes(dir.path()).expect("discover");
        let names: Vec<_> = routes
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();

        assert_eq!(names, vec!["route_1.xml", "route_2.xml"]);
    }
}
