//! Persists verdicts as JSON artifacts.

use faultbench_proto::{Error, Result, Verdict};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Writes one `<problem_id>-<timestamp>.json` file per graded run.
#[derive(Debug, Clone)]
pub struct VerdictStore {
    dir: PathBuf,
}

impl VerdictStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path the verdict is written to.
    pub fn path_for(&self, verdict: &Verdict) -> PathBuf {
        let stamp = verdict.graded_at.format("%Y%m%dT%H%M%S%.3fZ");
        self.dir.join(format!("{}-{stamp}.json", verdict.problem_id))
    }

    /// Writes the verdict. Never overwrites an existing artifact.
    pub fn persist(&self, verdict: &Verdict) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(verdict);
        let json = serde_json::to_string_pretty(verdict)
            .map_err(|e| Error::invariant(format!("verdict is not serializable: {e}")))?;

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;

        info!(problem_id = %verdict.problem_id, path = %path.display(), "Verdict persisted");
        Ok(path)
    }

    /// Reads a persisted verdict back.
    pub fn load(path: &Path) -> Result<Verdict> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| Error::config(format!("{} is not a verdict: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultbench_proto::{OracleName, OracleResult};
    use std::collections::BTreeMap;

    fn verdict() -> Verdict {
        let mut oracles = BTreeMap::new();
        oracles.insert(OracleName::Detection, OracleResult::pass());
        oracles.insert(
            OracleName::Workload,
            OracleResult::fail("Non-2xx or 3xx responses: 12").with_passable(true),
        );
        Verdict::new("ad_service_failure", oracles)
    }

    #[test]
    fn test_persist_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = VerdictStore::new(dir.path().join("results"));
        let verdict = verdict();

        let path = store.persist(&verdict).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("ad_service_failure-"));
        assert!(name.ends_with(".json"));

        let loaded = VerdictStore::load(&path).unwrap();
        assert_eq!(loaded, verdict);
        assert!(loaded.success);
    }

    #[test]
    fn test_artifact_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = VerdictStore::new(dir.path()).persist(&verdict()).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();

        assert_eq!(raw["problem_id"], "ad_service_failure");
        assert_eq!(raw["success"], true);
        assert_eq!(raw["oracles"]["detection"]["success"], true);
        assert_eq!(raw["oracles"]["workload"]["issues"][0], "Non-2xx or 3xx responses: 12");
    }

    #[test]
    fn test_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = VerdictStore::new(dir.path());
        let verdict = verdict();
        store.persist(&verdict).unwrap();
        let err = store.persist(&verdict).unwrap_err();
        assert_eq!(err.class(), "IoError");
    }
}
