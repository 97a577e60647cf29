//! Oracle results and the persisted verdict.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Named oracle slot of a problem. Ordering follows grading order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleName {
    Detection,
    Localization,
    Mitigation,
    Workload,
}

impl OracleName {
    pub const ALL: [OracleName; 4] = [
        OracleName::Detection,
        OracleName::Localization,
        OracleName::Mitigation,
        OracleName::Workload,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OracleName::Detection => "detection",
            OracleName::Localization => "localization",
            OracleName::Mitigation => "mitigation",
            OracleName::Workload => "workload",
        }
    }
}

impl fmt::Display for OracleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single oracle evaluation.
///
/// `issues` only ever grows during an evaluation. A `passable` result still
/// reports its issues but never vetoes the aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleResult {
    pub success: bool,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub passable: bool,
}

impl OracleResult {
    /// A successful result with no issues.
    pub fn pass() -> Self {
        Self {
            success: true,
            issues: Vec::new(),
            passable: false,
        }
    }

    /// A failed result carrying one issue.
    pub fn fail(issue: impl Into<String>) -> Self {
        Self {
            success: false,
            issues: vec![issue.into()],
            passable: false,
        }
    }

    pub fn with_passable(mut self, passable: bool) -> Self {
        self.passable = passable;
        self
    }

    /// Records an issue and marks the result failed.
    pub fn flag(&mut self, issue: impl Into<String>) {
        self.success = false;
        self.issues.push(issue.into());
    }

    /// Records an informational issue without changing `success`.
    pub fn note(&mut self, issue: impl Into<String>) {
        self.issues.push(issue.into());
    }

    /// Returns true if this result blocks the aggregate.
    pub fn vetoes(&self) -> bool {
        !self.success && !self.passable
    }

    /// Combination rule: AND over every non-passable result.
    pub fn all_pass<'a>(results: impl IntoIterator<Item = &'a OracleResult>) -> bool {
        results.into_iter().all(|r| !r.vetoes())
    }
}

/// Final grading record of one submission. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub problem_id: String,
    pub graded_at: DateTime<Utc>,
    pub success: bool,
    pub oracles: BTreeMap<OracleName, OracleResult>,
}

impl Verdict {
    /// Builds a verdict and computes the aggregate flag.
    pub fn new(problem_id: impl Into<String>, oracles: BTreeMap<OracleName, OracleResult>) -> Self {
        let success = OracleResult::all_pass(oracles.values());
        Self {
            problem_id: problem_id.into(),
            graded_at: Utc::now(),
            success,
            oracles,
        }
    }

    pub fn get(&self, name: OracleName) -> Option<&OracleResult> {
        self.oracles.get(&name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passable_failure_does_not_veto() {
        let hard = OracleResult::pass();
        let soft = OracleResult::fail("Non-2xx or 3xx responses: 12").with_passable(true);
        assert!(OracleResult::all_pass([&hard, &soft]));
    }

    #[test]
    fn test_hard_failure_vetoes() {
        let hard = OracleResult::fail("wrong service");
        let soft = OracleResult::pass().with_passable(true);
        assert!(!OracleResult::all_pass([&hard, &soft]));
    }

    #[test]
    fn test_issues_accumulate() {
        let mut result = OracleResult::pass();
        result.note("observed 3 replicas");
        result.flag("pod frontend-1 not ready");
        assert!(!result.success);
        assert_eq!(result.issues.len(), 2);
    }

    #[test]
    fn test_verdict_serializes_as_name_map() {
        let mut oracles = BTreeMap::new();
        oracles.insert(OracleName::Localization, OracleResult::pass());
        oracles.insert(OracleName::Detection, OracleResult::pass());
        let verdict = Verdict::new("taint-no-toleration", oracles);

        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["success"], serde_json::json!(true));
        assert_eq!(json["oracles"]["detection"]["success"], serde_json::json!(true));
        assert!(json["oracles"]["localization"]["issues"].as_array().unwrap().is_empty());
    }
}
