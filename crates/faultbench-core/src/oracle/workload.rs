//! Workload oracle: does the application still serve traffic?

use crate::oracle::EvaluationContext;
use faultbench_proto::{Error, OracleResult, Result};
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

fn default_true() -> bool {
    true
}

fn default_anomaly_patterns() -> Vec<String> {
    vec![r"Non-2xx or 3xx responses:".to_string()]
}

fn default_required_markers() -> Vec<String> {
    vec!["Requests/sec:".to_string(), "Transfer/sec:".to_string()]
}

/// Runs the load generator and classifies its report.
///
/// Any line matching an anomaly pattern fails the oracle and is kept
/// verbatim as an issue. Passable by default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadOracle {
    #[serde(default = "default_true")]
    pub passable: bool,
    #[serde(default = "default_anomaly_patterns")]
    pub anomaly_patterns: Vec<String>,
    #[serde(default = "default_required_markers")]
    pub required_markers: Vec<String>,
}

impl Default for WorkloadOracle {
    fn default() -> Self {
        Self {
            passable: true,
            anomaly_patterns: default_anomaly_patterns(),
            required_markers: default_required_markers(),
        }
    }
}

impl WorkloadOracle {
    pub fn strict(mut self) -> Self {
        self.passable = false;
        self
    }

    pub(crate) async fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<OracleResult> {
        let generator = ctx
            .workload
            .ok_or_else(|| Error::config("workload oracle requires a workload generator"))?;

        let report = match generator.run(ctx.app).await {
            Ok(report) => report,
            Err(e) => return Ok(OracleResult::fail(format!("Workload Generator Error: {e}"))),
        };
        debug!(app = ctx.app.name(), bytes = report.len(), "Workload report received");
        self.classify(&report)
    }

    /// Classifies a generator report.
    pub fn classify(&self, report: &str) -> Result<OracleResult> {
        let anomalies = RegexSet::new(&self.anomaly_patterns)
            .map_err(|e| Error::config(format!("invalid workload anomaly pattern: {e}")))?;

        let mut result = OracleResult::pass();
        for marker in &self.required_markers {
            if !report.contains(marker.as_str()) {
                result.flag(format!("workload report missing `{marker}`"));
            }
        }
        for line in report.lines().filter(|line| anomalies.is_match(line)) {
            result.flag(line);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEALTHY: &str = "Running 10s test @ http://10.0.0.1:8080\n\
        Requests/sec:     10.02\n\
        Transfer/sec:      3.21KB\n";

    #[test]
    fn test_healthy_report() {
        let result = WorkloadOracle::default().classify(HEALTHY).unwrap();
        assert!(result.success);
        assert!(result.issues.is_empty());
    }

    #[test]
    fn test_anomaly_line_captured_verbatim() {
        let report = format!("{HEALTHY}  Non-2xx or 3xx responses: 42 \r\n");
        let result = WorkloadOracle::default().classify(&report).unwrap();
        assert!(!result.success);
        assert_eq!(result.issues, vec!["  Non-2xx or 3xx responses: 42 "]);
    }

    #[test]
    fn test_missing_throughput_lines() {
        let result = WorkloadOracle::default().classify("connection refused").unwrap();
        assert!(!result.success);
        assert_eq!(result.issues.len(), 2);
    }

    #[test]
    fn test_invalid_pattern_is_configuration_error() {
        let oracle = WorkloadOracle {
            anomaly_patterns: vec!["(".to_string()],
            ..WorkloadOracle::default()
        };
        let err = oracle.classify(HEALTHY).unwrap_err();
        assert_eq!(err.class(), "ConfigurationError");
    }
}
