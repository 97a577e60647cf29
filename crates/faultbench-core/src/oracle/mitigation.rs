//! Mitigation oracle: is the cluster healthy again after the agent acted?

use crate::oracle::EvaluationContext;
use faultbench_proto::{OracleResult, Result};
use serde::{Deserialize, Serialize};

/// A pod selector that must be fully ready for the fault to count as mitigated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessCheck {
    pub selector: String,
    /// Defaults to the problem's namespace.
    #[serde(default)]
    pub namespace: Option<String>,
}

impl ReadinessCheck {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            namespace: None,
        }
    }
}

/// Checks post-submission cluster state against whether mitigation is
/// achievable at all.
///
/// With `expected = false` the fault cannot be fixed by agent action; the
/// oracle passes unless the agent claims it mitigated anyway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MitigationOracle {
    pub expected: bool,
    #[serde(default)]
    pub checks: Vec<ReadinessCheck>,
}

impl MitigationOracle {
    pub fn achievable(checks: Vec<ReadinessCheck>) -> Self {
        Self {
            expected: true,
            checks,
        }
    }

    pub fn unmitigable() -> Self {
        Self {
            expected: false,
            checks: Vec::new(),
        }
    }

    pub(crate) async fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<OracleResult> {
        if !self.expected {
            return Ok(if ctx.answer.claims_mitigation() {
                OracleResult::fail(
                    "agent claims mitigation, but this fault cannot be mitigated by agent action",
                )
            } else {
                OracleResult::pass()
            });
        }

        if self.checks.is_empty() {
            return Ok(OracleResult::fail("mitigation oracle has no readiness checks"));
        }

        let mut result = OracleResult::pass();
        for check in &self.checks {
            let namespace = check.namespace.as_deref().unwrap_or(ctx.namespace);
            let readiness = ctx.cluster.readiness(namespace, &check.selector).await?;
            if !readiness.is_ready() {
                result.flag(format!("{namespace}/{}: {readiness}", check.selector));
            }
        }
        Ok(result)
    }
}
