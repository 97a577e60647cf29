//! Oracle framework.
//!
//! Oracles are a closed set of tagged variants. Every variant compares an
//! expectation with what the agent claimed or what the cluster shows, and
//! produces an [`OracleResult`]. A failing or panicking oracle yields a
//! failed result instead of aborting the rest of the grading.

mod compound;
mod detection;
mod localization;
mod mitigation;
mod workload;

pub use compound::CompoundOracle;
pub use detection::DetectionOracle;
pub use localization::{LocalizationOracle, compare_truth};
pub use mitigation::{MitigationOracle, ReadinessCheck};
pub use workload::WorkloadOracle;

use crate::answer::Answer;
use faultbench_proto::{Application, ClusterControl, OracleResult, Result, WorkloadGenerator};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use tracing::{debug, warn};

/// Read-only view of a problem handed to oracles during grading.
pub struct EvaluationContext<'a> {
    pub problem_id: &'a str,
    pub namespace: &'a str,
    pub answer: &'a Answer,
    pub app: &'a dyn Application,
    pub cluster: &'a dyn ClusterControl,
    pub workload: Option<&'a dyn WorkloadGenerator>,
}

/// A grader, dispatched on its `kind` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Oracle {
    Detection(DetectionOracle),
    Localization(LocalizationOracle),
    Mitigation(MitigationOracle),
    Workload(WorkloadOracle),
    Compound(CompoundOracle),
}

impl Oracle {
    pub fn kind(&self) -> &'static str {
        match self {
            Oracle::Detection(_) => "detection",
            Oracle::Localization(_) => "localization",
            Oracle::Mitigation(_) => "mitigation",
            Oracle::Workload(_) => "workload",
            Oracle::Compound(_) => "compound",
        }
    }

    /// Whether this oracle's failure is reported without failing the grade.
    pub fn passable(&self) -> bool {
        match self {
            Oracle::Workload(o) => o.passable,
            Oracle::Compound(o) => o.passable,
            Oracle::Detection(_) | Oracle::Localization(_) | Oracle::Mitigation(_) => false,
        }
    }

    /// Evaluates the oracle. Errors and panics become failed results.
    pub fn evaluate<'a>(&'a self, ctx: &'a EvaluationContext<'_>) -> BoxFuture<'a, OracleResult> {
        async move {
            let kind = self.kind();
            let outcome = AssertUnwindSafe(self.evaluate_inner(ctx)).catch_unwind().await;
            let mut result = match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    warn!(
                        problem_id = ctx.problem_id,
                        oracle = kind,
                        error = %e,
                        "Oracle evaluation failed"
                    );
                    OracleResult::fail(format!("{kind} oracle error ({}): {e}", e.class()))
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(problem_id = ctx.problem_id, oracle = kind, %message, "Oracle panicked");
                    OracleResult::fail(format!("{kind} oracle panicked: {message}"))
                }
            };
            result.passable = self.passable();
            debug!(
                problem_id = ctx.problem_id,
                oracle = kind,
                success = result.success,
                issues = result.issues.len(),
                "Oracle evaluated"
            );
            result
        }
        .boxed()
    }

    async fn evaluate_inner(&self, ctx: &EvaluationContext<'_>) -> Result<OracleResult> {
        match self {
            Oracle::Detection(o) => Ok(o.evaluate(ctx)),
            Oracle::Localization(o) => Ok(o.evaluate(ctx)),
            Oracle::Mitigation(o) => o.evaluate(ctx).await,
            Oracle::Workload(o) => o.evaluate(ctx).await,
            Oracle::Compound(o) => Ok(o.evaluate(ctx).await),
        }
    }
}

impl From<DetectionOracle> for Oracle {
    fn from(o: DetectionOracle) -> Self {
        Oracle::Detection(o)
    }
}

impl From<LocalizationOracle> for Oracle {
    fn from(o: LocalizationOracle) -> Self {
        Oracle::Localization(o)
    }
}

impl From<MitigationOracle> for Oracle {
    fn from(o: MitigationOracle) -> Self {
        Oracle::Mitigation(o)
    }
}

impl From<WorkloadOracle> for Oracle {
    fn from(o: WorkloadOracle) -> Self {
        Oracle::Workload(o)
    }
}

impl From<CompoundOracle> for Oracle {
    fn from(o: CompoundOracle) -> Self {
        Oracle::Compound(o)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
