//! Compound oracle: grades several oracles as one slot.

use crate::oracle::{EvaluationContext, Oracle};
use faultbench_proto::OracleResult;
use serde::{Deserialize, Serialize};

/// Runs every child and ANDs the non-passable ones.
///
/// Children never short-circuit; passable children contribute issues to
/// the report but not to `success`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundOracle {
    pub children: Vec<Oracle>,
    #[serde(default)]
    pub passable: bool,
}

impl CompoundOracle {
    pub fn new(children: Vec<Oracle>) -> Self {
        Self {
            children,
            passable: false,
        }
    }

    pub(crate) async fn evaluate(&self, ctx: &EvaluationContext<'_>) -> OracleResult {
        let mut results = Vec::with_capacity(self.children.len());
        for child in &self.children {
            results.push((child.kind(), child.evaluate(ctx).await));
        }

        let mut combined = OracleResult::pass();
        combined.success = OracleResult::all_pass(results.iter().map(|(_, r)| r));
        for (kind, result) in results {
            for issue in result.issues {
                combined.note(format!("[{kind}] {issue}"));
            }
        }
        combined
    }
}
