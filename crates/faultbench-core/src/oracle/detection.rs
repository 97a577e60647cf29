//! Detection oracle: did the agent notice that something is wrong?

use crate::answer::json_type;
use crate::oracle::EvaluationContext;
use faultbench_proto::{OracleName, OracleResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Compares the expected detection answer against the agent's.
///
/// Comparison is plain JSON equality. Case folding only happens when
/// `ignore_case` is set and both sides are strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionOracle {
    pub expected: Value,
    #[serde(default)]
    pub ignore_case: bool,
}

impl DetectionOracle {
    pub fn new(expected: impl Into<Value>) -> Self {
        Self {
            expected: expected.into(),
            ignore_case: false,
        }
    }

    pub fn ignore_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }

    pub(crate) fn evaluate(&self, ctx: &EvaluationContext<'_>) -> OracleResult {
        let Some(reality) = ctx.answer.get(OracleName::Detection) else {
            return OracleResult::fail("no detection answer submitted");
        };

        if self.matches(reality) {
            OracleResult::pass()
        } else {
            OracleResult::fail(format!(
                "detection mismatch: expected {} ({}), got {} ({})",
                self.expected,
                json_type(&self.expected),
                reality,
                json_type(reality)
            ))
        }
    }

    fn matches(&self, reality: &Value) -> bool {
        match (&self.expected, reality) {
            (Value::String(expected), Value::String(actual)) if self.ignore_case => {
                expected.trim().eq_ignore_ascii_case(actual.trim())
            }
            (expected, actual) => expected == actual,
        }
    }
}
