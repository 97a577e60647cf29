//! Localization oracle: did the agent name the faulty resources?

use crate::answer::json_type;
use crate::oracle::EvaluationContext;
use faultbench_proto::{OracleName, OracleResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Compares expected root-cause identifiers against the agent's claim.
///
/// - string vs string: exact match
/// - list vs list: every expected entry must appear in the claim
/// - anything else: type mismatch, never a guess
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalizationOracle {
    pub expected: Value,
}

impl LocalizationOracle {
    pub fn new(expected: impl Into<Value>) -> Self {
        Self {
            expected: expected.into(),
        }
    }

    pub(crate) fn evaluate(&self, ctx: &EvaluationContext<'_>) -> OracleResult {
        let Some(reality) = ctx.answer.get(OracleName::Localization) else {
            return OracleResult::fail("no localization answer submitted");
        };
        compare_truth(&self.expected, reality)
    }
}

/// Applies the localization comparison rules to one expectation/claim pair.
pub fn compare_truth(expected: &Value, reality: &Value) -> OracleResult {
    match (expected, reality) {
        (Value::String(e), Value::String(r)) => {
            if e == r {
                OracleResult::pass()
            } else {
                OracleResult::fail(format!("expected root cause `{e}`, got `{r}`"))
            }
        }
        (Value::Array(e), Value::Array(r)) => {
            let (Some(expected), Some(claimed)) = (string_items(e), string_items(r)) else {
                return OracleResult::fail(
                    "cannot compare localization lists containing non-string entries",
                );
            };
            let mut result = OracleResult::pass();
            for item in expected.iter().filter(|item| !claimed.contains(*item)) {
                result.flag(format!("missing root cause `{item}`"));
            }
            result
        }
        (e, r) => OracleResult::fail(format!(
            "cannot compare {} expectation with {} answer: {r}",
            json_type(e),
            json_type(r)
        )),
    }
}

fn string_items(values: &[Value]) -> Option<Vec<&str>> {
    values.iter().map(Value::as_str).collect()
}
