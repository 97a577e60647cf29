//! Parsing of free-text agent submissions.
//!
//! Agents submit answers as `submit({...})`, optionally wrapped in a
//! markdown code fence. The payload is a JSON object keyed by oracle name.

use faultbench_proto::{Error, OracleName, Result};
use serde_json::{Map, Value};

/// An agent's parsed submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    fields: Map<String, Value>,
}

impl Answer {
    /// Parses a raw submission line. `marker` is the submission prefix,
    /// e.g. `submit(`.
    pub fn parse(raw: &str, marker: &str) -> Result<Self> {
        let text = strip_code_fences(raw);
        let text = strip_marker(text, marker);
        let text = strip_code_fences(text);

        let value: Value = serde_json::from_str(text).map_err(|e| {
            Error::invariant(format!(
                "malformed submission ({e}); expected a JSON object such as {}",
                r#"{"detection": "Yes"}"#
            ))
        })?;
        Self::from_value(value)
    }

    /// Builds an answer from an already-decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(Error::invariant(format!(
                "malformed submission: expected a JSON object, got {}",
                json_type(&other)
            ))),
        }
    }

    /// Returns the agent's answer for one oracle slot.
    pub fn get(&self, name: OracleName) -> Option<&Value> {
        self.fields.get(name.as_str())
    }

    /// True if the agent states it has mitigated the fault.
    pub fn claims_mitigation(&self) -> bool {
        match self.get(OracleName::Mitigation) {
            Some(Value::Bool(claimed)) => *claimed,
            Some(Value::String(s)) => {
                matches!(s.trim().to_ascii_lowercase().as_str(), "yes" | "true" | "mitigated")
            }
            _ => false,
        }
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

/// Name of a JSON value's type, for issue messages.
pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    // Drop a language tag on the opening fence line.
    match inner.split_once('\n') {
        Some((first, rest)) if is_fence_tag(first) => rest.trim(),
        _ => inner.trim(),
    }
}

fn is_fence_tag(line: &str) -> bool {
    matches!(
        line.trim().to_ascii_lowercase().as_str(),
        "json" | "js" | "javascript" | ""
    )
}

fn strip_marker<'a>(text: &'a str, marker: &str) -> &'a str {
    let Some(rest) = text.strip_prefix(marker) else {
        return text;
    };
    if marker.ends_with('(') {
        rest.trim_end().strip_suffix(')').unwrap_or(rest).trim()
    } else {
        rest.trim()
    }
}
