//! Fault descriptors and fault status.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Category of an injected fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Toggled through a feature flag served by the application.
    FeatureFlag,
    /// A workload spec or config value is wrong.
    Misconfiguration,
    /// Pods cannot be placed (taints, affinity, tolerations).
    Scheduling,
    /// Network partition, delay or loss.
    Network,
    /// CPU, memory or disk pressure.
    Resource,
    /// Invalid pod security context.
    SecurityContext,
}

impl FaultKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FaultKind::FeatureFlag => "feature_flag",
            FaultKind::Misconfiguration => "misconfiguration",
            FaultKind::Scheduling => "scheduling",
            FaultKind::Network => "network",
            FaultKind::Resource => "resource",
            FaultKind::SecurityContext => "security_context",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to inject and where. Immutable once a problem is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultDescriptor {
    /// Fault name as the backend knows it (e.g. a flag key).
    pub name: String,

    pub kind: FaultKind,

    /// Target workload names.
    pub targets: Vec<String>,

    /// Backend-specific parameters.
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

impl FaultDescriptor {
    pub fn new(name: impl Into<String>, kind: FaultKind) -> Self {
        Self {
            name: name.into(),
            kind,
            targets: Vec::new(),
            params: BTreeMap::new(),
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.targets.push(target.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Returns a string parameter, if present and a string.
    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }
}

/// Observed state of a fault on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultStatus {
    On,
    Off,
    Unknown,
}

impl FaultStatus {
    /// Parses a backend status string. Anything other than `on`/`off` is unknown.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "on" | "true" | "enabled" => FaultStatus::On,
            "off" | "false" | "disabled" => FaultStatus::Off,
            _ => FaultStatus::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FaultStatus::On => "on",
            FaultStatus::Off => "off",
            FaultStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FaultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_builder() {
        let fault = FaultDescriptor::new("fault-1-async-message-order", FaultKind::FeatureFlag)
            .target("ts-cancel-service")
            .param("delay_ms", 8000);

        assert_eq!(fault.targets, vec!["ts-cancel-service"]);
        assert_eq!(fault.params["delay_ms"], serde_json::json!(8000));
        assert_eq!(fault.str_param("delay_ms"), None);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(FaultStatus::parse("on"), FaultStatus::On);
        assert_eq!(FaultStatus::parse(" OFF\n"), FaultStatus::Off);
        assert_eq!(FaultStatus::parse("partial"), FaultStatus::Unknown);
    }

    #[test]
    fn test_descriptor_from_yaml_shape() {
        let json = r#"{
            "name": "taint",
            "kind": "scheduling",
            "targets": ["frontend"],
            "params": {"node": "worker1"}
        }"#;
        let fault: FaultDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(fault.kind, FaultKind::Scheduling);
        assert_eq!(fault.str_param("node"), Some("worker1"));
    }
}
