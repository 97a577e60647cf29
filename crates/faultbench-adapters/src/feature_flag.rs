//! Feature-flag fault backend.
//!
//! Faults are flags in a flagd-style flag document stored under one key of a
//! ConfigMap. Turning a fault on sets the flag's `defaultVariant` to `on`,
//! then the flag daemon is restarted so it reloads the document.

use crate::command_executor::shell_quote;
use crate::kubectl::KubectlCluster;
use async_trait::async_trait;
use faultbench_core::{FeatureFlagConfig, Progress, wait_until};
use faultbench_proto::{Error, FaultDescriptor, FaultInjector, FaultStatus, HealthReport, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Serialization of the flag document inside the ConfigMap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagFormat {
    Json,
    Yaml,
}

impl FlagFormat {
    /// `.json` keys hold JSON; anything else is treated as YAML.
    pub fn for_key(key: &str) -> Self {
        if key.ends_with(".json") { FlagFormat::Json } else { FlagFormat::Yaml }
    }
}

/// A parsed flag document: `{ "flags": { <name>: { "defaultVariant": ..., ... } } }`.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagDocument {
    root: Value,
    format: FlagFormat,
}

impl FlagDocument {
    pub fn parse(raw: &str, format: FlagFormat) -> Result<Self> {
        let invalid =
            |e: &dyn std::fmt::Display| Error::config(format!("invalid flag document: {e}"));
        let root: Value = match format {
            FlagFormat::Json => serde_json::from_str(raw).map_err(|e| invalid(&e))?,
            FlagFormat::Yaml => serde_yaml::from_str(raw).map_err(|e| invalid(&e))?,
        };
        if !root.get("flags").is_some_and(Value::is_object) {
            return Err(Error::config("flag document has no `flags` map"));
        }
        Ok(Self { root, format })
    }

    fn flags(&self) -> Option<&serde_json::Map<String, Value>> {
        self.root.get("flags").and_then(Value::as_object)
    }

    /// Flag names in document order.
    pub fn flag_names(&self) -> Vec<String> {
        self.flags().map(|flags| flags.keys().cloned().collect()).unwrap_or_default()
    }

    /// The flag's `defaultVariant`, or `None` when the flag is absent.
    pub fn variant(&self, flag: &str) -> Option<&str> {
        self.flags()?.get(flag)?.get("defaultVariant").and_then(Value::as_str)
    }

    pub fn status(&self, flag: &str) -> FaultStatus {
        self.variant(flag).map_or(FaultStatus::Unknown, FaultStatus::parse)
    }

    /// Sets the flag's `defaultVariant`. Returns whether anything changed.
    pub fn set_variant(&mut self, flag: &str, variant: &str) -> Result<bool> {
        let entry = self
            .root
            .get_mut("flags")
            .and_then(Value::as_object_mut)
            .and_then(|flags| flags.get_mut(flag))
            .and_then(Value::as_object_mut)
            .ok_or_else(|| Error::config(format!("flag '{flag}' not found in flag document")))?;

        if entry.get("defaultVariant").and_then(Value::as_str) == Some(variant) {
            return Ok(false);
        }
        entry.insert("defaultVariant".to_string(), Value::String(variant.to_string()));
        Ok(true)
    }

    pub fn render(&self) -> Result<String> {
        match self.format {
            FlagFormat::Json => serde_json::to_string_pretty(&self.root)
                .map_err(|e| Error::config(format!("cannot render flag document: {e}"))),
            FlagFormat::Yaml => serde_yaml::to_string(&self.root)
                .map_err(|e| Error::config(format!("cannot render flag document: {e}"))),
        }
    }
}

/// Drops server-populated metadata so the manifest can be re-applied.
pub fn strip_server_fields(configmap: &mut Value) {
    if let Some(metadata) = configmap.get_mut("metadata").and_then(Value::as_object_mut) {
        let server_fields =
            ["resourceVersion", "uid", "creationTimestamp", "managedFields", "generation"];
        for field in server_fields {
            metadata.remove(field);
        }
        if let Some(annotations) = metadata.get_mut("annotations").and_then(Value::as_object_mut) {
            annotations.remove("kubectl.kubernetes.io/last-applied-configuration");
        }
    }
}

/// [`FaultInjector`] driving a flagd ConfigMap in one namespace.
pub struct FeatureFlagInjector {
    cluster: Arc<KubectlCluster>,
    namespace: String,
    config: FeatureFlagConfig,
}

impl FeatureFlagInjector {
    pub fn new(
        cluster: Arc<KubectlCluster>,
        namespace: impl Into<String>,
        config: FeatureFlagConfig,
    ) -> Self {
        Self {
            cluster,
            namespace: namespace.into(),
            config,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The flag key a fault maps to: the `flag` parameter, else the fault name.
    pub fn flag_for(fault: &FaultDescriptor) -> &str {
        fault.str_param("flag").unwrap_or(&fault.name)
    }

    async fn configmap(&self) -> Result<Value> {
        let resource = format!("configmap {}", shell_quote(&self.config.configmap));
        self.cluster.get_json(&resource, &self.namespace).await
    }

    fn document_in(&self, configmap: &Value) -> Result<FlagDocument> {
        let raw = configmap
            .get("data")
            .and_then(|data| data.get(&self.config.flags_key))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::config(format!(
                    "configmap '{}' has no data key '{}'",
                    self.config.configmap, self.config.flags_key
                ))
            })?;
        FlagDocument::parse(raw, FlagFormat::for_key(&self.config.flags_key))
    }

    /// Reads the current flag document.
    pub async fn document(&self) -> Result<FlagDocument> {
        let configmap = self.configmap().await?;
        self.document_in(&configmap)
    }

    /// Every flag the document defines.
    pub async fn list_faults(&self) -> Result<Vec<String>> {
        Ok(self.document().await?.flag_names())
    }

    async fn flag_status(&self, flag: &str) -> Result<FaultStatus> {
        let configmap = self.configmap().await?;
        match self.document_in(&configmap) {
            Ok(doc) => Ok(doc.status(flag)),
            Err(Error::Configuration(reason)) => {
                debug!(flag, %reason, "Flag document unreadable, status unknown");
                Ok(FaultStatus::Unknown)
            }
            Err(e) => Err(e),
        }
    }

    async fn set_state(&self, fault: &FaultDescriptor, desired: FaultStatus) -> Result<()> {
        let flag = Self::flag_for(fault);
        let mut configmap = self.configmap().await?;
        let mut doc = self.document_in(&configmap)?;

        match doc.status(flag) {
            FaultStatus::Unknown if doc.variant(flag).is_none() && desired == FaultStatus::Off => {
                warn!(flag, namespace = %self.namespace, "Flag not present, nothing to recover");
                return Ok(());
            }
            current if current == desired => {
                debug!(flag, state = %desired, "Flag already in requested state");
                return Ok(());
            }
            _ => {}
        }

        doc.set_variant(flag, desired.as_str())?;
        configmap["data"][self.config.flags_key.as_str()] = Value::String(doc.render()?);
        strip_server_fields(&mut configmap);
        let manifest = serde_json::to_string(&configmap)
            .map_err(|e| Error::config(format!("cannot render configmap: {e}")))?;

        self.cluster.apply(&manifest).await?;
        self.cluster
            .restart_deployment(&self.namespace, &self.config.deployment)
            .await?;

        let target = format!("flag {flag} in {}", self.namespace);
        wait_until(self.cluster.policy(), &target, move || async move {
            let observed = self.flag_status(flag).await?;
            Ok(if observed == desired {
                Progress::Ready(())
            } else {
                Progress::Pending(format!("flag is {observed}"))
            })
        })
        .await?;

        info!(flag, namespace = %self.namespace, state = %desired, "Flag applied");
        Ok(())
    }
}

#[async_trait]
impl FaultInjector for FeatureFlagInjector {
    fn backend(&self) -> &str {
        "feature_flag"
    }

    async fn inject(&self, fault: &FaultDescriptor) -> Result<()> {
        self.set_state(fault, FaultStatus::On).await
    }

    async fn recover(&self, fault: &FaultDescriptor) -> Result<()> {
        self.set_state(fault, FaultStatus::Off).await
    }

    async fn status(&self, fault: &FaultDescriptor) -> Result<FaultStatus> {
        self.flag_status(Self::flag_for(fault)).await
    }

    async fn health_check(&self) -> HealthReport {
        let ns = shell_quote(&self.namespace);
        let mut report = HealthReport::new();

        let configmap = self
            .cluster
            .kubectl(&format!("get configmap {} -n {ns}", shell_quote(&self.config.configmap)))
            .await;
        report.insert("configmap_exists".to_string(), configmap.is_ok());

        let deployment = self
            .cluster
            .kubectl(&format!("get deployment {} -n {ns}", shell_quote(&self.config.deployment)))
            .await;
        report.insert("flagd_running".to_string(), deployment.is_ok());

        let loaded = self.list_faults().await.is_ok_and(|flags| !flags.is_empty());
        report.insert("flags_loaded".to_string(), loaded);

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultbench_proto::FaultKind;
    use serde_json::json;

    const FLAGS_JSON: &str = r#"{
  "$schema": "https://flagd.dev/schema/v0/flags.json",
  "flags": {
    "paymentServiceFailure": {
      "state": "ENABLED",
      "variants": {"on": true, "off": false},
      "defaultVariant": "off"
    },
    "adServiceHighCpu": {
      "state": "ENABLED",
      "variants": {"on": true, "off": false},
      "defaultVariant": "on"
    }
  }
}"#;

    const FLAGS_YAML: &str = r"
flags:
  fault-1-async-message-order:
    state: ENABLED
    variants: {on: true, off: false}
    defaultVariant: 'off'
";

    #[test]
    fn test_format_for_key() {
        assert_eq!(FlagFormat::for_key("demo.flagd.json"), FlagFormat::Json);
        assert_eq!(FlagFormat::for_key("flags.yaml"), FlagFormat::Yaml);
    }

    #[test]
    fn test_status_from_json_document() {
        let doc = FlagDocument::parse(FLAGS_JSON, FlagFormat::Json).unwrap();

        assert_eq!(doc.status("paymentServiceFailure"), FaultStatus::Off);
        assert_eq!(doc.status("adServiceHighCpu"), FaultStatus::On);
        assert_eq!(doc.status("noSuchFlag"), FaultStatus::Unknown);
        assert_eq!(doc.flag_names().len(), 2);
    }

    #[test]
    fn test_set_variant_is_idempotent() {
        let mut doc = FlagDocument::parse(FLAGS_JSON, FlagFormat::Json).unwrap();

        assert!(doc.set_variant("paymentServiceFailure", "on").unwrap());
        assert!(!doc.set_variant("paymentServiceFailure", "on").unwrap());
        assert_eq!(doc.status("paymentServiceFailure"), FaultStatus::On);
    }

    #[test]
    fn test_set_variant_unknown_flag_is_config_error() {
        let mut doc = FlagDocument::parse(FLAGS_JSON, FlagFormat::Json).unwrap();
        assert!(matches!(doc.set_variant("missing", "on"), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_yaml_document_round_trips_other_fields() {
        let mut doc = FlagDocument::parse(FLAGS_YAML, FlagFormat::Yaml).unwrap();
        doc.set_variant("fault-1-async-message-order", "on").unwrap();

        let rendered = doc.render().unwrap();
        let reparsed = FlagDocument::parse(&rendered, FlagFormat::Yaml).unwrap();
        assert_eq!(reparsed.status("fault-1-async-message-order"), FaultStatus::On);
        assert!(rendered.contains("ENABLED"));
    }

    #[test]
    fn test_document_without_flags_rejected() {
        assert!(FlagDocument::parse(r#"{"other": 1}"#, FlagFormat::Json).is_err());
        assert!(FlagDocument::parse("not json", FlagFormat::Json).is_err());
    }

    #[test]
    fn test_strip_server_fields() {
        let mut cm = json!({
            "kind": "ConfigMap",
            "metadata": {
                "name": "flagd-config",
                "resourceVersion": "123",
                "uid": "abc",
                "annotations": {
                    "kubectl.kubernetes.io/last-applied-configuration": "{}",
                    "keep": "me"
                }
            }
        });
        strip_server_fields(&mut cm);

        assert_eq!(cm["metadata"]["name"], "flagd-config");
        assert!(cm["metadata"].get("resourceVersion").is_none());
        assert!(cm["metadata"].get("uid").is_none());
        assert_eq!(cm["metadata"]["annotations"], json!({"keep": "me"}));
    }

    #[test]
    fn test_flag_param_overrides_fault_name() {
        let plain = FaultDescriptor::new("paymentServiceFailure", FaultKind::FeatureFlag);
        let mapped = FaultDescriptor::new("payment-outage", FaultKind::FeatureFlag)
            .param("flag", "paymentServiceFailure");

        assert_eq!(FeatureFlagInjector::flag_for(&plain), "paymentServiceFailure");
        assert_eq!(FeatureFlagInjector::flag_for(&mapped), "paymentServiceFailure");
    }
}
