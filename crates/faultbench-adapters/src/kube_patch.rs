//! Workload-object fault backend.
//!
//! Faults are edits to the target Deployments: an invalid pod security
//! context, tolerations that do not match a tainted node, starved resource
//! limits, or an arbitrary field set to a wrong value. Network faults add a
//! deny-all NetworkPolicy in front of the target pods.
//!
//! Every edited Deployment carries an annotation holding the fault name and
//! the values it replaced. The annotation is what `status` reads, what makes
//! `inject` idempotent, and what `recover` restores from.

use crate::command_executor::shell_quote;
use crate::feature_flag::strip_server_fields;
use crate::kubectl::KubectlCluster;
use async_trait::async_trait;
use faultbench_core::{KubePatchConfig, Progress, wait_until};
use faultbench_proto::{
    Error, FaultDescriptor, FaultInjector, FaultKind, FaultStatus, HealthReport, Result,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Annotation recording an applied fault on a Deployment.
pub const FAULT_ANNOTATION: &str = "faultbench.io/fault";

const SECURITY_CONTEXT: &str = "/spec/template/spec/securityContext";
const TOLERATIONS: &str = "/spec/template/spec/tolerations";

/// One field replaced by a fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedField {
    /// JSON pointer into the Deployment.
    pub path: String,
    /// Value before the fault; `None` when the field was absent.
    pub value: Option<Value>,
}

/// Contents of [`FAULT_ANNOTATION`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedFault {
    pub fault: String,
    pub saved: Vec<SavedField>,
}

impl AppliedFault {
    /// Reads the annotation from a Deployment, if present.
    pub fn read(deployment: &Value) -> Result<Option<Self>> {
        let Some(raw) = deployment
            .pointer("/metadata/annotations")
            .and_then(|annotations| annotations.get(FAULT_ANNOTATION))
            .and_then(Value::as_str)
        else {
            return Ok(None);
        };
        serde_json::from_str(raw)
            .map(Some)
            .map_err(|e| Error::invariant(format!("unreadable {FAULT_ANNOTATION} annotation: {e}")))
    }
}

/// Sets or removes the value at a JSON pointer, returning the previous value.
///
/// The parent must exist. Array parents accept an index inside the array or
/// one past its end.
pub fn set_pointer(doc: &mut Value, path: &str, value: Option<Value>) -> Result<Option<Value>> {
    let (parent_path, last) = path
        .rsplit_once('/')
        .ok_or_else(|| Error::config(format!("'{path}' is not a JSON pointer")))?;
    let key = last.replace("~1", "/").replace("~0", "~");
    let parent = doc
        .pointer_mut(parent_path)
        .ok_or_else(|| Error::config(format!("no field at '{parent_path}'")))?;

    match parent {
        Value::Object(map) => Ok(match value {
            Some(value) => map.insert(key, value),
            None => map.remove(&key),
        }),
        Value::Array(items) => {
            let index: usize = key
                .parse()
                .map_err(|_| Error::config(format!("'{key}' is not an array index in '{path}'")))?;
            match value {
                Some(value) if index < items.len() => {
                    Ok(Some(std::mem::replace(&mut items[index], value)))
                }
                Some(value) if index == items.len() => {
                    items.push(value);
                    Ok(None)
                }
                None if index < items.len() => Ok(Some(items.remove(index))),
                _ => Err(Error::config(format!("index {index} out of range in '{path}'"))),
            }
        }
        _ => Err(Error::config(format!("'{parent_path}' is neither an object nor an array"))),
    }
}

/// Whether the latest spec edit is observed and carries `fault`.
pub fn fault_visible(deployment: &Value, fault: &str) -> Result<Progress<()>> {
    let count = |pointer: &str| deployment.pointer(pointer).and_then(Value::as_u64).unwrap_or(0);
    if count("/status/observedGeneration") < count("/metadata/generation") {
        return Ok(Progress::Pending("spec update not yet observed".to_string()));
    }
    Ok(match AppliedFault::read(deployment)? {
        Some(applied) if applied.fault == fault => Progress::Ready(()),
        Some(applied) => Progress::Pending(format!("carries fault {}", applied.fault)),
        None => Progress::Pending("fault annotation missing".to_string()),
    })
}

/// [`FaultInjector`] editing Deployments in one namespace.
pub struct KubePatchInjector {
    cluster: Arc<KubectlCluster>,
    namespace: String,
    config: KubePatchConfig,
}

impl KubePatchInjector {
    pub fn new(
        cluster: Arc<KubectlCluster>,
        namespace: impl Into<String>,
        config: KubePatchConfig,
    ) -> Self {
        Self {
            cluster,
            namespace: namespace.into(),
            config,
        }
    }

    /// The field edits a fault makes to one target.
    ///
    /// Parameters: `run_as_user` (security context, default 0),
    /// `container` and `resources` (resource limits of one container),
    /// `path` and `value` (misconfiguration).
    pub fn edits(fault: &FaultDescriptor) -> Result<Vec<(String, Value)>> {
        let container = fault.params.get("container").and_then(Value::as_u64).unwrap_or(0);
        match fault.kind {
            FaultKind::SecurityContext => {
                let user = fault.params.get("run_as_user").and_then(Value::as_i64).unwrap_or(0);
                Ok(vec![(
                    SECURITY_CONTEXT.to_string(),
                    json!({"runAsNonRoot": true, "runAsUser": user}),
                )])
            }
            FaultKind::Scheduling => Ok(vec![(
                TOLERATIONS.to_string(),
                json!([{"key": "dummy-key", "operator": "Exists", "effect": "NoSchedule"}]),
            )]),
            FaultKind::Resource => {
                let resources = fault.params.get("resources").cloned().unwrap_or_else(|| {
                    json!({
                        "requests": {"cpu": "10m", "memory": "16Mi"},
                        "limits": {"cpu": "10m", "memory": "16Mi"}
                    })
                });
                Ok(vec![(
                    format!("/spec/template/spec/containers/{container}/resources"),
                    resources,
                )])
            }
            FaultKind::Misconfiguration => {
                let missing = |param: &str| {
                    Error::config(format!("fault '{}' needs a `{param}` parameter", fault.name))
                };
                let path = fault.str_param("path").ok_or_else(|| missing("path"))?;
                let value = fault.params.get("value").cloned().ok_or_else(|| missing("value"))?;
                Ok(vec![(path.to_string(), value)])
            }
            FaultKind::Network => Ok(Vec::new()),
            FaultKind::FeatureFlag => Err(Error::config(format!(
                "fault '{}' is a feature flag; use the feature_flag injector",
                fault.name
            ))),
        }
    }

    fn taint(&self) -> Result<(&str, &str)> {
        self.config
            .taint
            .split_once('=')
            .ok_or_else(|| Error::config(format!("taint '{}' is not key=value", self.config.taint)))
    }

    fn node(fault: &FaultDescriptor) -> Result<&str> {
        fault.str_param("node").ok_or_else(|| {
            Error::config(format!("scheduling fault '{}' needs a `node` parameter", fault.name))
        })
    }

    fn policy_name(target: &str) -> String {
        format!("faultbench-deny-{target}")
    }

    async fn deployment(&self, target: &str) -> Result<Value> {
        self.cluster
            .get_json(&format!("deployment {}", shell_quote(target)), &self.namespace)
            .await
    }

    async fn write(&self, mut deployment: Value) -> Result<()> {
        strip_server_fields(&mut deployment);
        let manifest = serde_json::to_string(&deployment)
            .map_err(|e| Error::config(format!("cannot render deployment: {e}")))?;
        self.cluster.replace(&manifest).await?;
        Ok(())
    }

    /// Applies the fault's edits to one Deployment. Returns `false` when it
    /// already carries the fault.
    async fn inject_target(
        &self,
        fault: &FaultDescriptor,
        edits: &[(String, Value)],
        target: &str,
    ) -> Result<bool> {
        let mut deployment = self.deployment(target).await?;
        match AppliedFault::read(&deployment)? {
            Some(applied) if applied.fault == fault.name => {
                debug!(target, fault = %fault.name, "Deployment already carries fault");
                return Ok(false);
            }
            Some(applied) => {
                return Err(Error::invariant(format!(
                    "deployment {target} already carries fault '{}'",
                    applied.fault
                )));
            }
            None => {}
        }

        let mut saved = Vec::with_capacity(edits.len());
        for (path, value) in edits {
            let previous = set_pointer(&mut deployment, path, Some(value.clone()))?;
            saved.push(SavedField {
                path: path.clone(),
                value: previous,
            });
        }
        let record = AppliedFault {
            fault: fault.name.clone(),
            saved,
        };
        let record = serde_json::to_string(&record)
            .map_err(|e| Error::config(format!("cannot render fault record: {e}")))?;
        let metadata = deployment
            .get_mut("metadata")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| {
                Error::platform("get deployment", format!("deployment {target} has no metadata"))
            })?;
        let annotations = metadata.entry("annotations").or_insert_with(|| json!({}));
        if let Some(annotations) = annotations.as_object_mut() {
            annotations.insert(FAULT_ANNOTATION.to_string(), Value::String(record));
        }

        self.write(deployment).await?;
        Ok(true)
    }

    /// Restores one Deployment. Returns `false` when it carries no fault.
    async fn recover_target(&self, fault: &FaultDescriptor, target: &str) -> Result<bool> {
        let mut deployment = self.deployment(target).await?;
        let Some(applied) = AppliedFault::read(&deployment)? else {
            debug!(target, fault = %fault.name, "Deployment carries no fault");
            return Ok(false);
        };
        if applied.fault != fault.name {
            warn!(
                target,
                found = %applied.fault,
                expected = %fault.name,
                "Recovering a different fault"
            );
        }

        for field in applied.saved.into_iter().rev() {
            set_pointer(&mut deployment, &field.path, field.value)?;
        }
        if let Some(annotations) = deployment
            .pointer_mut("/metadata/annotations")
            .and_then(Value::as_object_mut)
        {
            annotations.remove(FAULT_ANNOTATION);
        }

        self.write(deployment).await?;
        Ok(true)
    }

    async fn deny_traffic(&self, target: &str) -> Result<()> {
        let mut selector = serde_json::Map::new();
        selector.insert(self.config.target_label.clone(), Value::String(target.to_string()));
        let policy = json!({
            "apiVersion": "networking.k8s.io/v1",
            "kind": "NetworkPolicy",
            "metadata": {
                "name": Self::policy_name(target),
                "namespace": self.namespace,
                "labels": {"app.kubernetes.io/managed-by": "faultbench"}
            },
            "spec": {
                "podSelector": {"matchLabels": selector},
                "policyTypes": ["Ingress", "Egress"]
            }
        });
        self.cluster.apply(&policy.to_string()).await?;
        Ok(())
    }

    async fn allow_traffic(&self, target: &str) -> Result<()> {
        let args = format!(
            "delete networkpolicy {} -n {} --ignore-not-found",
            shell_quote(&Self::policy_name(target)),
            shell_quote(&self.namespace)
        );
        self.cluster.kubectl(&args).await?;
        Ok(())
    }

    async fn taint_node(&self, node: &str) -> Result<()> {
        let (key, value) = self.taint()?;
        let args = format!(
            "taint node {} {}={}:NoSchedule --overwrite",
            shell_quote(node),
            shell_quote(key),
            shell_quote(value)
        );
        self.cluster.kubectl(&args).await?;
        Ok(())
    }

    async fn untaint_node(&self, node: &str) -> Result<()> {
        let (key, _) = self.taint()?;
        let args = format!("taint node {} {}:NoSchedule-", shell_quote(node), shell_quote(key));
        match self.cluster.kubectl(&args).await {
            Err(Error::Platform { message, .. }) if message.contains("not found") => {
                debug!(node, "Taint already removed");
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    /// Deletes the target's pods so they are rescheduled against the taint.
    async fn evict(&self, target: &str) -> Result<()> {
        let args = format!(
            "delete pods -l {} -n {} --wait=false",
            shell_quote(&format!("{}={target}", self.config.target_label)),
            shell_quote(&self.namespace)
        );
        self.cluster.kubectl(&args).await?;
        Ok(())
    }

    async fn await_fault_visible(&self, fault: &FaultDescriptor, target: &str) -> Result<()> {
        let name = fault.name.as_str();
        let label = format!("fault {name} on deployment/{target} in {}", self.namespace);
        wait_until(self.cluster.policy(), &label, move || async move {
            fault_visible(&self.deployment(target).await?, name)
        })
        .await
    }
}

#[async_trait]
impl FaultInjector for KubePatchInjector {
    fn backend(&self) -> &str {
        "kube_patch"
    }

    async fn inject(&self, fault: &FaultDescriptor) -> Result<()> {
        let edits = Self::edits(fault)?;
        if fault.targets.is_empty() {
            return Err(Error::config(format!("fault '{}' has no targets", fault.name)));
        }
        if fault.kind == FaultKind::Scheduling {
            self.taint_node(Self::node(fault)?).await?;
        }

        for target in &fault.targets {
            if !self.inject_target(fault, &edits, target).await? {
                continue;
            }
            match fault.kind {
                FaultKind::Network => self.deny_traffic(target).await?,
                FaultKind::Scheduling => self.evict(target).await?,
                _ => {}
            }
            // Faulty pods never become ready, so only the edit itself is awaited.
            self.await_fault_visible(fault, target).await?;
        }

        info!(
            fault = %fault.name,
            kind = %fault.kind,
            namespace = %self.namespace,
            "Fault applied"
        );
        Ok(())
    }

    async fn recover(&self, fault: &FaultDescriptor) -> Result<()> {
        for target in &fault.targets {
            let restored = self.recover_target(fault, target).await?;
            if fault.kind == FaultKind::Network {
                self.allow_traffic(target).await?;
            }
            if restored {
                self.cluster.wait_for_rollout(&self.namespace, target).await?;
            }
        }
        if fault.kind == FaultKind::Scheduling {
            self.untaint_node(Self::node(fault)?).await?;
        }

        info!(
            fault = %fault.name,
            kind = %fault.kind,
            namespace = %self.namespace,
            "Fault recovered"
        );
        Ok(())
    }

    async fn status(&self, fault: &FaultDescriptor) -> Result<FaultStatus> {
        let mut on = 0;
        for target in &fault.targets {
            match AppliedFault::read(&self.deployment(target).await?)? {
                Some(applied) if applied.fault == fault.name => on += 1,
                Some(_) => return Ok(FaultStatus::Unknown),
                None => {}
            }
        }
        Ok(match on {
            0 if !fault.targets.is_empty() => FaultStatus::Off,
            n if n == fault.targets.len() && n > 0 => FaultStatus::On,
            _ => FaultStatus::Unknown,
        })
    }

    async fn health_check(&self) -> HealthReport {
        let mut report = HealthReport::new();
        let namespace = self
            .cluster
            .kubectl(&format!("get namespace {}", shell_quote(&self.namespace)))
            .await;
        report.insert("namespace_exists".to_string(), namespace.is_ok());

        let deployments = self
            .cluster
            .kubectl(&format!("get deployments -n {}", shell_quote(&self.namespace)))
            .await;
        report.insert("deployments_listable".to_string(), deployments.is_ok());
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment() -> Value {
        json!({
            "metadata": {"name": "frontend", "generation": 4},
            "spec": {"template": {"spec": {
                "containers": [{"name": "frontend", "ports": [{"containerPort": 5000}]}]
            }}},
            "status": {"observedGeneration": 4}
        })
    }

    #[test]
    fn test_set_pointer_object_and_array() {
        let mut doc = deployment();

        let context = json!({"runAsUser": 0});
        let previous = set_pointer(&mut doc, SECURITY_CONTEXT, Some(context.clone())).unwrap();
        assert_eq!(previous, None);
        assert_eq!(doc.pointer("/spec/template/spec/securityContext/runAsUser"), Some(&json!(0)));

        let port = "/spec/template/spec/containers/0/ports/0/containerPort";
        assert_eq!(set_pointer(&mut doc, port, Some(json!(9999))).unwrap(), Some(json!(5000)));
        assert_eq!(set_pointer(&mut doc, SECURITY_CONTEXT, None).unwrap(), Some(context));
        assert!(doc.pointer(SECURITY_CONTEXT).is_none());
    }

    #[test]
    fn test_set_pointer_rejects_missing_parent() {
        let mut doc = deployment();
        let selector = "/spec/selector/matchLabels/app";
        let err = set_pointer(&mut doc, selector, Some(json!("x"))).unwrap_err();
        assert_eq!(err.class(), "ConfigurationError");

        let sixth_container = "/spec/template/spec/containers/5";
        assert!(set_pointer(&mut doc, sixth_container, Some(json!({}))).is_err());
    }

    #[test]
    fn test_annotation_key_escaping() {
        let mut doc = json!({"metadata": {"annotations": {}}});
        let escaped = "/metadata/annotations/faultbench.io~1fault";
        set_pointer(&mut doc, escaped, Some(json!("x"))).unwrap();
        assert_eq!(doc["metadata"]["annotations"][FAULT_ANNOTATION], json!("x"));
    }

    #[test]
    fn test_edits_per_kind() {
        let security =
            FaultDescriptor::new("bad-user", FaultKind::SecurityContext).param("run_as_user", 1000);
        let edits = KubePatchInjector::edits(&security).unwrap();
        assert_eq!(edits[0].1, json!({"runAsNonRoot": true, "runAsUser": 1000}));

        let limits = FaultDescriptor::new("starved", FaultKind::Resource).param("container", 1);
        assert_eq!(
            KubePatchInjector::edits(&limits).unwrap()[0].0,
            "/spec/template/spec/containers/1/resources"
        );

        assert!(KubePatchInjector::edits(&FaultDescriptor::new("partition", FaultKind::Network))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_edits_reject_incomplete_params() {
        let misconfig = FaultDescriptor::new("wrong-port", FaultKind::Misconfiguration)
            .param("path", "/spec/x");
        assert!(matches!(KubePatchInjector::edits(&misconfig), Err(Error::Configuration(_))));

        let flag = FaultDescriptor::new("paymentServiceFailure", FaultKind::FeatureFlag);
        assert!(matches!(KubePatchInjector::edits(&flag), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_fault_visible() {
        let mut doc = deployment();
        assert_eq!(
            fault_visible(&doc, "bad-user").unwrap(),
            Progress::Pending("fault annotation missing".to_string())
        );

        let record = json!({"fault": "bad-user", "saved": []}).to_string();
        doc["metadata"]["annotations"][FAULT_ANNOTATION] = Value::String(record);
        assert_eq!(fault_visible(&doc, "bad-user").unwrap(), Progress::Ready(()));

        doc["metadata"]["generation"] = json!(5);
        assert_eq!(
            fault_visible(&doc, "bad-user").unwrap(),
            Progress::Pending("spec update not yet observed".to_string())
        );
    }
}
