//! Cluster control over the `kubectl` CLI.

use crate::command_executor::{CommandExecutor, shell_quote};
use async_trait::async_trait;
use faultbench_core::{ClusterConfig, ConductorConfig, PollPolicy, Progress, wait_until};
use faultbench_proto::{ClusterControl, Error, Readiness, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// [`ClusterControl`] backed by `kubectl` run through a shell.
///
/// Relayed agent commands go through the same shell, so an agent can use
/// pipes and any other tool installed next to `kubectl`.
#[derive(Debug, Clone)]
pub struct KubectlCluster {
    kubectl: String,
    executor: CommandExecutor,
    relay: CommandExecutor,
    policy: PollPolicy,
}

impl KubectlCluster {
    pub fn new(kubectl: impl Into<String>, executor: CommandExecutor, policy: PollPolicy) -> Self {
        Self {
            kubectl: kubectl.into(),
            relay: executor.clone(),
            executor,
            policy,
        }
    }

    /// Uses a separate executor for relayed agent commands.
    pub fn with_relay(mut self, relay: CommandExecutor) -> Self {
        self.relay = relay;
        self
    }

    /// Builds a cluster handle from the `cluster` and `conductor` sections.
    pub fn from_config(
        cluster: &ClusterConfig,
        conductor: &ConductorConfig,
        policy: PollPolicy,
    ) -> Self {
        let shell = |seconds| {
            CommandExecutor::new(&conductor.shell).with_timeout(Duration::from_secs(seconds))
        };
        let executor = shell(cluster.command_timeout_seconds);
        let relay = shell(conductor.relay_timeout_seconds);
        Self::new(cluster.kubectl.clone(), executor, policy).with_relay(relay)
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    /// Builds a `kubectl` command line from already-quoted arguments.
    ///
    /// The configured binary is a command prefix, so `kubectl --context prod`
    /// works as a value.
    pub fn command(&self, args: &str) -> String {
        format!("{} {}", self.kubectl, args)
    }

    /// Runs `kubectl <args>` and returns stdout.
    pub async fn kubectl(&self, args: &str) -> Result<String> {
        self.executor.run(&self.command(args)).await
    }

    /// Runs `kubectl get <resource> -o json` and parses the result.
    pub async fn get_json(&self, resource: &str, namespace: &str) -> Result<Value> {
        let args = format!("get {} -n {} -o json", resource, shell_quote(namespace));
        let raw = self.kubectl(&args).await?;
        self.parse_json(&args, &raw)
    }

    fn parse_json(&self, args: &str, raw: &str) -> Result<Value> {
        serde_json::from_str(raw).map_err(|e| {
            Error::platform(self.command(args), format!("invalid JSON output: {e}"))
        })
    }

    /// Pipes a manifest into `kubectl apply -f -`.
    pub async fn apply(&self, manifest: &str) -> Result<String> {
        self.executor
            .run_with_stdin(&self.command("apply -f -"), Some(manifest))
            .await
    }

    /// Pipes a full object into `kubectl replace -f -`.
    pub async fn replace(&self, manifest: &str) -> Result<String> {
        self.executor
            .run_with_stdin(&self.command("replace -f -"), Some(manifest))
            .await
    }

    /// Restarts a deployment and waits for the rollout to finish.
    pub async fn restart_deployment(&self, namespace: &str, deployment: &str) -> Result<()> {
        let args = format!(
            "rollout restart deployment/{} -n {}",
            shell_quote(deployment),
            shell_quote(namespace)
        );
        self.kubectl(&args).await?;
        self.wait_for_rollout(namespace, deployment).await
    }

    /// Polls a deployment until its rollout settles.
    ///
    /// The rollout is polled under the convergence policy, so a rollout that
    /// never settles ends in [`Error::ConvergenceTimeout`] carrying the last
    /// observed progress.
    pub async fn wait_for_rollout(&self, namespace: &str, deployment: &str) -> Result<()> {
        let resource = format!("deployment {}", shell_quote(deployment));
        let resource = resource.as_str();
        let target = format!("deployment/{deployment} in {namespace}");
        wait_until(self.policy, &target, move || async move {
            let doc = self.get_json(resource, namespace).await?;
            Ok(rollout_progress(&doc))
        })
        .await?;
        debug!(deployment, namespace, "Rollout finished");
        Ok(())
    }
}

/// Rollout progress of a `kubectl get deployment -o json` document, worded
/// the way `kubectl rollout status` reports it.
pub fn rollout_progress(doc: &Value) -> Progress<()> {
    let count = |pointer: &str| doc.pointer(pointer).and_then(Value::as_u64).unwrap_or(0);
    let name = doc.pointer("/metadata/name").and_then(Value::as_str).unwrap_or("deployment");

    if count("/status/observedGeneration") < count("/metadata/generation") {
        return Progress::Pending(format!(
            "Waiting for deployment {name} spec update to be observed"
        ));
    }
    let desired = doc.pointer("/spec/replicas").and_then(Value::as_u64).unwrap_or(1);
    let updated = count("/status/updatedReplicas");
    let replicas = count("/status/replicas");
    let available = count("/status/availableReplicas");

    let waiting = format!("Waiting for deployment {name} rollout to finish");
    if updated < desired {
        Progress::Pending(format!(
            "{waiting}: {updated} out of {desired} new replicas have been updated"
        ))
    } else if replicas > updated {
        Progress::Pending(format!(
            "{waiting}: {} old replicas are pending termination",
            replicas - updated
        ))
    } else if available < updated {
        Progress::Pending(format!(
            "{waiting}: {available} of {updated} updated replicas are available"
        ))
    } else {
        Progress::Ready(())
    }
}

/// Counts ready pods in a `kubectl get pods -o json` document.
///
/// A pod is ready when its `Ready` condition is `True`.
pub fn parse_pod_readiness(doc: &Value) -> Result<Readiness> {
    let items = doc
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::platform("get pods", "pod list has no `items` array"))?;

    let ready = items
        .iter()
        .filter(|pod| {
            pod.pointer("/status/conditions")
                .and_then(Value::as_array)
                .is_some_and(|conditions| {
                    conditions.iter().any(|c| {
                        c.get("type").and_then(Value::as_str) == Some("Ready")
                            && c.get("status").and_then(Value::as_str) == Some("True")
                    })
                })
        })
        .count();

    Ok(Readiness {
        ready: ready as u32,
        total: items.len() as u32,
    })
}

#[async_trait]
impl ClusterControl for KubectlCluster {
    async fn exec(&self, command: &str) -> Result<String> {
        let result = self
            .relay
            .execute(command, None)
            .await
            .map_err(|e| Error::platform(command, e.to_string()))?;
        if result.timed_out {
            let limit = self.relay.timeout().unwrap_or_default();
            return Err(Error::platform(command, format!("timed out after {}s", limit.as_secs())));
        }
        if !result.success {
            let message = result.combined();
            return Err(Error::platform(command, message.trim().to_string()));
        }
        Ok(result.combined())
    }

    async fn readiness(&self, namespace: &str, selector: &str) -> Result<Readiness> {
        let args = format!(
            "get pods -n {} -l {} -o json",
            shell_quote(namespace),
            shell_quote(selector)
        );
        let raw = self.kubectl(&args).await?;
        parse_pod_readiness(&self.parse_json(&args, &raw)?)
    }

    async fn wait_for_ready(
        &self,
        namespace: &str,
        selector: &str,
        timeout: Duration,
    ) -> Result<()> {
        let target = format!("pods {selector} in {namespace}");
        wait_until(self.policy.with_timeout(timeout), &target, move || async move {
            let readiness = self.readiness(namespace, selector).await?;
            Ok(if readiness.is_ready() {
                Progress::Ready(())
            } else {
                Progress::Pending(readiness.to_string())
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod(ready: &str) -> Value {
        json!({
            "metadata": {"name": "frontend-abc"},
            "status": {"conditions": [
                {"type": "PodScheduled", "status": "True"},
                {"type": "Ready", "status": ready}
            ]}
        })
    }

    #[test]
    fn test_parse_pod_readiness() {
        let doc = json!({"items": [pod("True"), pod("False"), {"status": {}}]});
        assert_eq!(parse_pod_readiness(&doc).unwrap(), Readiness { ready: 1, total: 3 });
    }

    #[test]
    fn test_parse_empty_pod_list() {
        let readiness = parse_pod_readiness(&json!({"items": []})).unwrap();
        assert!(!readiness.is_ready());
    }

    #[test]
    fn test_parse_rejects_non_list() {
        let err = parse_pod_readiness(&json!({"kind": "Pod"})).unwrap_err();
        assert!(matches!(err, Error::Platform { .. }));
    }

    /// A one-replica `flagd` deployment at generation 3.
    fn deployment(observed: u64, updated: u64, replicas: u64, available: u64) -> Value {
        json!({
            "metadata": {"name": "flagd", "generation": 3},
            "spec": {"replicas": 1},
            "status": {
                "observedGeneration": observed,
                "updatedReplicas": updated,
                "replicas": replicas,
                "availableReplicas": available
            }
        })
    }

    fn pending(progress: Progress<()>) -> String {
        match progress {
            Progress::Pending(status) => status,
            Progress::Ready(()) => panic!("expected a pending rollout"),
        }
    }

    #[test]
    fn test_rollout_progress() {
        assert_eq!(rollout_progress(&deployment(3, 1, 1, 1)), Progress::Ready(()));
        assert_eq!(
            pending(rollout_progress(&deployment(2, 1, 1, 1))),
            "Waiting for deployment flagd spec update to be observed"
        );

        let waiting = "Waiting for deployment flagd rollout to finish";
        assert_eq!(
            pending(rollout_progress(&deployment(3, 0, 1, 1))),
            format!("{waiting}: 0 out of 1 new replicas have been updated")
        );
        assert_eq!(
            pending(rollout_progress(&deployment(3, 1, 2, 1))),
            format!("{waiting}: 1 old replicas are pending termination")
        );
        assert_eq!(
            pending(rollout_progress(&deployment(3, 1, 1, 0))),
            format!("{waiting}: 0 of 1 updated replicas are available")
        );
    }

    #[test]
    fn test_command_uses_configured_prefix() {
        let cluster = KubectlCluster::new(
            "kubectl --context kind-sre",
            CommandExecutor::default(),
            PollPolicy::default(),
        );
        assert_eq!(cluster.command("get pods"), "kubectl --context kind-sre get pods");
    }

    #[tokio::test]
    async fn test_exec_relays_output_and_errors() {
        let cluster =
            KubectlCluster::new("kubectl", CommandExecutor::default(), PollPolicy::default());

        assert_eq!(cluster.exec("echo pods").await.unwrap(), "pods\n");
        let err = cluster.exec("echo 'no such resource' >&2; exit 1").await.unwrap_err();
        assert!(err.to_string().contains("no such resource"));
    }
}
