//! Traits implemented by the engine's external collaborators.
//!
//! The engine only depends on these contracts; concrete implementations
//! (kubectl, flagd, wrk2, HTTP) live in `faultbench-adapters`.

use crate::{FaultDescriptor, FaultStatus, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Subsystem name to healthy flag.
pub type HealthReport = BTreeMap<String, bool>;

/// A platform capability that turns a fault on and off.
///
/// `inject` and `recover` block until the change has converged on the
/// cluster or a bounded wait expires. `inject` on an already-injected fault
/// succeeds without reapplying anything.
#[async_trait]
pub trait FaultInjector: Send + Sync {
    /// Backend name used in logs and configuration.
    fn backend(&self) -> &str;

    async fn inject(&self, fault: &FaultDescriptor) -> Result<()>;

    async fn recover(&self, fault: &FaultDescriptor) -> Result<()>;

    /// Pure read. An unknown fault is `FaultStatus::Unknown`, not an error;
    /// a failed platform call is an error.
    async fn status(&self, fault: &FaultDescriptor) -> Result<FaultStatus>;

    async fn health_check(&self) -> HealthReport;
}

/// A deployable target application.
#[async_trait]
pub trait Application: Send + Sync {
    fn name(&self) -> &str;

    fn namespace(&self) -> &str;

    fn frontend_service(&self) -> Option<&str> {
        None
    }

    fn frontend_port(&self) -> Option<u16> {
        None
    }

    async fn deploy(&self) -> Result<()>;

    async fn cleanup(&self) -> Result<()>;

    async fn start_workload(&self) -> Result<()>;
}

/// Ready versus total pods matched by a selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Readiness {
    pub ready: u32,
    pub total: u32,
}

impl Readiness {
    /// All matched pods are ready and at least one pod exists.
    pub fn is_ready(self) -> bool {
        self.total > 0 && self.ready == self.total
    }
}

impl std::fmt::Display for Readiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} ready", self.ready, self.total)
    }
}

/// Command execution against the orchestrator.
#[async_trait]
pub trait ClusterControl: Send + Sync {
    /// Runs a command and returns its raw output. Non-zero exit is
    /// `Error::Platform`.
    async fn exec(&self, command: &str) -> Result<String>;

    /// Counts ready pods matching `selector` in `namespace`.
    async fn readiness(&self, namespace: &str, selector: &str) -> Result<Readiness>;

    /// Blocks until every pod matching `selector` is ready, or `timeout`.
    async fn wait_for_ready(&self, namespace: &str, selector: &str, timeout: Duration)
    -> Result<()>;
}

/// A load generator driven against an application.
#[async_trait]
pub trait WorkloadGenerator: Send + Sync {
    /// Runs one workload pass and returns the generator's raw report.
    async fn run(&self, app: &dyn Application) -> Result<String>;
}

/// Reply to a submission, mirroring an HTTP-style status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub status: u16,
    #[serde(default)]
    pub message: String,
}

impl SubmitResponse {
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Boundary an agent uses to hand its final answer to the engine.
#[async_trait]
pub trait SubmissionTransport: Send + Sync {
    async fn submit(&self, answer: &str) -> Result<SubmitResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness() {
        assert!(Readiness { ready: 2, total: 2 }.is_ready());
        assert!(!Readiness { ready: 1, total: 2 }.is_ready());
        assert!(!Readiness { ready: 0, total: 0 }.is_ready());
        assert_eq!(Readiness { ready: 1, total: 3 }.to_string(), "1/3 ready");
    }

    #[test]
    fn test_submit_response_status() {
        let ok: SubmitResponse = serde_json::from_str(r#"{"status":200}"#).unwrap();
        assert!(ok.is_success());
        assert!(ok.message.is_empty());
        assert!(!SubmitResponse { status: 409, message: "already graded".into() }.is_success());
    }
}
