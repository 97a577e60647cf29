//! Problem lifecycle.
//!
//! A [`Problem`] binds one application, one fault and the oracles that grade
//! it, and walks the [`Stage`] machine:
//!
//! ```text
//! CREATED → DEPLOYED → FAULT_INJECTED → [WORKLOAD_ACTIVE] → AWAITING_SUBMISSION
//!         → GRADED → RECOVERED → CLEANED_UP            (FAILED from anywhere)
//! ```
//!
//! Injecting a fault arms a [`FaultLease`]. The lease is only disarmed by a
//! successful recovery; dropping an armed lease schedules a recovery on the
//! current runtime.

use crate::answer::Answer;
use crate::oracle::{EvaluationContext, Oracle};
use faultbench_proto::{
    Application, ClusterControl, Error, FaultDescriptor, FaultInjector, FaultStatus, OracleName,
    OracleResult, Result, Stage, Verdict, WorkloadGenerator,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

fn default_injector() -> String {
    "feature_flag".to_string()
}

/// Declarative description of a benchmark scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemDefinition {
    /// Unique problem identifier used by `start <problem_id>`.
    pub id: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Name of the application the fault targets.
    pub application: String,

    /// Overrides the application's namespace.
    #[serde(default)]
    pub namespace: Option<String>,

    /// Fault injector backend name.
    #[serde(default = "default_injector")]
    pub injector: String,

    pub fault: FaultDescriptor,

    /// Start the application's workload after injection.
    #[serde(default)]
    pub workload: bool,

    /// Oracles keyed by slot; any subset may be present.
    pub oracles: BTreeMap<OracleName, Oracle>,
}

impl ProblemDefinition {
    /// Checks the definition for structural errors.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::config("problem id must not be empty"));
        }
        if self.id.chars().any(char::is_whitespace) {
            return Err(Error::config(format!(
                "problem id '{}' must not contain whitespace",
                self.id
            )));
        }
        if self.fault.name.trim().is_empty() {
            return Err(Error::config(format!("problem '{}': fault name is empty", self.id)));
        }
        if self.fault.targets.is_empty() {
            return Err(Error::config(format!(
                "problem '{}': fault '{}' has no target workloads",
                self.id, self.fault.name
            )));
        }
        if self.oracles.is_empty() {
            return Err(Error::config(format!("problem '{}' has no oracles", self.id)));
        }
        Ok(())
    }
}

/// Guarantees that an injected fault gets a recovery attempt.
#[must_use = "an armed lease must be released with `release`"]
pub struct FaultLease {
    problem_id: String,
    fault: FaultDescriptor,
    injector: Arc<dyn FaultInjector>,
    armed: bool,
}

impl FaultLease {
    fn new(problem_id: &str, fault: &FaultDescriptor, injector: Arc<dyn FaultInjector>) -> Self {
        Self {
            problem_id: problem_id.to_string(),
            fault: fault.clone(),
            injector,
            armed: true,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Recovers the fault. The lease stays armed if recovery fails.
    pub async fn release(&mut self) -> Result<()> {
        if !self.armed {
            return Ok(());
        }
        self.injector.recover(&self.fault).await?;
        self.armed = false;
        info!(problem_id = %self.problem_id, fault = %self.fault.name, "Fault recovered");
        Ok(())
    }
}

impl Drop for FaultLease {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(
            problem_id = %self.problem_id,
            fault = %self.fault.name,
            "Fault lease dropped while armed, scheduling recovery"
        );
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            error!(fault = %self.fault.name, "No runtime available, fault left injected");
            return;
        };
        let injector = Arc::clone(&self.injector);
        let fault = self.fault.clone();
        handle.spawn(async move {
            if let Err(e) = injector.recover(&fault).await {
                error!(fault = %fault.name, error = %e, "Deferred fault recovery failed");
            }
        });
    }
}

/// Collaborators oracles may consult while grading.
pub struct GradingEnv<'a> {
    pub cluster: &'a dyn ClusterControl,
    pub workload: Option<&'a dyn WorkloadGenerator>,
}

/// A live benchmark problem.
pub struct Problem {
    definition: ProblemDefinition,
    namespace: String,
    app: Arc<dyn Application>,
    injector: Arc<dyn FaultInjector>,
    stage: Stage,
    lease: Option<FaultLease>,
    verdict: Option<Verdict>,
}

impl Problem {
    pub fn new(
        definition: ProblemDefinition,
        app: Arc<dyn Application>,
        injector: Arc<dyn FaultInjector>,
    ) -> Self {
        let namespace = definition
            .namespace
            .clone()
            .unwrap_or_else(|| app.namespace().to_string());
        Self {
            definition,
            namespace,
            app,
            injector,
            stage: Stage::Created,
            lease: None,
            verdict: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn fault(&self) -> &FaultDescriptor {
        &self.definition.fault
    }

    pub fn definition(&self) -> &ProblemDefinition {
        &self.definition
    }

    pub fn application(&self) -> &dyn Application {
        self.app.as_ref()
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        self.verdict.as_ref()
    }

    /// True while a fault is (or may be) live and awaits recovery.
    pub fn fault_armed(&self) -> bool {
        self.lease.as_ref().is_some_and(FaultLease::is_armed)
    }

    pub async fn fault_status(&self) -> Result<FaultStatus> {
        self.injector.status(&self.definition.fault).await
    }

    fn transition(&mut self, next: Stage) -> Result<()> {
        if !self.stage.can_transition(next) {
            return Err(Error::invariant(format!(
                "problem '{}' cannot move from {} to {}",
                self.definition.id, self.stage, next
            )));
        }
        info!(problem_id = %self.definition.id, from = %self.stage, to = %next, "Stage transition");
        self.stage = next;
        Ok(())
    }

    fn require(&self, allowed: &[Stage], operation: &str) -> Result<()> {
        if allowed.contains(&self.stage) {
            Ok(())
        } else {
            Err(Error::invariant(format!(
                "{operation} is not allowed in stage {} (problem '{}')",
                self.stage, self.definition.id
            )))
        }
    }

    /// Provisions the application. On failure the stage stays `CREATED`.
    pub async fn deploy(&mut self) -> Result<()> {
        self.require(&[Stage::Created], "deploy")?;
        self.app.deploy().await?;
        self.transition(Stage::Deployed)
    }

    /// Injects the fault and arms the lease.
    ///
    /// The lease is armed even when injection fails, since a failed
    /// injection may have been partially applied.
    pub async fn inject_fault(&mut self) -> Result<()> {
        self.require(&[Stage::Deployed], "inject_fault")?;
        if self.fault_armed() {
            return Err(Error::invariant(format!(
                "fault '{}' is already injected",
                self.definition.fault.name
            )));
        }

        self.lease = Some(FaultLease::new(
            &self.definition.id,
            &self.definition.fault,
            Arc::clone(&self.injector),
        ));
        info!(
            problem_id = %self.definition.id,
            fault = %self.definition.fault.name,
            kind = %self.definition.fault.kind,
            backend = self.injector.backend(),
            targets = ?self.definition.fault.targets,
            "Injecting fault"
        );
        self.injector.inject(&self.definition.fault).await?;
        self.transition(Stage::FaultInjected)
    }

    pub async fn start_workload(&mut self) -> Result<()> {
        self.require(&[Stage::FaultInjected], "start_workload")?;
        self.app.start_workload().await?;
        self.transition(Stage::WorkloadActive)
    }

    /// Opens the agent-interaction phase.
    pub fn await_submission(&mut self) -> Result<()> {
        self.require(&[Stage::FaultInjected, Stage::WorkloadActive], "await_submission")?;
        self.transition(Stage::AwaitingSubmission)
    }

    /// Grades a submission. Single-shot: a second call is rejected and the
    /// first verdict is kept.
    pub async fn grade(&mut self, answer: &Answer, env: &GradingEnv<'_>) -> Result<Verdict> {
        if self.stage == Stage::Graded {
            return Err(Error::invariant(format!(
                "problem '{}' has already been graded",
                self.definition.id
            )));
        }
        self.require(&[Stage::AwaitingSubmission], "submit")?;

        let ctx = EvaluationContext {
            problem_id: &self.definition.id,
            namespace: &self.namespace,
            answer,
            app: self.app.as_ref(),
            cluster: env.cluster,
            workload: env.workload,
        };

        let mut results: BTreeMap<OracleName, OracleResult> = BTreeMap::new();
        for (name, oracle) in &self.definition.oracles {
            results.insert(*name, oracle.evaluate(&ctx).await);
        }

        let verdict = Verdict::new(self.definition.id.clone(), results);
        info!(
            problem_id = %self.definition.id,
            success = verdict.success,
            oracles = verdict.oracles.len(),
            "Submission graded"
        );
        self.verdict = Some(verdict.clone());
        self.transition(Stage::Graded)?;
        Ok(verdict)
    }

    /// Recovers the injected fault. A no-op when nothing is armed.
    ///
    /// On failure the lease stays armed so the caller can retry.
    pub async fn recover_fault(&mut self) -> Result<()> {
        let Some(lease) = self.lease.as_mut() else {
            return Ok(());
        };
        lease.release().await?;
        self.lease = None;
        if self.stage.holds_fault() {
            self.transition(Stage::Recovered)?;
        }
        Ok(())
    }

    /// Deprovisions the application. Refused while a fault is armed.
    pub async fn cleanup(&mut self) -> Result<()> {
        if self.stage == Stage::CleanedUp {
            return Ok(());
        }
        if self.fault_armed() {
            return Err(Error::invariant(format!(
                "problem '{}' still has fault '{}' injected; recover before cleanup",
                self.definition.id, self.definition.fault.name
            )));
        }
        self.require(&[Stage::Graded, Stage::Recovered, Stage::Failed], "cleanup")?;
        self.app.cleanup().await?;
        self.transition(Stage::CleanedUp)
    }

    /// Moves to the absorbing `FAILED` stage.
    pub fn fail(&mut self, reason: &str) {
        if self.stage == Stage::Failed || self.stage.is_terminal() {
            return;
        }
        error!(problem_id = %self.definition.id, from = %self.stage, reason, "Problem failed");
        self.stage = Stage::Failed;
    }
}
