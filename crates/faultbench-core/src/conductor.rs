//! The conductor drives one problem at a time.
//!
//! It owns the active [`Problem`], relays investigative commands to the
//! cluster untouched, recognises the submission marker, grades and persists
//! the verdict, and guarantees that every injected fault is recovered.

use crate::answer::Answer;
use crate::config::ConductorConfig;
use crate::platform::Platform;
use crate::problem::{GradingEnv, Problem};
use crate::problem_registry::ProblemRegistry;
use crate::verdict_store::VerdictStore;
use faultbench_proto::{Error, FaultStatus, Result, Stage, Verdict};
use futures::FutureExt;
use std::collections::BTreeSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

/// What a line of input produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Output of a relayed command.
    Output(String),
    /// The submission was graded and the problem torn down.
    Graded(Verdict),
}

/// Orchestrates problems against a platform.
pub struct Conductor {
    registry: ProblemRegistry,
    platform: Platform,
    store: VerdictStore,
    submit_marker: String,
    active: AsyncMutex<Option<Problem>>,
    grading: AtomicBool,
    last_verdict: Mutex<Option<Verdict>>,
    last_artifact: Mutex<Option<PathBuf>>,
    standalone: Mutex<BTreeSet<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Conductor {
    pub fn new(registry: ProblemRegistry, platform: Platform, config: &ConductorConfig) -> Self {
        Self {
            registry,
            platform,
            store: VerdictStore::new(&config.results_dir),
            submit_marker: config.submit_marker.clone(),
            active: AsyncMutex::new(None),
            grading: AtomicBool::new(false),
            last_verdict: Mutex::new(None),
            last_artifact: Mutex::new(None),
            standalone: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn problem_ids(&self) -> Vec<String> {
        self.registry.ids().map(str::to_string).collect()
    }

    pub fn registry(&self) -> &ProblemRegistry {
        &self.registry
    }

    pub fn submit_marker(&self) -> &str {
        &self.submit_marker
    }

    /// Stage of the active problem, if any.
    pub async fn active_stage(&self) -> Option<Stage> {
        self.active.lock().await.as_ref().map(Problem::stage)
    }

    pub async fn active_problem_id(&self) -> Option<String> {
        self.active.lock().await.as_ref().map(|p| p.id().to_string())
    }

    /// Status of the active problem's fault.
    pub async fn fault_status(&self) -> Result<Option<FaultStatus>> {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(problem) => Ok(Some(problem.fault_status().await?)),
            None => Ok(None),
        }
    }

    /// Most recent verdict, kept after the problem is torn down.
    pub fn last_verdict(&self) -> Option<Verdict> {
        lock(&self.last_verdict).clone()
    }

    /// Where the most recent verdict was written.
    pub fn last_artifact(&self) -> Option<PathBuf> {
        lock(&self.last_artifact).clone()
    }

    /// Applications currently deployed, as `name (namespace)`.
    pub async fn deployed_apps(&self) -> Vec<String> {
        let mut apps: Vec<String> = Vec::new();
        if let Some(problem) = self.active.lock().await.as_ref()
            && problem.stage() != Stage::Created
            && problem.stage() != Stage::CleanedUp
        {
            apps.push(format!(
                "{} ({}) [problem {}]",
                problem.application().name(),
                problem.namespace(),
                problem.id()
            ));
        }
        for name in lock(&self.standalone).iter() {
            if let Ok(app) = self.platform.application(name) {
                apps.push(format!("{} ({})", app.name(), app.namespace()));
            }
        }
        apps
    }

    /// Deploys an application outside of any problem.
    pub async fn deploy_app(&self, name: &str) -> Result<()> {
        let app = self.platform.application(name)?;
        app.deploy().await?;
        lock(&self.standalone).insert(name.to_string());
        info!(application = name, "Application deployed");
        Ok(())
    }

    /// Tears down an application deployed with [`Conductor::deploy_app`].
    pub async fn undeploy_app(&self, name: &str) -> Result<()> {
        let app = self.platform.application(name)?;
        app.cleanup().await?;
        lock(&self.standalone).remove(name);
        info!(application = name, "Application removed");
        Ok(())
    }

    /// Starts a problem: deploy, inject, optional workload, then await a
    /// submission.
    ///
    /// Any previously active problem is recovered and cleaned up first. If
    /// injection fails the fault is recovered and the problem torn down
    /// before the error is returned.
    pub async fn start_problem(&self, id: &str) -> Result<()> {
        let definition = self
            .registry
            .get(id)
            .ok_or_else(|| Error::config(format!("unknown problem id '{id}'")))?
            .clone();

        let mut active = self.active.lock().await;
        if let Some(mut previous) = active.take() {
            warn!(
                previous = previous.id(),
                stage = %previous.stage(),
                next = id,
                "A problem is already active; recovering and cleaning it up. \
                 In-flight work is discarded"
            );
            if let Err(e) = self.teardown(&mut previous).await {
                error!(
                    problem_id = previous.id(),
                    error = %e,
                    "Teardown of previous problem failed"
                );
            }
        }

        // The problem sits in the active slot from here on, so an interrupted
        // start is still recovered by `shutdown`.
        let problem = active.insert(self.platform.build_problem(&definition)?);
        info!(problem_id = id, namespace = problem.namespace(), "Starting problem");

        if let Err(e) = problem.deploy().await {
            error!(problem_id = id, error = %e, "Deploy failed");
            *active = None;
            return Err(e);
        }

        let prepared = match problem.inject_fault().await {
            Ok(()) if definition.workload => problem.start_workload().await,
            Ok(()) => Ok(()),
            Err(e) => Err(e),
        };
        let prepared = prepared.and_then(|()| problem.await_submission());

        if let Err(e) = prepared {
            error!(problem_id = id, stage = %problem.stage(), error = %e, "Problem setup failed");
            if let Err(teardown) = self.teardown(problem).await {
                error!(problem_id = id, error = %teardown, "Teardown after failed setup failed");
            }
            *active = None;
            return Err(e);
        }

        info!(problem_id = id, "Awaiting submission");
        Ok(())
    }

    /// Routes one line of agent input: the submission marker triggers
    /// grading, anything else is relayed to the cluster verbatim.
    pub async fn handle_input(&self, line: &str) -> Result<Reply> {
        if self.is_submission(line) {
            self.submit(line).await.map(Reply::Graded)
        } else {
            self.relay(line).await.map(Reply::Output)
        }
    }

    pub fn is_submission(&self, line: &str) -> bool {
        let text = line.trim_start();
        let text = text.strip_prefix("```").map_or(text, str::trim_start);
        text.starts_with(&self.submit_marker)
    }

    /// Passes a command to the cluster without interpreting it.
    pub async fn relay(&self, command: &str) -> Result<String> {
        self.platform.cluster().exec(command).await
    }

    /// Grades a submission, persists the verdict, then recovers and cleans
    /// up the problem.
    ///
    /// A concurrent call is rejected while one is in flight. A malformed
    /// submission leaves the problem awaiting a valid one.
    pub async fn submit(&self, raw: &str) -> Result<Verdict> {
        if self.grading.swap(true, Ordering::SeqCst) {
            return Err(Error::invariant("a submission is already being graded"));
        }
        let _reset = scopeguard::guard(&self.grading, |flag| flag.store(false, Ordering::SeqCst));

        let mut active = self.active.lock().await;
        let Some(problem) = active.as_mut() else {
            return Err(Error::invariant(
                "no active problem; use `start <problem_id>` first",
            ));
        };

        let answer = Answer::parse(raw, &self.submit_marker)?;
        let env = GradingEnv {
            cluster: self.platform.cluster(),
            workload: self.platform.workload(),
        };
        let verdict = problem.grade(&answer, &env).await?;
        *lock(&self.last_verdict) = Some(verdict.clone());

        let persisted = self.store.persist(&verdict);
        if let Ok(path) = &persisted {
            *lock(&self.last_artifact) = Some(path.clone());
        }

        let finished = self.teardown(problem).await;
        *active = None;

        persisted?;
        finished?;
        Ok(verdict)
    }

    /// Recovers and cleans up the active problem, if any.
    pub async fn finish(&self) -> Result<()> {
        let mut active = self.active.lock().await;
        let Some(mut problem) = active.take() else {
            return Ok(());
        };
        info!(problem_id = problem.id(), stage = %problem.stage(), "Finishing problem");
        self.teardown(&mut problem).await
    }

    /// Session exit path: finishes the active problem and removes
    /// standalone deployments.
    pub async fn shutdown(&self) -> Result<()> {
        let finished = self.finish().await;
        let standalone: Vec<String> = lock(&self.standalone).iter().cloned().collect();
        for name in standalone {
            if let Err(e) = self.undeploy_app(&name).await {
                warn!(application = %name, error = %e, "Standalone application cleanup failed");
            }
        }
        finished
    }

    /// Runs `interaction` against a freshly started problem and always
    /// finishes the problem afterwards, whether the interaction returns,
    /// fails or panics.
    pub async fn run_session<F, Fut, T>(&self, id: &str, interaction: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let outcome = match self.start_problem(id).await {
            Ok(()) => AssertUnwindSafe(interaction())
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(Error::invariant("session interaction panicked"))),
            Err(e) => Err(e),
        };
        let finished = self.finish().await;
        let value = outcome?;
        finished?;
        Ok(value)
    }

    /// Recovery followed by cleanup.
    async fn teardown(&self, problem: &mut Problem) -> Result<()> {
        let recovered = self.recover_with_retry(problem).await;
        if problem.fault_armed() {
            return recovered;
        }
        if !matches!(
            problem.stage(),
            Stage::Graded | Stage::Recovered | Stage::Failed | Stage::CleanedUp
        ) {
            problem.fail("torn down before grading");
        }
        let cleaned = problem.cleanup().await;
        if let Err(e) = &cleaned {
            error!(problem_id = problem.id(), error = %e, "Cleanup failed");
        }
        recovered.and(cleaned)
    }

    /// Recovers the fault, retrying exactly once before failing the problem.
    async fn recover_with_retry(&self, problem: &mut Problem) -> Result<()> {
        let Err(first) = problem.recover_fault().await else {
            return Ok(());
        };
        warn!(problem_id = problem.id(), error = %first, "Fault recovery failed, retrying once");
        match problem.recover_fault().await {
            Ok(()) => Ok(()),
            Err(second) => {
                error!(
                    problem_id = problem.id(),
                    fault = %problem.fault().name,
                    error = %second,
                    "Fault recovery failed twice"
                );
                problem.fail("fault recovery failed");
                Err(second)
            }
        }
    }
}
