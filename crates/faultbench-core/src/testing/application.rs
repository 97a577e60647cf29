//! Application and workload doubles.

use async_trait::async_trait;
use faultbench_proto::{Application, Error, Result, WorkloadGenerator};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
struct Counters {
    deploys: AtomicU32,
    cleanups: AtomicU32,
    workloads: AtomicU32,
    fail_deploy: AtomicBool,
}

/// Application that only counts lifecycle calls. Clones share counters.
#[derive(Debug, Clone)]
pub struct FakeApplication {
    name: String,
    namespace: String,
    counters: Arc<Counters>,
}

impl FakeApplication {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            counters: Arc::default(),
        }
    }

    /// Makes every deploy fail until reset.
    pub fn set_fail_deploy(&self, fail: bool) {
        self.counters.fail_deploy.store(fail, Ordering::SeqCst);
    }

    pub fn deploys(&self) -> u32 {
        self.counters.deploys.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> u32 {
        self.counters.cleanups.load(Ordering::SeqCst)
    }

    pub fn workloads_started(&self) -> u32 {
        self.counters.workloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Application for FakeApplication {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn frontend_service(&self) -> Option<&str> {
        Some("frontend")
    }

    fn frontend_port(&self) -> Option<u16> {
        Some(8080)
    }

    async fn deploy(&self) -> Result<()> {
        if self.counters.fail_deploy.load(Ordering::SeqCst) {
            return Err(Error::platform(format!("deploy {}", self.name), "helm install failed"));
        }
        self.counters.deploys.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        self.counters.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn start_workload(&self) -> Result<()> {
        self.counters.workloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// What a [`ScriptedWorkload`] does when run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadScript {
    /// Returns this report.
    Report(String),
    /// Fails with a platform error carrying this message.
    Fail(String),
    /// Panics with this message.
    Panic(String),
}

/// Load generator returning a scripted report.
#[derive(Debug, Clone)]
pub struct ScriptedWorkload {
    script: WorkloadScript,
    delay: Duration,
}

impl ScriptedWorkload {
    pub fn report(report: &str) -> Self {
        Self {
            script: WorkloadScript::Report(report.to_string()),
            delay: Duration::ZERO,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            script: WorkloadScript::Fail(message.to_string()),
            delay: Duration::ZERO,
        }
    }

    pub fn panicking(message: &str) -> Self {
        Self {
            script: WorkloadScript::Panic(message.to_string()),
            delay: Duration::ZERO,
        }
    }

    /// Sleeps before answering, to keep a grading in flight.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl WorkloadGenerator for ScriptedWorkload {
    async fn run(&self, app: &dyn Application) -> Result<String> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.script {
            WorkloadScript::Report(report) => Ok(report.clone()),
            WorkloadScript::Fail(message) => {
                Err(Error::platform(format!("wrk2 against {}", app.name()), message.clone()))
            }
            WorkloadScript::Panic(message) => panic!("{message}"),
        }
    }
}
