//! Fault injector that keeps flag state in memory.

use super::lock;
use async_trait::async_trait;
use faultbench_proto::{
    Error, FaultDescriptor, FaultInjector, FaultStatus, HealthReport, Result,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Inner {
    faults: Mutex<HashMap<String, FaultStatus>>,
    applies: AtomicU32,
    recover_calls: AtomicU32,
    inject_failures: AtomicU32,
    recover_failures: AtomicU32,
    fail_after_apply: Mutex<bool>,
}

/// In-memory [`FaultInjector`]. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeInjector {
    inner: Arc<Inner>,
}

impl FakeInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a known fault, initially off.
    pub fn with_fault(self, name: &str) -> Self {
        lock(&self.inner.faults).insert(name.to_string(), FaultStatus::Off);
        self
    }

    /// Makes the next `n` inject calls fail before applying anything.
    pub fn fail_next_injects(&self, n: u32) {
        self.inner.inject_failures.store(n, Ordering::SeqCst);
    }

    /// Makes the next inject call apply the fault and then report failure,
    /// like a rollout that times out after the change landed.
    pub fn fail_after_apply(&self) {
        *lock(&self.inner.fail_after_apply) = true;
    }

    /// Makes the next `n` recover calls fail.
    pub fn fail_next_recovers(&self, n: u32) {
        self.inner.recover_failures.store(n, Ordering::SeqCst);
    }

    /// Number of state changes actually applied.
    pub fn applies(&self) -> u32 {
        self.inner.applies.load(Ordering::SeqCst)
    }

    pub fn recover_calls(&self) -> u32 {
        self.inner.recover_calls.load(Ordering::SeqCst)
    }

    /// Current status without going through the async trait.
    pub fn current(&self, name: &str) -> FaultStatus {
        lock(&self.inner.faults)
            .get(name)
            .copied()
            .unwrap_or(FaultStatus::Unknown)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn set(&self, name: &str, status: FaultStatus) {
        let mut faults = lock(&self.inner.faults);
        if faults.get(name) != Some(&status) {
            faults.insert(name.to_string(), status);
            self.inner.applies.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl FaultInjector for FakeInjector {
    fn backend(&self) -> &str {
        "fake"
    }

    async fn inject(&self, fault: &FaultDescriptor) -> Result<()> {
        if Self::take_failure(&self.inner.inject_failures) {
            return Err(Error::platform(format!("inject {}", fault.name), "injected failure"));
        }
        self.set(&fault.name, FaultStatus::On);
        let mut fail_after_apply = lock(&self.inner.fail_after_apply);
        if *fail_after_apply {
            *fail_after_apply = false;
            return Err(Error::ConvergenceTimeout {
                target: fault.name.clone(),
                waited: std::time::Duration::from_secs(120),
                last_status: "0/1 ready".to_string(),
            });
        }
        Ok(())
    }

    async fn recover(&self, fault: &FaultDescriptor) -> Result<()> {
        self.inner.recover_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.inner.recover_failures) {
            return Err(Error::platform(format!("recover {}", fault.name), "injected failure"));
        }
        self.set(&fault.name, FaultStatus::Off);
        Ok(())
    }

    async fn status(&self, fault: &FaultDescriptor) -> Result<FaultStatus> {
        Ok(self.current(&fault.name))
    }

    async fn health_check(&self) -> HealthReport {
        HealthReport::from([("memory".to_string(), true)])
    }
}
