//! Bounded polling for eventually-consistent cluster state.
//!
//! Every wait on the cluster (rollouts, pod readiness, flag propagation) goes
//! through [`wait_until`], which never waits past the policy's hard timeout.

use faultbench_proto::{Error, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Interval growth between polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    #[default]
    Fixed,
    /// Doubles the interval after every pending check, capped at `max_interval`.
    Exponential,
}

/// Timing of a convergence wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub timeout: Duration,
    pub interval: Duration,
    pub backoff: Backoff,
    pub max_interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            interval: Duration::from_secs(2),
            backoff: Backoff::Fixed,
            max_interval: Duration::from_secs(15),
        }
    }
}

impl PollPolicy {
    pub fn fixed(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval,
            backoff: Backoff::Fixed,
            max_interval: interval,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn next_interval(&self, current: Duration) -> Duration {
        match self.backoff {
            Backoff::Fixed => current,
            Backoff::Exponential => (current * 2).min(self.max_interval.max(self.interval)),
        }
    }
}

/// One observation made by a readiness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress<T> {
    /// The awaited state is visible.
    Ready(T),
    /// Not there yet; the string describes what was observed.
    Pending(String),
}

/// Polls `check` until it reports [`Progress::Ready`] or the policy times out.
///
/// Check errors are returned immediately. Each check is cut off at the
/// deadline. On timeout the error carries the last pending status.
pub async fn wait_until<T, F, Fut>(policy: PollPolicy, target: &str, mut check: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Progress<T>>>,
{
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let mut interval = policy.interval;
    let mut attempts: u32 = 0;
    let mut last_status = String::from("no observation yet");

    loop {
        attempts += 1;
        // A check that outlives the deadline counts as one more pending observation.
        let remaining = deadline.saturating_duration_since(Instant::now());
        let Ok(observation) = tokio::time::timeout(remaining, check()).await else {
            return Err(Error::ConvergenceTimeout {
                target: target.to_string(),
                waited: started.elapsed(),
                last_status,
            });
        };
        last_status = match observation? {
            Progress::Ready(value) => {
                debug!(
                    waiting_on = target,
                    attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Converged"
                );
                return Ok(value);
            }
            Progress::Pending(status) => status,
        };

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::ConvergenceTimeout {
                target: target.to_string(),
                waited: started.elapsed(),
                last_status,
            });
        }

        debug!(waiting_on = target, attempts, status = %last_status, "Waiting for convergence");
        let sleep_for = interval.min(deadline - now);
        tokio::time::sleep(sleep_for).await;
        interval = policy.next_interval(interval);
    }
}
