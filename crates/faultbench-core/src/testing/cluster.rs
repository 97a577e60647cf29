//! Cluster double with scripted command output and pod readiness.

use super::lock;
use async_trait::async_trait;
use faultbench_proto::{ClusterControl, Error, Readiness, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct Inner {
    outputs: Mutex<HashMap<String, String>>,
    readiness: Mutex<HashMap<String, Readiness>>,
    commands: Mutex<Vec<String>>,
}

/// In-memory [`ClusterControl`]. Clones share state.
///
/// Unscripted commands echo back `ran: <command>`. Unknown selectors report
/// zero pods.
#[derive(Debug, Clone, Default)]
pub struct FakeCluster {
    inner: Arc<Inner>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the output of one exact command line.
    pub fn with_output(self, command: &str, output: &str) -> Self {
        lock(&self.inner.outputs).insert(command.to_string(), output.to_string());
        self
    }

    /// Sets readiness for `namespace/selector`.
    pub fn set_readiness(&self, namespace: &str, selector: &str, ready: u32, total: u32) {
        lock(&self.inner.readiness).insert(key(namespace, selector), Readiness { ready, total });
    }

    /// Commands executed so far, in order.
    pub fn commands(&self) -> Vec<String> {
        lock(&self.inner.commands).clone()
    }
}

fn key(namespace: &str, selector: &str) -> String {
    format!("{namespace}/{selector}")
}

#[async_trait]
impl ClusterControl for FakeCluster {
    async fn exec(&self, command: &str) -> Result<String> {
        lock(&self.inner.commands).push(command.to_string());
        if command.trim() == "false" {
            return Err(Error::platform(command, "exit status 1"));
        }
        Ok(lock(&self.inner.outputs)
            .get(command)
            .cloned()
            .unwrap_or_else(|| format!("ran: {command}")))
    }

    async fn readiness(&self, namespace: &str, selector: &str) -> Result<Readiness> {
        Ok(lock(&self.inner.readiness)
            .get(&key(namespace, selector))
            .copied()
            .unwrap_or_default())
    }

    async fn wait_for_ready(
        &self,
        namespace: &str,
        selector: &str,
        timeout: Duration,
    ) -> Result<()> {
        let readiness = self.readiness(namespace, selector).await?;
        if readiness.is_ready() {
            Ok(())
        } else {
            Err(Error::ConvergenceTimeout {
                target: key(namespace, selector),
                waited: timeout,
                last_status: readiness.to_string(),
            })
        }
    }
}
