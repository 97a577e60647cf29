//! Supervised agent subprocesses.
//!
//! The launcher owns at most one live process per agent name. Output is
//! drained on background tasks so a chatty agent never blocks the session.

use crate::command_executor::terminate_child;
use chrono::{DateTime, Utc};
use faultbench_core::AgentRegistration;
use faultbench_proto::{Error, Result};
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default time between SIGTERM and SIGKILL.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// A snapshot of one launched agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentHandle {
    pub name: String,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    /// True when an already-running process was returned instead of a new one.
    pub reused: bool,
}

struct AgentProcess {
    child: Child,
    started_at: DateTime<Utc>,
}

impl AgentProcess {
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

/// Starts and stops registered agents.
pub struct AgentLauncher {
    procs: Mutex<BTreeMap<String, AgentProcess>>,
    grace: Duration,
    echo: bool,
}

impl Default for AgentLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentLauncher {
    pub fn new() -> Self {
        Self {
            procs: Mutex::new(BTreeMap::new()),
            grace: DEFAULT_GRACE,
            echo: true,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Whether agent output is echoed to stdout as `[name] line`.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Starts the agent unless a process for its name is still running.
    pub async fn ensure_started(&self, registration: &AgentRegistration) -> Result<AgentHandle> {
        let name = registration.name.as_str();
        let mut procs = self.procs.lock().await;

        if let Some(existing) = procs.get_mut(name) {
            if existing.is_alive() {
                debug!(agent = name, "Agent already running");
                return Ok(AgentHandle {
                    name: name.to_string(),
                    pid: existing.child.id(),
                    started_at: existing.started_at,
                    reused: true,
                });
            }
            debug!(agent = name, "Previous agent process exited, relaunching");
        }

        if registration.command.trim().is_empty() {
            return Err(Error::config(format!("agent '{name}' has an empty command")));
        }

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&registration.command);
        cmd.envs(&registration.env);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        if let Some(workdir) = &registration.workdir {
            cmd.current_dir(workdir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::platform(&registration.command, e.to_string()))?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(drain(name.to_string(), stdout, self.echo));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain(name.to_string(), stderr, self.echo));
        }

        let started_at = Utc::now();
        let pid = child.id();
        info!(agent = name, pid = ?pid, "Agent started");
        procs.insert(name.to_string(), AgentProcess { child, started_at });

        Ok(AgentHandle {
            name: name.to_string(),
            pid,
            started_at,
            reused: false,
        })
    }

    /// Names of agents whose process is still alive.
    pub async fn running(&self) -> Vec<String> {
        let mut procs = self.procs.lock().await;
        procs
            .iter_mut()
            .filter_map(|(name, proc)| proc.is_alive().then(|| name.clone()))
            .collect()
    }

    /// Stops one agent. Returns false when no process was tracked.
    pub async fn stop(&self, name: &str) -> bool {
        let removed = self.procs.lock().await.remove(name);
        match removed {
            Some(proc) => {
                self.terminate(name, proc).await;
                true
            }
            None => false,
        }
    }

    /// Stops every tracked agent.
    pub async fn shutdown(&self) {
        let procs = std::mem::take(&mut *self.procs.lock().await);
        for (name, proc) in procs {
            self.terminate(&name, proc).await;
        }
    }

    async fn terminate(&self, name: &str, mut proc: AgentProcess) {
        if !proc.is_alive() {
            return;
        }
        terminate_child(&mut proc.child);
        match tokio::time::timeout(self.grace, proc.child.wait()).await {
            Ok(status) => debug!(agent = name, status = ?status, "Agent exited"),
            Err(_) => {
                warn!(
                    agent = name,
                    grace_secs = self.grace.as_secs(),
                    "Agent ignored SIGTERM, killing"
                );
                if let Err(e) = proc.child.kill().await {
                    warn!(agent = name, error = %e, "Failed to kill agent");
                }
            }
        }
        info!(agent = name, "Agent stopped");
    }
}

async fn drain<R>(name: String, stream: R, echo: bool)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if echo {
                    println!("[{name}] {line}");
                }
                debug!(agent = %name, "{line}");
            }
            Ok(None) => break,
            Err(e) => {
                debug!(agent = %name, error = %e, "Agent output stream closed");
                break;
            }
        }
    }
}
