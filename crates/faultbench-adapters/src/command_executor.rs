//! Shell command executor.
//!
//! Runs a command line through a shell with captured output, optional
//! stdin, environment overrides and an optional timeout. On timeout the
//! child receives SIGTERM and the result is marked `timed_out`.

use faultbench_proto::{Error, Result};
#[cfg(unix)]
use nix::sys::signal::{Signal, kill};
#[cfg(unix)]
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// How long a timed-out child gets to exit after SIGTERM.
const TERM_GRACE: Duration = Duration::from_secs(2);

/// Result of one command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Captured stdout, one trailing newline per line.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Whether the command exited 0 within the timeout.
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Whether the command was terminated due to timeout.
    pub timed_out: bool,
}

impl ExecutionResult {
    /// Stdout followed by stderr, the way a terminal would show both.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        out.push_str(&self.stderr);
        out
    }
}

/// Runs command lines through `<shell> -c`.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    shell: String,
    timeout: Option<Duration>,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new("sh")
    }
}

impl CommandExecutor {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            timeout: None,
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Executes `command`, feeding `stdin` to the child when given.
    ///
    /// Only spawn and pipe failures are errors; a non-zero exit or a timeout
    /// is reported through [`ExecutionResult`].
    pub async fn execute(
        &self,
        command: &str,
        stdin: Option<&str>,
    ) -> std::io::Result<ExecutionResult> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(command);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() });
        cmd.envs(&self.env);
        cmd.kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        debug!(shell = %self.shell, command = %command, "Spawning command");
        let mut child = cmd.spawn()?;

        let stdin_pipe = child.stdin.take();
        let stdout_handle = child.stdout.take();
        let stderr_handle = child.stderr.take();

        // Stdin is fed while both output pipes drain, all under the timeout, so
        // neither a child that never reads nor a chatty stderr can stall us.
        let streams = async {
            let stdin_future = async move {
                if let (Some(input), Some(mut pipe)) = (stdin, stdin_pipe) {
                    match pipe.write_all(input.as_bytes()).await {
                        Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                            debug!("Child closed stdin before reading all input");
                        }
                        other => other?,
                    }
                }
                Ok::<_, std::io::Error>(())
            };
            let stdout_future = async {
                let mut out = String::new();
                if let Some(stdout) = stdout_handle {
                    let mut lines = BufReader::new(stdout).lines();
                    while let Some(line) = lines.next_line().await? {
                        out.push_str(&line);
                        out.push('\n');
                    }
                }
                Ok::<_, std::io::Error>(out)
            };
            let stderr_future = async {
                let mut out = String::new();
                if let Some(stderr) = stderr_handle {
                    let mut lines = BufReader::new(stderr).lines();
                    while let Some(line) = lines.next_line().await? {
                        out.push_str(&line);
                        out.push('\n');
                    }
                }
                Ok::<_, std::io::Error>(out)
            };
            let ((), stdout, stderr) =
                tokio::try_join!(stdin_future, stdout_future, stderr_future)?;
            Ok::<_, std::io::Error>((stdout, stderr))
        };

        let mut timed_out = false;
        let (stdout, stderr) = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, streams).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(
                        command = %command,
                        timeout_secs = limit.as_secs(),
                        "Command timed out, sending SIGTERM"
                    );
                    timed_out = true;
                    terminate_child(&mut child);
                    (String::new(), String::new())
                }
            },
            None => streams.await?,
        };

        let status = if timed_out {
            match tokio::time::timeout(TERM_GRACE, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!(command = %command, "Command ignored SIGTERM, killing");
                    child.kill().await?;
                    child.wait().await?
                }
            }
        } else {
            child.wait().await?
        };

        Ok(ExecutionResult {
            stdout,
            stderr,
            success: status.success() && !timed_out,
            exit_code: status.code(),
            timed_out,
        })
    }

    /// Executes `command` and returns its stdout, mapping failure to
    /// [`Error::Platform`] with the captured stderr.
    pub async fn run(&self, command: &str) -> Result<String> {
        self.run_with_stdin(command, None).await
    }

    pub async fn run_with_stdin(&self, command: &str, stdin: Option<&str>) -> Result<String> {
        let result = self
            .execute(command, stdin)
            .await
            .map_err(|e| Error::platform(command, e.to_string()))?;
        if result.timed_out {
            let limit = self.timeout.unwrap_or_default();
            return Err(Error::platform(command, format!("timed out after {}s", limit.as_secs())));
        }
        if !result.success {
            let message = match result.stderr.trim() {
                "" => match result.exit_code {
                    Some(code) => format!("exit status {code}"),
                    None => "exit status unknown".to_string(),
                },
                stderr => stderr.to_string(),
            };
            return Err(Error::platform(command, message));
        }
        Ok(result.stdout)
    }
}

/// Sends SIGTERM to a child process.
#[cfg(unix)]
pub(crate) fn terminate_child(child: &mut tokio::process::Child) {
    if let Some(pid) = child.id() {
        let pid = Pid::from_raw(pid as i32);
        debug!(%pid, "Sending SIGTERM to child process");
        let _ = kill(pid, Signal::SIGTERM);
    }
}

#[cfg(not(unix))]
pub(crate) fn terminate_child(child: &mut tokio::process::Child) {
    let _ = child.start_kill();
}

/// Quotes a value for inclusion in a `sh -c` command line.
pub fn shell_quote(value: &str) -> String {
    let plain = |c: char| {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | ',' | '@')
    };
    let safe = !value.is_empty() && value.chars().all(plain);
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}
