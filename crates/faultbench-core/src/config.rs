//! Configuration types for faultbench.
//!
//! Everything is loaded from one YAML file (default `faultbench.yml`). Every
//! section is optional and falls back to the defaults below.

use crate::agent_registry::AgentRegistration;
use crate::convergence::{Backoff, PollPolicy};
use crate::problem::ProblemDefinition;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Injector backends built into faultbench.
pub const BUILTIN_INJECTORS: &[&str] = &["feature_flag", "kube_patch"];

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArenaConfig {
    #[serde(default)]
    pub conductor: ConductorConfig,

    #[serde(default)]
    pub convergence: ConvergenceConfig,

    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Target applications problems can bind to.
    #[serde(default)]
    pub applications: Vec<ApplicationConfig>,

    /// Problem catalog.
    #[serde(default)]
    pub problems: Vec<ProblemDefinition>,

    #[serde(default)]
    pub injectors: InjectorsConfig,

    /// Agents registered at startup.
    #[serde(default)]
    pub agents: Vec<AgentRegistration>,

    /// Remote submission endpoint used by `HttpSubmitTransport`.
    #[serde(default)]
    pub submit_endpoint: Option<String>,
}

impl ArenaConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        debug!(path = %path_ref.display(), "Loading configuration from file");
        let content = std::fs::read_to_string(path_ref)?;
        let config: Self = serde_yaml::from_str(&content)?;
        debug!(
            applications = config.applications.len(),
            problems = config.problems.len(),
            agents = config.agents.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// Returns non-fatal warnings, or the first fatal error found.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        let mut warnings = Vec::new();

        if self.convergence.timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "convergence.timeout_seconds must be greater than zero".to_string(),
            ));
        }
        if self.convergence.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "convergence.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.cluster.command_timeout_seconds == 0 || self.conductor.relay_timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "command timeouts must be greater than zero".to_string(),
            ));
        }
        if self.conductor.submit_marker.trim().is_empty() {
            return Err(ConfigError::Validation(
                "conductor.submit_marker must not be empty".to_string(),
            ));
        }
        if !self
            .injectors
            .kube_patch
            .taint
            .split_once('=')
            .is_some_and(|(key, value)| !key.is_empty() && !value.is_empty())
        {
            return Err(ConfigError::Validation(format!(
                "injectors.kube_patch.taint must be key=value, got '{}'",
                self.injectors.kube_patch.taint
            )));
        }

        let mut app_names = HashSet::new();
        for app in &self.applications {
            if !app_names.insert(app.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "application '{}' is defined more than once",
                    app.name
                )));
            }
            if app.deploy_command.is_none() {
                warnings.push(ConfigWarning::InvalidValue {
                    field: format!("applications.{}.deploy_command", app.name),
                    message: "No deploy command; the application is assumed to be running"
                        .to_string(),
                });
            }
        }

        let mut problem_ids = HashSet::new();
        for problem in &self.problems {
            problem
                .validate()
                .map_err(|e| ConfigError::Validation(e.to_string()))?;
            if !problem_ids.insert(problem.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "problem id '{}' is defined more than once",
                    problem.id
                )));
            }
            if !app_names.contains(problem.application.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "problem '{}' references unknown application '{}'",
                    problem.id, problem.application
                )));
            }
            if !BUILTIN_INJECTORS.contains(&problem.injector.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "problem '{}' references unknown injector '{}'",
                    problem.id, problem.injector
                )));
            }
            let no_workload_commands = self.application(&problem.application).is_some_and(|a| {
                a.workload_command.is_none() && a.workload_start_command.is_none()
            });
            if problem.workload && no_workload_commands {
                warnings.push(ConfigWarning::InvalidValue {
                    field: format!("problems.{}.workload", problem.id),
                    message: format!(
                        "Application '{}' has no workload commands; workload step is a no-op",
                        problem.application
                    ),
                });
            }
        }

        if self.problems.is_empty() {
            warnings.push(ConfigWarning::InvalidValue {
                field: "problems".to_string(),
                message: "No problems defined; `start` has nothing to run".to_string(),
            });
        }

        let mut agent_names = HashSet::new();
        for agent in &self.agents {
            if !agent_names.insert(agent.name.as_str()) {
                warnings.push(ConfigWarning::InvalidValue {
                    field: format!("agents.{}", agent.name),
                    message: "Agent registered twice; the last entry wins".to_string(),
                });
            }
        }

        Ok(warnings)
    }

    pub fn application(&self, name: &str) -> Option<&ApplicationConfig> {
        self.applications.iter().find(|a| a.name == name)
    }

    /// Polling policy for convergence waits.
    pub fn poll_policy(&self) -> PollPolicy {
        self.convergence.policy()
    }
}

/// Conductor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConductorConfig {
    /// Directory verdict artifacts are written to.
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    /// Prefix that marks an input line as the final submission.
    #[serde(default = "default_submit_marker")]
    pub submit_marker: String,

    /// Shell used to relay investigative commands.
    #[serde(default = "default_shell")]
    pub shell: String,

    #[serde(default = "default_relay_timeout")]
    pub relay_timeout_seconds: u64,
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_submit_marker() -> String {
    "submit(".to_string()
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_relay_timeout() -> u64 {
    60
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            results_dir: default_results_dir(),
            submit_marker: default_submit_marker(),
            shell: default_shell(),
            relay_timeout_seconds: default_relay_timeout(),
        }
    }
}

/// Bounded-wait settings for rollouts and readiness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceConfig {
    #[serde(default = "default_convergence_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub backoff: Backoff,

    #[serde(default = "default_max_interval")]
    pub max_interval_ms: u64,
}

fn default_convergence_timeout() -> u64 {
    120
}

fn default_poll_interval() -> u64 {
    2000
}

fn default_max_interval() -> u64 {
    15000
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_convergence_timeout(),
            poll_interval_ms: default_poll_interval(),
            backoff: Backoff::default(),
            max_interval_ms: default_max_interval(),
        }
    }
}

impl ConvergenceConfig {
    pub fn policy(&self) -> PollPolicy {
        PollPolicy {
            timeout: Duration::from_secs(self.timeout_seconds),
            interval: Duration::from_millis(self.poll_interval_ms),
            backoff: self.backoff,
            max_interval: Duration::from_millis(self.max_interval_ms),
        }
    }
}

/// Orchestrator CLI settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_kubectl")]
    pub kubectl: String,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u64,
}

fn default_kubectl() -> String {
    "kubectl".to_string()
}

fn default_command_timeout() -> u64 {
    60
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            kubectl: default_kubectl(),
            command_timeout_seconds: default_command_timeout(),
        }
    }
}

/// A target application driven through shell commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub name: String,

    pub namespace: String,

    #[serde(default)]
    pub frontend_service: Option<String>,

    #[serde(default)]
    pub frontend_port: Option<u16>,

    /// Provisions the application (e.g. `helm install ...`).
    #[serde(default)]
    pub deploy_command: Option<String>,

    #[serde(default)]
    pub cleanup_command: Option<String>,

    /// Kicks off background load when the problem enters the workload stage.
    #[serde(default)]
    pub workload_start_command: Option<String>,

    /// Load generator invocation; its output is the workload report.
    #[serde(default)]
    pub workload_command: Option<String>,

    /// Pods waited on after deploy, e.g. `app.kubernetes.io/part-of=shop`.
    #[serde(default)]
    pub ready_selector: Option<String>,
}

/// Injector backend settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InjectorsConfig {
    #[serde(default)]
    pub feature_flag: FeatureFlagConfig,

    #[serde(default)]
    pub kube_patch: KubePatchConfig,
}

/// Settings for faults applied by editing workload objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubePatchConfig {
    /// Pod label whose value is the target name, e.g. `app=frontend`.
    #[serde(default = "default_target_label")]
    pub target_label: String,

    /// Node taint used by scheduling faults, as `key=value`.
    #[serde(default = "default_taint")]
    pub taint: String,
}

fn default_target_label() -> String {
    "app".to_string()
}

fn default_taint() -> String {
    "sre-fault=blocked".to_string()
}

impl Default for KubePatchConfig {
    fn default() -> Self {
        Self {
            target_label: default_target_label(),
            taint: default_taint(),
        }
    }
}

/// Where the flag daemon keeps its flag document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlagConfig {
    #[serde(default = "default_flag_configmap")]
    pub configmap: String,

    #[serde(default = "default_flag_deployment")]
    pub deployment: String,

    /// Key under the ConfigMap's `data` holding the flag document.
    #[serde(default = "default_flags_key")]
    pub flags_key: String,
}

fn default_flag_configmap() -> String {
    "flagd-config".to_string()
}

fn default_flag_deployment() -> String {
    "flagd".to_string()
}

fn default_flags_key() -> String {
    "demo.flagd.json".to_string()
}

impl Default for FeatureFlagConfig {
    fn default() -> Self {
        Self {
            configmap: default_flag_configmap(),
            deployment: default_flag_deployment(),
            flags_key: default_flags_key(),
        }
    }
}

/// Configuration warnings emitted during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// Field has a questionable value.
    InvalidValue { field: String, message: String },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::InvalidValue { field, message } => {
                write!(f, "Warning [{}]: {}", field, message)
            }
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

impl From<ConfigError> for faultbench_proto::Error {
    fn from(err: ConfigError) -> Self {
        faultbench_proto::Error::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
conductor:
  results_dir: out
convergence:
  timeout_seconds: 30
  backoff: exponential
applications:
  - name: astronomy-shop
    namespace: astronomy-shop
    frontend_service: frontend-proxy
    frontend_port: 8080
    deploy_command: "helm install astronomy-shop ./charts"
problems:
  - id: ad_service_failure
    application: astronomy-shop
    fault:
      name: adServiceFailure
      kind: feature_flag
      targets: [ad]
    oracles:
      detection:
        kind: detection
        expected: "Yes"
      localization:
        kind: localization
        expected: ["ad"]
"#;

    #[test]
    fn test_default_config() {
        let config = ArenaConfig::default();
        assert_eq!(config.conductor.submit_marker, "submit(");
        assert_eq!(config.conductor.results_dir, PathBuf::from("results"));
        assert_eq!(config.convergence.timeout_seconds, 120);
        assert_eq!(config.cluster.kubectl, "kubectl");
        assert_eq!(config.injectors.feature_flag.deployment, "flagd");
        assert_eq!(config.injectors.kube_patch.taint, "sre-fault=blocked");
        assert!(config.submit_endpoint.is_none());
    }

    #[test]
    fn test_parse_sample() {
        let config: ArenaConfig = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.conductor.results_dir, PathBuf::from("out"));
        assert_eq!(config.conductor.shell, "sh");
        assert_eq!(config.convergence.backoff, Backoff::Exponential);
        assert_eq!(config.problems.len(), 1);
        assert_eq!(config.problems[0].injector, "feature_flag");
        assert_eq!(config.problems[0].oracles.len(), 2);

        let policy = config.poll_policy();
        assert_eq!(policy.timeout, Duration::from_secs(30));
        assert_eq!(policy.interval, Duration::from_millis(2000));
    }

    #[test]
    fn test_validate_sample() {
        let config: ArenaConfig = serde_yaml::from_str(SAMPLE).unwrap();
        let warnings = config.validate().unwrap();
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
    }

    #[test]
    fn test_unknown_application_is_fatal() {
        let mut config: ArenaConfig = serde_yaml::from_str(SAMPLE).unwrap();
        config.problems[0].application = "hotel-reservation".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unknown application 'hotel-reservation'"));
    }

    #[test]
    fn test_injector_names_are_checked() {
        let mut config: ArenaConfig = serde_yaml::from_str(SAMPLE).unwrap();
        config.problems[0].injector = "kube_patch".to_string();
        assert!(config.validate().is_ok());

        config.problems[0].injector = "chaos_mesh".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unknown injector 'chaos_mesh'"));
    }

    #[test]
    fn test_malformed_taint_is_fatal() {
        let mut config = ArenaConfig::default();
        config.injectors.kube_patch.taint = "sre-fault".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_duplicate_problem_is_fatal() {
        let mut config: ArenaConfig = serde_yaml::from_str(SAMPLE).unwrap();
        let dup = config.problems[0].clone();
        config.problems.push(dup);
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_zero_timeout_is_fatal() {
        let mut config = ArenaConfig::default();
        config.convergence.timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_catalog_warns() {
        let warnings = ArenaConfig::default().validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].to_string().starts_with("Warning [problems]"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faultbench.yml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = ArenaConfig::from_file(&path).unwrap();
        assert_eq!(config.applications[0].frontend_port, Some(8080));

        let missing = ArenaConfig::from_file(dir.path().join("nope.yml"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }
}
