//! # faultbench-adapters
//!
//! Concrete implementations of the faultbench collaborator traits.
//!
//! This crate provides:
//! - A shell command executor with timeout and SIGTERM termination
//! - `KubectlCluster`, cluster control over the `kubectl` CLI
//! - `FeatureFlagInjector`, the flagd ConfigMap fault backend
//! - `KubePatchInjector`, faults applied by editing Deployments, tainting
//!   nodes and adding deny-all NetworkPolicies
//! - `ShellApplication` and `CommandWorkload`, applications and load
//!   generators driven by configured commands
//! - `AgentLauncher`, supervised agent subprocesses
//! - `HttpSubmitTransport` for agents that submit over HTTP
//!
//! ## Dependency check
//!
//! The `dependency_check` module verifies at startup that the binaries the
//! adapters shell out to are on PATH.

mod application;
mod command_executor;
mod dependency_check;
mod feature_flag;
mod http_transport;
mod kube_patch;
mod kubectl;
mod launcher;
mod workload;

pub use application::ShellApplication;
pub use command_executor::{CommandExecutor, ExecutionResult, shell_quote};
pub use dependency_check::{MissingDependencyError, check_dependencies, find_binary};
pub use feature_flag::{FeatureFlagInjector, FlagDocument, FlagFormat, strip_server_fields};
pub use http_transport::HttpSubmitTransport;
pub use kube_patch::{
    AppliedFault, FAULT_ANNOTATION, KubePatchInjector, SavedField, fault_visible, set_pointer,
};
pub use kubectl::{KubectlCluster, parse_pod_readiness, rollout_progress};
pub use launcher::{AgentHandle, AgentLauncher, DEFAULT_GRACE};
pub use workload::CommandWorkload;
