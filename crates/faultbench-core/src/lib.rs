//! # faultbench-core
//!
//! Benchmark orchestration engine for faultbench.
//!
//! This crate provides:
//! - The problem lifecycle state machine and the fault lease that makes
//!   recovery mandatory
//! - The oracle framework (detection, localization, mitigation, workload,
//!   compound)
//! - The conductor that drives one active problem and persists verdicts
//! - Configuration loading and validation
//! - Bounded convergence polling
//! - The agent registration registry and the submission transport
//! - In-process test doubles (`testing`)

mod agent_registry;
mod answer;
mod conductor;
mod config;
pub mod convergence;
pub mod oracle;
mod platform;
mod problem;
mod problem_registry;
pub mod testing;
mod transport;
mod verdict_store;

pub use agent_registry::{AgentRegistration, AgentRegistry};
pub use answer::Answer;
pub use conductor::{Conductor, Reply};
pub use config::{
    ApplicationConfig, ArenaConfig, BUILTIN_INJECTORS, ClusterConfig, ConductorConfig,
    ConfigError, ConfigWarning, ConvergenceConfig, FeatureFlagConfig, InjectorsConfig,
    KubePatchConfig,
};
pub use convergence::{Backoff, PollPolicy, Progress, wait_until};
pub use oracle::{EvaluationContext, Oracle};
pub use platform::{InjectorFactory, Platform};
pub use problem::{FaultLease, GradingEnv, Problem, ProblemDefinition};
pub use problem_registry::ProblemRegistry;
pub use transport::{InProcessTransport, SubmissionOutcome, submit_answer};
pub use verdict_store::VerdictStore;
