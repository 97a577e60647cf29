//! # faultbench-proto
//!
//! Shared types, error definitions, and traits for the faultbench harness.
//!
//! This crate provides the foundational abstractions used across all
//! faultbench crates, including:
//! - The problem lifecycle `Stage`
//! - Fault descriptors and fault status
//! - Oracle results and the persisted `Verdict`
//! - Collaborator traits for applications, cluster control, fault
//!   injectors, workload generators and submission transports
//! - The error taxonomy shared by every layer

mod collaborators;
mod error;
mod fault;
mod stage;
mod verdict;

pub use collaborators::{
    Application, ClusterControl, FaultInjector, HealthReport, Readiness, SubmissionTransport,
    SubmitResponse, WorkloadGenerator,
};
pub use error::{Error, Result};
pub use fault::{FaultDescriptor, FaultKind, FaultStatus};
pub use stage::Stage;
pub use verdict::{OracleName, OracleResult, Verdict};
