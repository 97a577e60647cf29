//! Error taxonomy shared by the engine and its adapters.

use std::time::Duration;

/// Errors raised while orchestrating a benchmark problem.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed fault or problem definition. Fatal, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The cluster did not reach the expected state within the bound.
    #[error("{target} did not converge within {waited:?} (last status: {last_status})")]
    ConvergenceTimeout {
        /// What was being waited on (deployment, fault flag, pod selector).
        target: String,
        /// How long the wait lasted before giving up.
        waited: Duration,
        /// The last status observed before the deadline.
        last_status: String,
    },

    /// An agent or tool call failed on its way to the engine.
    #[error("transport error: {0}")]
    Transport(String),

    /// An operation was attempted from a stage that does not allow it.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A platform call (kubectl, shell, API) failed.
    #[error("platform call `{command}` failed: {message}")]
    Platform {
        /// The command or call that failed.
        command: String,
        /// Captured error output.
        message: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for [`Error::Configuration`].
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Shorthand for [`Error::InvariantViolation`].
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    /// Shorthand for [`Error::Platform`].
    pub fn platform(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Platform {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Returns the taxonomy class name shown to users.
    pub fn class(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "ConfigurationError",
            Error::ConvergenceTimeout { .. } => "ConvergenceTimeoutError",
            Error::Transport(_) => "TransportError",
            Error::InvariantViolation(_) => "InvariantViolation",
            Error::Platform { .. } => "PlatformError",
            Error::Io(_) => "IoError",
        }
    }

    /// Returns true if the caller may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ConvergenceTimeout { .. } | Error::Platform { .. })
    }
}

/// Result alias used across faultbench crates.
pub type Result<T> = std::result::Result<T, Error>;
