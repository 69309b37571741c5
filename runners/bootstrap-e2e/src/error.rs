//! Runner-specific error types.

use convergence::ConvergenceError;
use host_tools::HostToolError;
use thiserror::Error;

/// Errors raised while setting up a bootstrap run.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Invalid or missing configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Engine setup error
    #[error("Convergence error: {0}")]
    Convergence(#[from] ConvergenceError),

    /// Collaborator setup error
    #[error("Host tool error: {0}")]
    HostTools(#[from] HostToolError),
}

impl RunnerError {
    /// Invalid value for an environment variable
    pub fn invalid(var: &str, value: &str, reason: impl std::fmt::Display) -> Self {
        Self::InvalidConfig(format!("{var}={value:?}: {reason}"))
    }
}
