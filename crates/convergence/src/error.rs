//! Convergence errors
//!
//! Everything here is fatal to the run that raised it. Observation mismatches
//! and accessor failures during polling are not errors; they only surface
//! through [`ConvergenceError::Timeout`] once the budget is exhausted.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the polling, readiness and provisioning machinery.
#[derive(Debug, Error)]
pub enum ConvergenceError {
    /// Deadline reached without the observed value matching the target
    #[error("timed out after {elapsed:?} waiting for {what}: expected {expected}, last observed {last_observed}")]
    Timeout {
        /// What was being waited on
        what: String,
        /// Human readable target
        expected: String,
        /// Last value (or accessor failure) seen before the deadline
        last_observed: String,
        /// Wall-clock time spent polling
        elapsed: Duration,
    },

    /// The run was cancelled (suite deadline or operator interrupt)
    #[error("cancelled while waiting for {0}")]
    Cancelled(String),

    /// Poll budget violates its invariants
    #[error("invalid poll budget: {0}")]
    InvalidBudget(String),

    /// Resource kind string not recognised
    #[error("unknown resource kind: {0}")]
    UnknownResourceKind(String),

    /// Resource kind has no entry in the readiness matrix
    #[error("no readiness conditions defined for resource kind {0}")]
    NoReadinessConditions(String),

    /// Node index range is empty or reversed
    #[error("invalid node range: {0}")]
    InvalidNodeRange(String),

    /// A single node worker failed
    #[error("node {index} ({hostname}) failed: {reason}")]
    Worker {
        /// Node index
        index: u32,
        /// Node hostname
        hostname: String,
        /// Failure description (error text or panic message)
        reason: String,
    },

    /// One or more workers of a provisioning phase failed
    #[error("phase {phase} failed on {} node(s): {}", failures.len(), NodeFailures(failures))]
    PhaseFailed {
        /// Phase name
        phase: String,
        /// Every failed worker, ordered by node index
        failures: Vec<ConvergenceError>,
    },

    /// An external collaborator (kubectl, ssh, hypervisor, network file) failed
    #[error("{operation} failed: {message}")]
    Collaborator {
        /// Operation that failed
        operation: String,
        /// Collaborator error text
        message: String,
    },
}

impl ConvergenceError {
    /// Wrap a collaborator error with the operation that produced it
    pub fn collaborator(operation: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::Collaborator {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    /// Whether this error is (or only contains) cancellation
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled(_) => true,
            Self::PhaseFailed { failures, .. } => {
                !failures.is_empty() && failures.iter().all(Self::is_cancellation)
            }
            _ => false,
        }
    }
}

struct NodeFailures<'a>(&'a [ConvergenceError]);

impl fmt::Display for NodeFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}
