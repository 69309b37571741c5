//! # Poll Budgets
//!
//! Computes how often and for how long a condition is polled.
//!
//! Deadlines grow linearly with the number of entities under test, since the
//! management cluster reconciles hosts and machines more or less one after
//! the other. Intervals never scale: polling frequency is a property of the
//! resource class, not of the workload size.
//!
//! Class table (interval / base deadline):
//! ssh-reachability 5s/10m, remote-command 20s/2m, registration 5s/3m,
//! cluster-status 10s/2m (scaled), elemental-status 20s/2m (scaled).

use crate::error::ConvergenceError;
use std::fmt;
use std::time::Duration;

/// Interval and deadline for one poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    /// Delay between two observations
    pub interval: Duration,
    /// Total time allowed before giving up
    pub deadline: Duration,
}

impl PollBudget {
    /// Build a budget, checking `deadline >= interval` and a non-zero interval
    pub fn new(interval: Duration, deadline: Duration) -> Result<Self, ConvergenceError> {
        if interval.is_zero() {
            return Err(ConvergenceError::InvalidBudget(
                "interval must be greater than zero".to_string(),
            ));
        }
        if deadline < interval {
            return Err(ConvergenceError::InvalidBudget(format!(
                "deadline {deadline:?} is shorter than interval {interval:?}"
            )));
        }
        Ok(Self { interval, deadline })
    }

    /// Stretch the deadline by a run-wide factor (slow CI hosts)
    ///
    /// The interval is left untouched.
    pub fn stretched(self, factor: u32) -> Result<Self, ConvergenceError> {
        if factor == 0 {
            return Err(ConvergenceError::InvalidBudget(
                "timeout scale must be at least 1".to_string(),
            ));
        }
        Self::new(self.interval, self.deadline.saturating_mul(factor))
    }
}

/// Compute a poll budget whose deadline scales with `entity_count`.
///
/// `deadline = base_deadline × entity_count`; the interval is returned as is.
///
/// # Errors
///
/// `entity_count` must be at least 1 and the scaled deadline must not be
/// shorter than the interval.
pub fn budget(
    base_interval: Duration,
    base_deadline: Duration,
    entity_count: u32,
) -> Result<PollBudget, ConvergenceError> {
    if entity_count == 0 {
        return Err(ConvergenceError::InvalidBudget(
            "entity count must be at least 1".to_string(),
        ));
    }
    PollBudget::new(base_interval, base_deadline.saturating_mul(entity_count))
}

/// Classes of observation, each with its own cadence and patience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    /// `echo SSH_OK` over SSH until the node answers
    SshReachability,
    /// Remote command that must eventually exit successfully
    RemoteCommand,
    /// Registration resource appearing in the management cluster
    Registration,
    /// Download of the registration's install configuration
    ConfigDownload,
    /// CAPI `Cluster` status fields
    ClusterStatus,
    /// `ElementalHost` / `ElementalMachine` conditions
    ElementalStatus,
}

impl ResourceClass {
    /// Poll interval for this class
    #[must_use]
    pub fn base_interval(self) -> Duration {
        match self {
            Self::SshReachability | Self::Registration => Duration::from_secs(5),
            Self::ClusterStatus | Self::ConfigDownload => Duration::from_secs(10),
            Self::RemoteCommand | Self::ElementalStatus => Duration::from_secs(20),
        }
    }

    /// Deadline for a single entity
    #[must_use]
    pub fn base_deadline(self) -> Duration {
        match self {
            Self::SshReachability => Duration::from_secs(10 * 60),
            Self::Registration => Duration::from_secs(3 * 60),
            Self::RemoteCommand | Self::ConfigDownload | Self::ClusterStatus | Self::ElementalStatus => {
                Duration::from_secs(2 * 60)
            }
        }
    }

    /// Whether the deadline grows with the number of nodes under test
    #[must_use]
    pub fn scales_with_nodes(self) -> bool {
        matches!(self, Self::ClusterStatus | Self::ElementalStatus)
    }

    /// Budget for this class given the node count and run-wide timeout scale
    pub fn budget(self, node_count: u32, timeout_scale: u32) -> Result<PollBudget, ConvergenceError> {
        let count = if self.scales_with_nodes() { node_count } else { 1 };
        budget(self.base_interval(), self.base_deadline(), count)?.stretched(timeout_scale)
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SshReachability => "ssh-reachability",
            Self::RemoteCommand => "remote-command",
            Self::Registration => "registration",
            Self::ConfigDownload => "config-download",
            Self::ClusterStatus => "cluster-status",
            Self::ElementalStatus => "elemental-status",
        })
    }
}
