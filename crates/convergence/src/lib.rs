//! Convergence engine for cluster bootstrap end-to-end runs
//!
//! Waits for eventually-consistent resource state and fans node provisioning
//! out over Tokio tasks with paced launches.
//!
//! # Example
//!
//! ```no_run
//! use convergence::{PollBudget, Poller, ReadinessMatrix, ResourceKind, ResourceRef, StatusAccessor};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(accessor: &dyn StatusAccessor) -> Result<(), convergence::ConvergenceError> {
//! let budget = convergence::budget(Duration::from_secs(20), Duration::from_secs(120), 3)?;
//! let poller = Poller::new(budget, CancellationToken::new());
//!
//! let host = ResourceRef::new(ResourceKind::ElementalHost, "fleet-default", "node-001");
//! ReadinessMatrix::shared().wait_ready(accessor, &poller, &host).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Poller**: immediate first observation, fixed interval, deadline, cancellation
//! - **Budgets**: deadlines scaled by node count, per resource class cadence
//! - **Readiness Matrix**: required conditions per cluster, host and machine
//! - **Scheduler**: sequential identity derivation, concurrent paced workers, explicit barrier
//! - **Phases**: ordered named steps with a serializable run report

pub mod budget;
pub mod collaborators;
pub mod context;
pub mod error;
pub mod pacing;
pub mod phase;
pub mod poller;
pub mod readiness;
pub mod scheduler;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use budget::{budget, PollBudget, ResourceClass};
pub use collaborators::{
    BootScriptConfigurator, CollaboratorError, ConnectionInfo, FileFetcher, IdentityAllocator,
    NodeNetConfig, ProcessRunner, RemoteRunner, StatusAccessor,
};
pub use context::RunContext;
pub use error::ConvergenceError;
pub use pacing::{PacingPolicy, DEFAULT_MAX_IN_FLIGHT};
pub use phase::{Phase, PhaseContext, PhasePlan, PhaseRecord, PhaseStatus, RunReport};
pub use poller::{
    poll_until, ContainsSubstring, Equals, Matcher, Observation, PollOutcome, PollStatus, Poller,
    DEFAULT_MISMATCH_REPORT_EVERY,
};
pub use readiness::{ConditionSpec, FieldPath, ReadinessMatrix, ResourceKind, ResourceRef};
pub use scheduler::{derive_identity, NodeRange, NodeWorkItem, PhaseSummary, ProvisioningScheduler};
