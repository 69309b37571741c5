//! Run context
//!
//! Replaces process-wide counters and environment lookups with one explicit
//! object owned by the driver for the lifetime of a run.

use crate::budget::ResourceClass;
use crate::error::ConvergenceError;
use crate::pacing::PacingPolicy;
use crate::poller::Poller;
use crate::readiness::ReadinessMatrix;
use crate::scheduler::{NodeRange, ProvisioningScheduler};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// State shared by every phase of one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Identifies the run in logs and reports
    pub run_id: Uuid,
    /// When the context was created
    pub started_at: DateTime<Utc>,
    /// Root cancellation token; cancelling it stops pollers and workers
    pub cancel: CancellationToken,
    /// Nodes under test
    pub node_range: NodeRange,
    /// Run-wide deadline multiplier
    pub timeout_scale: u32,
    /// Launch pacing for scheduler phases
    pub pacing: PacingPolicy,
    /// Required conditions per resource kind
    pub matrix: &'static ReadinessMatrix,
}

impl RunContext {
    /// New context with a fresh run id and root token.
    ///
    /// # Errors
    ///
    /// A zero `timeout_scale` is rejected.
    pub fn new(node_range: NodeRange, pacing: PacingPolicy, timeout_scale: u32) -> Result<Self, ConvergenceError> {
        if timeout_scale == 0 {
            return Err(ConvergenceError::InvalidBudget(
                "timeout scale must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            cancel: CancellationToken::new(),
            node_range,
            timeout_scale,
            pacing,
            matrix: ReadinessMatrix::shared(),
        })
    }

    /// Number of nodes under test (always at least 1)
    #[must_use]
    pub fn node_count(&self) -> u32 {
        self.node_range.len()
    }

    /// Poller for `class`, budgeted for this run's node count and scale
    pub fn poller(&self, class: ResourceClass) -> Result<Poller, ConvergenceError> {
        let budget = class.budget(self.node_count(), self.timeout_scale)?;
        Ok(Poller::new(budget, self.cancel.clone()))
    }

    /// Scheduler bound to this run's pacing and cancellation
    #[must_use]
    pub fn scheduler(&self) -> ProvisioningScheduler {
        ProvisioningScheduler::new(self.pacing, self.cancel.clone())
    }
}
