//! Ordered phase driver.
//!
//! A run is a fixed sequence of named phases executed one after the other
//! against a mutable context. The first failing phase stops the run; the
//! report records what ran, what was skipped and how long each step took.

use crate::context::RunContext;
use crate::error::ConvergenceError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tokio::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

/// Anything a phase can run against; gives the driver access to the run
/// identity and cancellation.
pub trait PhaseContext: Send {
    /// Shared run state
    fn run_context(&self) -> &RunContext;
}

impl PhaseContext for RunContext {
    fn run_context(&self) -> &RunContext {
        self
    }
}

/// One named step of a run.
#[async_trait::async_trait]
pub trait Phase<C: PhaseContext>: Send + Sync {
    /// Name used in logs and reports
    fn name(&self) -> &str;

    /// Whether the phase applies to this run; skipped phases are reported
    fn should_run(&self, _ctx: &C) -> bool {
        true
    }

    /// Execute the phase
    async fn run(&self, ctx: &mut C) -> Result<(), ConvergenceError>;
}

/// Outcome of a single phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    /// Ran to completion
    Completed,
    /// Not applicable to this run
    Skipped,
    /// Returned an error; the run stopped here
    Failed,
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        })
    }
}

/// Report line for one phase
#[derive(Debug, Clone, Serialize)]
pub struct PhaseRecord {
    /// Phase name
    pub name: String,
    /// Outcome
    pub status: PhaseStatus,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Time spent in the phase, in milliseconds
    pub elapsed_ms: u64,
}

/// Summary of a whole run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    /// Run identifier
    pub run_id: Uuid,
    /// Start of the first phase
    pub started_at: DateTime<Utc>,
    /// End of the last phase executed
    pub finished_at: DateTime<Utc>,
    /// Phases in execution order (phases after a failure are absent)
    pub phases: Vec<PhaseRecord>,
    /// Failure text, if the run failed
    pub failure: Option<String>,
    #[serde(skip)]
    error: Option<ConvergenceError>,
}

impl RunReport {
    /// Whether every phase completed or was skipped
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// Names of completed phases
    #[must_use]
    pub fn completed(&self) -> Vec<&str> {
        self.phases
            .iter()
            .filter(|p| p.status == PhaseStatus::Completed)
            .map(|p| p.name.as_str())
            .collect()
    }

    /// The error that stopped the run, if any
    pub fn into_result(self) -> Result<Self, ConvergenceError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }

    /// Borrow the failure, if any
    #[must_use]
    pub fn error(&self) -> Option<&ConvergenceError> {
        self.error.as_ref()
    }
}

/// Phases to run, in order.
pub struct PhasePlan<C: PhaseContext> {
    phases: Vec<Box<dyn Phase<C>>>,
}

impl<C: PhaseContext> fmt::Debug for PhasePlan<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.phases.iter().map(|p| p.name())).finish()
    }
}

impl<C: PhaseContext> Default for PhasePlan<C> {
    fn default() -> Self {
        Self { phases: Vec::new() }
    }
}

impl<C: PhaseContext> PhasePlan<C> {
    /// Empty plan
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a phase
    #[must_use]
    pub fn then(mut self, phase: impl Phase<C> + 'static) -> Self {
        self.phases.push(Box::new(phase));
        self
    }

    /// Phase names in execution order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.phases.iter().map(|p| p.name()).collect()
    }

    /// Run every phase in order, stopping at the first error.
    pub async fn run(&self, ctx: &mut C) -> RunReport {
        let run_id = ctx.run_context().run_id;
        let started_at = Utc::now();
        let mut phases = Vec::with_capacity(self.phases.len());
        let mut error = None;

        for phase in &self.phases {
            let name = phase.name().to_string();
            let phase_started = Utc::now();

            if ctx.run_context().cancel.is_cancelled() {
                error!(%run_id, phase = %name, "Run cancelled before phase");
                phases.push(PhaseRecord {
                    name: name.clone(),
                    status: PhaseStatus::Failed,
                    started_at: phase_started,
                    elapsed_ms: 0,
                });
                error = Some(ConvergenceError::Cancelled(format!("phase {name}")));
                break;
            }

            if !phase.should_run(ctx) {
                info!(%run_id, phase = %name, "Skipping phase");
                phases.push(PhaseRecord {
                    name,
                    status: PhaseStatus::Skipped,
                    started_at: phase_started,
                    elapsed_ms: 0,
                });
                continue;
            }

            info!(%run_id, phase = %name, "Phase started");
            let clock = Instant::now();
            let result = phase.run(ctx).await;
            let elapsed = clock.elapsed();

            match result {
                Ok(()) => {
                    info!(%run_id, phase = %name, elapsed_secs = elapsed.as_secs(), "Phase finished");
                    phases.push(PhaseRecord {
                        name,
                        status: PhaseStatus::Completed,
                        started_at: phase_started,
                        elapsed_ms: millis(elapsed),
                    });
                }
                Err(e) => {
                    error!(%run_id, phase = %name, error = %e, "Phase failed");
                    phases.push(PhaseRecord {
                        name,
                        status: PhaseStatus::Failed,
                        started_at: phase_started,
                        elapsed_ms: millis(elapsed),
                    });
                    error = Some(e);
                    break;
                }
            }
        }

        RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            phases,
            failure: error.as_ref().map(ToString::to_string),
            error,
        }
    }
}

fn millis(elapsed: std::time::Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
