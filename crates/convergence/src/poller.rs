//! Convergence poller.
//!
//! Observes eventually-consistent external state on a fixed cadence until it
//! matches a target or the budget runs out. Accessor errors are observations
//! like any other: they never abort the loop, they only show up as the last
//! observed value if the deadline is reached.

use crate::budget::PollBudget;
use crate::error::ConvergenceError;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Consecutive mismatches between two diagnostics
pub const DEFAULT_MISMATCH_REPORT_EVERY: u32 = 10;

/// Decides whether an observed value is the one being waited for.
pub trait Matcher<T>: Send + Sync {
    /// Whether `observed` satisfies the target
    fn matches(&self, observed: &T) -> bool;

    /// Target description for logs and timeout errors
    fn describe(&self) -> String;
}

/// Target is reached when the observation equals the wrapped value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Equals<T>(pub T);

impl<T> Matcher<T> for Equals<T>
where
    T: PartialEq + fmt::Debug + Send + Sync,
{
    fn matches(&self, observed: &T) -> bool {
        *observed == self.0
    }

    fn describe(&self) -> String {
        format!("{:?}", self.0)
    }
}

/// Target is reached when the observed text contains the wrapped substring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainsSubstring(pub String);

impl Matcher<String> for ContainsSubstring {
    fn matches(&self, observed: &String) -> bool {
        observed.contains(self.0.as_str())
    }

    fn describe(&self) -> String {
        format!("text containing {:?}", self.0)
    }
}

/// One reading of the external state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation<T> {
    /// Accessor returned a value
    Value(T),
    /// Accessor call failed; counted as a mismatch
    Failed(String),
}

impl<T: fmt::Debug> fmt::Display for Observation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{v:?}"),
            Self::Failed(e) => write!(f, "<error: {e}>"),
        }
    }
}

/// How a poll loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// Observation matched the target
    Satisfied,
    /// Deadline elapsed first
    TimedOut,
    /// Run cancellation fired first
    Cancelled,
}

/// Result of a poll loop: last observation plus bookkeeping for diagnostics.
#[derive(Debug, Clone)]
pub struct PollOutcome<T> {
    /// Last observation, `None` if cancelled before the first one
    pub last: Option<Observation<T>>,
    /// Terminal status
    pub status: PollStatus,
    /// Number of observations made
    pub attempts: u32,
    /// Mismatch diagnostics emitted along the way
    pub mismatch_reports: u32,
    /// Time spent polling
    pub elapsed: Duration,
}

impl<T: fmt::Debug> PollOutcome<T> {
    /// Whether the target was reached
    #[must_use]
    pub fn satisfied(&self) -> bool {
        self.status == PollStatus::Satisfied
    }

    /// Last successfully observed value, if any
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match &self.last {
            Some(Observation::Value(v)) => Some(v),
            _ => None,
        }
    }

    /// Turn a non-satisfied outcome into a fatal error carrying the last observation
    pub fn into_result(self, what: &str, expected: &str) -> Result<T, ConvergenceError> {
        match (self.status, self.last) {
            (PollStatus::Satisfied, Some(Observation::Value(v))) => Ok(v),
            (PollStatus::Cancelled, _) => Err(ConvergenceError::Cancelled(what.to_string())),
            (_, last) => Err(ConvergenceError::Timeout {
                what: what.to_string(),
                expected: expected.to_string(),
                last_observed: last.map_or_else(|| "<nothing>".to_string(), |o| o.to_string()),
                elapsed: self.elapsed,
            }),
        }
    }
}

/// Poll loop bound to a budget and a cancellation token.
#[derive(Debug, Clone)]
pub struct Poller {
    budget: PollBudget,
    cancel: CancellationToken,
    mismatch_report_every: u32,
}

impl Poller {
    /// Create a poller for `budget`, stopping early when `cancel` fires
    #[must_use]
    pub fn new(budget: PollBudget, cancel: CancellationToken) -> Self {
        Self {
            budget,
            cancel,
            mismatch_report_every: DEFAULT_MISMATCH_REPORT_EVERY,
        }
    }

    /// Change how many consecutive mismatches trigger one diagnostic
    #[must_use]
    pub fn with_mismatch_report_every(mut self, every: u32) -> Self {
        self.mismatch_report_every = every.max(1);
        self
    }

    /// Budget this poller runs with
    #[must_use]
    pub fn budget(&self) -> PollBudget {
        self.budget
    }

    /// Observe immediately, then every interval, until `matcher` accepts the
    /// observation, the deadline passes or the run is cancelled.
    ///
    /// The final observation happens at the deadline, so a timed out loop
    /// spends at most one interval more than needed. Each observation is
    /// bounded by the same limit; one that does not return in time counts
    /// as a failed observation.
    pub async fn poll_until<T, E, M, F, Fut>(
        &self,
        what: &str,
        matcher: &M,
        mut observe: F,
    ) -> PollOutcome<T>
    where
        T: fmt::Debug,
        E: fmt::Display,
        M: Matcher<T> + ?Sized,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let start = Instant::now();
        let mut attempts = 0u32;
        let mut mismatches = 0u32;
        let mut mismatch_reports = 0u32;
        let mut last = None;

        let outcome = |last, status, attempts, mismatch_reports| PollOutcome {
            last,
            status,
            attempts,
            mismatch_reports,
            elapsed: start.elapsed(),
        };

        loop {
            if self.cancel.is_cancelled() {
                return outcome(last, PollStatus::Cancelled, attempts, mismatch_reports);
            }

            attempts += 1;
            // A hung observation may not outlast the deadline by more than one interval
            let limit = (self.budget.deadline + self.budget.interval).saturating_sub(start.elapsed());
            let observation = tokio::select! {
                () = self.cancel.cancelled() => {
                    return outcome(last, PollStatus::Cancelled, attempts, mismatch_reports);
                }
                result = tokio::time::timeout(limit, observe()) => match result {
                    Ok(Ok(value)) => Observation::Value(value),
                    Ok(Err(e)) => Observation::Failed(e.to_string()),
                    Err(_) => Observation::Failed(format!("observation timed out after {}s", limit.as_secs())),
                },
            };

            if let Observation::Value(value) = &observation {
                if matcher.matches(value) {
                    debug!(what, attempts, "Condition satisfied");
                    return outcome(
                        Some(observation),
                        PollStatus::Satisfied,
                        attempts,
                        mismatch_reports,
                    );
                }
            }

            mismatches += 1;
            if mismatches >= self.mismatch_report_every {
                warn!(
                    what,
                    observed = %observation,
                    expected = %matcher.describe(),
                    elapsed_secs = start.elapsed().as_secs(),
                    "!! Status issue !! still not converged"
                );
                mismatch_reports += 1;
                mismatches = 0;
            } else {
                debug!(what, observed = %observation, "Not converged yet");
            }
            last = Some(observation);

            let elapsed = start.elapsed();
            if elapsed >= self.budget.deadline {
                return outcome(last, PollStatus::TimedOut, attempts, mismatch_reports);
            }

            let pause = self.budget.interval.min(self.budget.deadline - elapsed);
            tokio::select! {
                () = self.cancel.cancelled() => {
                    return outcome(last, PollStatus::Cancelled, attempts, mismatch_reports);
                }
                () = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// Poll until the observation equals `target`, failing with a typed error otherwise
    pub async fn wait_for<T, E, F, Fut>(&self, what: &str, target: T, observe: F) -> Result<T, ConvergenceError>
    where
        T: PartialEq + fmt::Debug + Send + Sync,
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let matcher = Equals(target);
        let outcome = self.poll_until(what, &matcher, observe).await;
        outcome.into_result(what, &matcher.describe())
    }

    /// Retry an operation on the poll cadence until it succeeds.
    ///
    /// No backoff: same interval and deadline semantics as [`Self::poll_until`].
    pub async fn retry_until_ok<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, ConvergenceError>
    where
        T: fmt::Debug,
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let outcome = self.poll_until(what, &AnyValue, || op()).await;
        outcome.into_result(what, "success")
    }
}

struct AnyValue;

impl<T> Matcher<T> for AnyValue {
    fn matches(&self, _observed: &T) -> bool {
        true
    }

    fn describe(&self) -> String {
        "success".to_string()
    }
}

/// Poll `observe` against `matcher` with `budget`, without external cancellation.
pub async fn poll_until<T, E, M, F, Fut>(
    what: &str,
    budget: PollBudget,
    matcher: &M,
    observe: F,
) -> PollOutcome<T>
where
    T: fmt::Debug,
    E: fmt::Display,
    M: Matcher<T> + ?Sized,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    Poller::new(budget, CancellationToken::new())
        .poll_until(what, matcher, observe)
        .await
}
