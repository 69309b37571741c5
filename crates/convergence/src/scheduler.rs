//! Node provisioning scheduler.
//!
//! A sequential loop walks the node index range. For each index it derives
//! the node identity (this may touch shared network configuration, so it is
//! never concurrent), launches the per-node work as a Tokio task, then paces
//! itself before the next index. The tasks of one phase live in a `JoinSet`
//! that acts as the phase barrier: every task hands back an explicit result,
//! panics included, and the phase only returns once all of them have. The
//! launch loop keeps draining finished tasks, so a failed node stops the
//! phase before the next launch.

use crate::collaborators::{ConnectionInfo, IdentityAllocator, NodeNetConfig};
use crate::error::ConvergenceError;
use crate::pacing::PacingPolicy;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Inclusive range of node indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRange {
    start: u32,
    end: u32,
}

impl NodeRange {
    /// `start..=end`; a single node is `start == end`
    ///
    /// # Errors
    ///
    /// Reversed ranges, and ranges whose node count does not fit in a `u32`.
    pub fn new(start: u32, end: u32) -> Result<Self, ConvergenceError> {
        if end < start {
            return Err(ConvergenceError::InvalidNodeRange(format!(
                "end index {end} is lower than start index {start}"
            )));
        }
        if (end - start).checked_add(1).is_none() {
            return Err(ConvergenceError::InvalidNodeRange(format!(
                "{start}..={end} holds more than {} nodes",
                u32::MAX
            )));
        }
        Ok(Self { start, end })
    }

    /// First index
    #[must_use]
    pub fn start(&self) -> u32 {
        self.start
    }

    /// Last index (inclusive)
    #[must_use]
    pub fn end(&self) -> u32 {
        self.end
    }

    /// Number of nodes, always at least 1
    #[must_use]
    pub fn len(&self) -> u32 {
        self.end - self.start + 1
    }

    /// Always false; present for API symmetry with `len`
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Indices in launch order
    pub fn iter(&self) -> impl Iterator<Item = u32> {
        self.start..=self.end
    }
}

/// Everything a worker needs to know about its node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeWorkItem {
    /// Node index
    pub index: u32,
    /// Node hostname
    pub hostname: String,
    /// MAC address from the network configuration
    pub mac: String,
    /// IP address from the network configuration
    pub ip: IpAddr,
    /// Nodes launched before this one in the current phase
    pub launch_order: usize,
}

impl NodeWorkItem {
    /// Build a work item from a network lookup
    #[must_use]
    pub fn from_net_config(index: u32, net: NodeNetConfig) -> Self {
        Self {
            index,
            hostname: net.hostname,
            mac: net.mac,
            ip: net.ip,
            launch_order: 0,
        }
    }

    /// SSH connection details for this node
    #[must_use]
    pub fn connection(&self, username: &str, password: Option<&str>) -> ConnectionInfo {
        ConnectionInfo {
            address: SocketAddr::new(self.ip, 22),
            username: username.to_string(),
            password: password.map(str::to_string),
        }
    }
}

/// Derive the identity of node `index`, registering it first when asked.
///
/// Must only be called from the sequential part of a phase.
pub async fn derive_identity(
    allocator: &dyn IdentityAllocator,
    root: &str,
    index: u32,
    register: bool,
) -> Result<NodeWorkItem, ConvergenceError> {
    let hostname = allocator.hostname_for(root, index);
    if hostname.is_empty() {
        return Err(ConvergenceError::collaborator(
            format!("hostname for node {index}"),
            "empty hostname",
        ));
    }
    if register {
        allocator
            .register_node(&hostname, index)
            .await
            .map_err(|e| ConvergenceError::collaborator(format!("register {hostname}"), e))?;
    }
    let net = allocator
        .lookup(&hostname)
        .await
        .map_err(|e| ConvergenceError::collaborator(format!("network lookup for {hostname}"), e))?;
    if net.mac.is_empty() {
        return Err(ConvergenceError::collaborator(
            format!("network lookup for {hostname}"),
            "no MAC address assigned",
        ));
    }
    Ok(NodeWorkItem::from_net_config(index, net))
}

/// What a completed phase did.
#[derive(Debug, Clone)]
pub struct PhaseSummary {
    /// Phase name
    pub phase: String,
    /// Workers launched
    pub launched: usize,
    /// Node indices in completion order
    pub completed: Vec<u32>,
    /// Wall-clock duration of the phase
    pub elapsed: Duration,
}

/// Fans per-node work out over Tokio tasks with paced launches.
#[derive(Debug, Clone)]
pub struct ProvisioningScheduler {
    policy: PacingPolicy,
    cancel: CancellationToken,
}

impl ProvisioningScheduler {
    /// Create a scheduler; `cancel` aborts launching and is forwarded to workers
    #[must_use]
    pub fn new(policy: PacingPolicy, cancel: CancellationToken) -> Self {
        Self { policy, cancel }
    }

    /// Pacing policy in use
    #[must_use]
    pub fn policy(&self) -> PacingPolicy {
        self.policy
    }

    /// Run one phase over `range`.
    ///
    /// `derive` runs sequentially for each index. `work` runs concurrently,
    /// one task per node, and gets a child cancellation token. The call only
    /// returns after every launched task has reported back.
    ///
    /// The first fatal error (worker error or panic, identity failure) stops
    /// further launches and cancels the tokens of the workers still running.
    /// Every failure seen is returned together; workers that only stopped
    /// because of that cancellation are not reported.
    pub async fn provision_all<D, DFut, W, WFut>(
        &self,
        phase: &str,
        range: NodeRange,
        mut derive: D,
        work: W,
    ) -> Result<PhaseSummary, ConvergenceError>
    where
        D: FnMut(u32) -> DFut + Send,
        DFut: Future<Output = Result<NodeWorkItem, ConvergenceError>> + Send,
        W: Fn(NodeWorkItem, CancellationToken) -> WFut + Send + Sync + 'static,
        WFut: Future<Output = Result<(), ConvergenceError>> + Send + 'static,
    {
        let started_at = Instant::now();
        let work = Arc::new(work);
        let in_flight = Arc::new(Semaphore::new(self.policy.max_in_flight.max(1)));
        // Parent of every worker token; cancelled on the first fatal error of the phase
        let phase_cancel = self.cancel.child_token();
        let mut barrier: JoinSet<WorkerReport> = JoinSet::new();
        let mut tally = Tally::default();
        let mut started = 0usize;

        info!(phase, start = range.start(), end = range.end(), "Starting phase");

        for index in range.iter() {
            while let Some(joined) = barrier.try_join_next() {
                tally.record(phase, joined, &phase_cancel);
            }
            if tally.aborted {
                warn!(phase, index, "Phase already failed, no more launches");
                break;
            }
            if self.cancel.is_cancelled() {
                tally.failures.push(ConvergenceError::Cancelled(format!("{phase} launch of node {index}")));
                break;
            }

            let mut item = match derive(index).await {
                Ok(item) => item,
                Err(e) => {
                    warn!(phase, index, error = %e, "Could not derive node identity, no more launches");
                    tally.abort(phase, e, &phase_cancel);
                    break;
                }
            };
            item.launch_order = started;

            let acquired = loop {
                tokio::select! {
                    () = self.cancel.cancelled() => break None,
                    permit = Arc::clone(&in_flight).acquire_owned() => break Some(permit),
                    Some(joined) = barrier.join_next() => {
                        if tally.record(phase, joined, &phase_cancel) {
                            break None;
                        }
                    }
                }
            };
            let permit = match acquired {
                Some(Ok(permit)) => permit,
                Some(Err(e)) => {
                    tally.abort(phase, ConvergenceError::collaborator("in-flight limiter", e), &phase_cancel);
                    break;
                }
                None if tally.aborted => break,
                None => {
                    tally
                        .failures
                        .push(ConvergenceError::Cancelled(format!("{phase} launch of {}", item.hostname)));
                    break;
                }
            };

            debug!(phase, index, hostname = %item.hostname, "Launching node worker");
            let work = Arc::clone(&work);
            let token = phase_cancel.child_token();
            barrier.spawn(async move {
                // Released on every exit path, panics included
                let _permit = permit;
                let index = item.index;
                let hostname = item.hostname.clone();
                let result = AssertUnwindSafe(work(item, token))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(ConvergenceError::Worker {
                        index,
                        hostname: hostname.clone(),
                        reason: format!("panicked: {}", panic_message(payload.as_ref())),
                    }));
                WorkerReport { index, hostname, result }
            });

            let (delay, now_started) = self.policy.launch_delay(index, range.end(), started);
            started = now_started;
            if !delay.is_zero() {
                debug!(phase, index, delay_secs = delay.as_secs(), "Pacing next launch");
                let pause = tokio::time::sleep(delay);
                tokio::pin!(pause);
                loop {
                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        () = &mut pause => break,
                        Some(joined) = barrier.join_next() => {
                            if tally.record(phase, joined, &phase_cancel) {
                                break;
                            }
                        }
                    }
                }
            }
        }

        let launched = started;
        while let Some(joined) = barrier.join_next().await {
            tally.record(phase, joined, &phase_cancel);
        }

        let elapsed = started_at.elapsed();
        let Tally {
            completed,
            mut failures,
            ..
        } = tally;
        if failures.is_empty() {
            info!(phase, launched, elapsed_secs = elapsed.as_secs(), "Phase complete");
            Ok(PhaseSummary {
                phase: phase.to_string(),
                launched,
                completed,
                elapsed,
            })
        } else {
            failures.sort_by_key(|f| match f {
                ConvergenceError::Worker { index, .. } => *index,
                _ => u32::MAX,
            });
            Err(ConvergenceError::PhaseFailed {
                phase: phase.to_string(),
                failures,
            })
        }
    }
}

struct WorkerReport {
    index: u32,
    hostname: String,
    result: Result<(), ConvergenceError>,
}

/// Outcomes of the workers joined so far.
#[derive(Default)]
struct Tally {
    completed: Vec<u32>,
    failures: Vec<ConvergenceError>,
    /// A fatal error was seen and the remaining workers were cancelled
    aborted: bool,
}

impl Tally {
    /// Record one joined worker; returns whether the phase has failed.
    fn record(&mut self, phase: &str, joined: Result<WorkerReport, JoinError>, siblings: &CancellationToken) -> bool {
        match joined {
            Ok(WorkerReport { index, hostname, result: Ok(()) }) => {
                debug!(phase, index, %hostname, "Node worker done");
                self.completed.push(index);
            }
            Ok(WorkerReport { index, hostname, result: Err(e) }) => {
                self.completed.push(index);
                if e.is_cancellation() {
                    if self.aborted {
                        debug!(phase, index, %hostname, "Node worker stopped after phase failure");
                    } else {
                        warn!(phase, index, %hostname, error = %e, "Node worker cancelled");
                        self.failures.push(worker_failure(index, hostname, e));
                    }
                } else {
                    warn!(phase, index, %hostname, error = %e, "Node worker failed");
                    self.abort(phase, worker_failure(index, hostname, e), siblings);
                }
            }
            Err(e) => self.abort(phase, ConvergenceError::collaborator("join node worker", e), siblings),
        }
        self.aborted
    }

    /// Record a fatal error, cancelling the other workers the first time.
    fn abort(&mut self, phase: &str, failure: ConvergenceError, siblings: &CancellationToken) {
        if !self.aborted {
            warn!(phase, error = %failure, "Phase failed, cancelling remaining node workers");
            siblings.cancel();
            self.aborted = true;
        }
        self.failures.push(failure);
    }
}

fn worker_failure(index: u32, hostname: String, err: ConvergenceError) -> ConvergenceError {
    match err {
        worker @ ConvergenceError::Worker { .. } => worker,
        other => ConvergenceError::Worker {
            index,
            hostname,
            reason: other.to_string(),
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
