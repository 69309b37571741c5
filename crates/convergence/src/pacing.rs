//! # Launch pacing
//!
//! Booting many VMs at once saturates host CPU and disk. The provisioning
//! loop therefore waits between launches (the loop waits, not the workers)
//! and never has more than `max_in_flight` nodes running at the same time.
//!
//! Delays: `stagger` after each launch, `batch_pause` after every
//! `batch_size` launches, nothing after the last node of the range.

use std::time::Duration;

/// Node maximum of a single run; also the default in-flight bound
pub const DEFAULT_MAX_IN_FLIGHT: usize = 30;

/// How fast nodes are started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingPolicy {
    /// Upper bound of workers running at once
    pub max_in_flight: usize,
    /// Delay after a regular launch
    pub stagger: Duration,
    /// Launches between two long pauses
    pub batch_size: usize,
    /// Delay after every `batch_size` launches
    pub batch_pause: Duration,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            stagger: Duration::from_secs(10),
            batch_size: 5,
            batch_pause: Duration::from_secs(60),
        }
    }
}

impl PacingPolicy {
    /// No delays, only the in-flight bound (tests, single node runs)
    #[must_use]
    pub fn unpaced(max_in_flight: usize) -> Self {
        Self {
            max_in_flight: max_in_flight.max(1),
            stagger: Duration::ZERO,
            batch_size: usize::MAX,
            batch_pause: Duration::ZERO,
        }
    }

    /// Delay before launching the node after `index`, and the updated count
    /// of nodes started so far.
    ///
    /// `last_index` is the final index of the range; no delay follows it.
    #[must_use]
    pub fn launch_delay(&self, index: u32, last_index: u32, started: usize) -> (Duration, usize) {
        let started = started + 1;
        if index >= last_index {
            return (Duration::ZERO, started);
        }
        if self.batch_size > 0 && started % self.batch_size == 0 {
            (self.batch_pause, started)
        } else {
            (self.stagger, started)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stagger_and_batch_pause() {
        let policy = PacingPolicy::default();
        let mut started = 0;
        let mut delays = Vec::new();
        for index in 1..=7 {
            let (delay, s) = policy.launch_delay(index, 7, started);
            started = s;
            delays.push(delay.as_secs());
        }
        assert_eq!(delays, [10, 10, 10, 10, 60, 10, 0]);
        assert_eq!(started, 7);
    }

    #[test]
    fn test_single_node_never_waits() {
        let policy = PacingPolicy::default();
        assert_eq!(policy.launch_delay(3, 3, 0), (Duration::ZERO, 1));
    }

    #[test]
    fn test_unpaced() {
        let policy = PacingPolicy::unpaced(0);
        assert_eq!(policy.max_in_flight, 1);
        assert_eq!(policy.launch_delay(1, 5, 0).0, Duration::ZERO);
    }
}
