//! Failure detection for a node's socket pool (`spec.md` §4.3, §8 property
//! 8). The pool consults a [`FailurePolicy`] after every failed acquisition
//! or broken socket and asks whether the node should still be considered
//! alive.

use std::time::{Duration, Instant};

/// A node's liveness as tracked by its failure policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Alive,
    /// `since` records when the node was declared dead, so the pool can
    /// tell when `dead_timeout` has elapsed and a probe is due.
    Dead { since: Instant },
}

/// Consulted by a node's socket pool on every success/failure. Implementations
/// must be cheap to call on the hot path; `ThrottlingFailurePolicy` does a
/// handful of comparisons and nothing else.
pub trait FailurePolicy: Send + Sync + 'static {
    /// Record a failed acquisition or a socket going broken.
    fn record_failure(&mut self);
    /// Record a successful acquisition, resetting any failure count.
    fn record_success(&mut self);
    /// Current state. `probe_due()` should be consulted separately to decide
    /// whether a `Dead` node may still accept one probing acquisition.
    fn state(&self) -> NodeState;
    /// Whether a `Dead` node is due a single probe acquisition, i.e.
    /// `dead_timeout` has elapsed since it was declared dead.
    fn probe_due(&self) -> bool;
    /// Atomically claim the single probe acquisition a `Dead` node is owed
    /// once `dead_timeout` has elapsed. Returns `false` if no probe is due
    /// yet or one is already in flight; only the caller that gets `true` may
    /// treat the node as probeable until it calls `record_success` or
    /// `record_failure`.
    fn try_claim_probe(&mut self) -> bool;
}

/// Never trips a node dead. Used when `socket_pool.failure_policy` is
/// configured as `none`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFailurePolicy;

impl FailurePolicy for NoFailurePolicy {
    fn record_failure(&mut self) {}
    fn record_success(&mut self) {}
    fn state(&self) -> NodeState {
        NodeState::Alive
    }
    fn probe_due(&self) -> bool {
        false
    }
    fn try_claim_probe(&mut self) -> bool {
        false
    }
}

/// Counts failures within a sliding window `reset_after`; trips the node
/// `Dead` once `failure_threshold` failures land inside that window. A probe
/// acquisition is permitted once `dead_timeout` has elapsed since the trip,
/// and a single success restores `Alive` and clears the counter.
pub struct ThrottlingFailurePolicy {
    failure_threshold: u32,
    reset_after: Duration,
    dead_timeout: Duration,
    failures: Vec<Instant>,
    state: NodeState,
    probe_in_flight: bool,
}

impl ThrottlingFailurePolicy {
    pub fn new(failure_threshold: u32, reset_after: Duration, dead_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_after,
            dead_timeout,
            failures: Vec::new(),
            state: NodeState::Alive,
            probe_in_flight: false,
        }
    }

    fn prune_window(&mut self, now: Instant) {
        self.failures.retain(|at| now.duration_since(*at) <= self.reset_after);
    }
}

impl FailurePolicy for ThrottlingFailurePolicy {
    fn record_failure(&mut self) {
        let now = Instant::now();
        self.prune_window(now);
        self.failures.push(now);
        if self.failures.len() as u32 >= self.failure_threshold {
            if !matches!(self.state, NodeState::Dead { .. }) {
                log::warn!(
                    "node tripped Dead after {} failures within {:?}",
                    self.failures.len(),
                    self.reset_after
                );
            }
            self.state = NodeState::Dead { since: now };
        }
        self.probe_in_flight = false;
    }

    fn record_success(&mut self) {
        self.failures.clear();
        self.state = NodeState::Alive;
        self.probe_in_flight = false;
    }

    fn state(&self) -> NodeState {
        self.state
    }

    fn probe_due(&self) -> bool {
        match self.state {
            NodeState::Dead { since } => since.elapsed() >= self.dead_timeout,
            NodeState::Alive => false,
        }
    }

    fn try_claim_probe(&mut self) -> bool {
        match self.state {
            NodeState::Dead { since } => {
                if self.probe_in_flight || since.elapsed() < self.dead_timeout {
                    false
                } else {
                    self.probe_in_flight = true;
                    true
                }
            }
            NodeState::Alive => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_failure_policy_stays_alive() {
        let mut policy = NoFailurePolicy;
        for _ in 0..100 {
            policy.record_failure();
        }
        assert_eq!(NodeState::Alive, policy.state());
    }

    #[test]
    fn test_trips_dead_at_threshold() {
        let mut policy = ThrottlingFailurePolicy::new(3, Duration::from_secs(60), Duration::from_millis(10));
        policy.record_failure();
        policy.record_failure();
        assert_eq!(NodeState::Alive, policy.state());
        policy.record_failure();
        assert!(matches!(policy.state(), NodeState::Dead { .. }));
    }

    #[test]
    fn test_success_resets_counter() {
        let mut policy = ThrottlingFailurePolicy::new(2, Duration::from_secs(60), Duration::from_millis(10));
        policy.record_failure();
        policy.record_success();
        policy.record_failure();
        assert_eq!(NodeState::Alive, policy.state());
    }

    #[test]
    fn test_probe_due_after_dead_timeout() {
        let mut policy = ThrottlingFailurePolicy::new(1, Duration::from_secs(60), Duration::from_millis(5));
        policy.record_failure();
        assert!(!policy.probe_due());
        std::thread::sleep(Duration::from_millis(10));
        assert!(policy.probe_due());
    }

    #[test]
    fn test_only_one_caller_claims_the_probe() {
        let mut policy = ThrottlingFailurePolicy::new(1, Duration::from_secs(60), Duration::from_millis(5));
        policy.record_failure();
        std::thread::sleep(Duration::from_millis(10));
        assert!(policy.try_claim_probe());
        assert!(!policy.try_claim_probe());
        policy.record_failure();
        assert!(!policy.try_claim_probe());
        std::thread::sleep(Duration::from_millis(10));
        assert!(policy.try_claim_probe());
    }
}
