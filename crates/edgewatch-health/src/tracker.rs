//! Hysteresis state machine over persisted health counters.
//!
//! A target only flips between up and down after a run of identical
//! outcomes, which keeps one flaky probe from bouncing DNS records.

use edgewatch_state::{
    AddressId, HealthCounters, Node, NodeAddress, NodeId, StateResult, StateStore,
};

use crate::policy::EffectivePolicy;

/// A confirmed up/down change of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub was_up: bool,
    pub is_up: bool,
}

/// Applies one run's outcome to a set of counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthTracker {
    success_threshold: u32,
    fail_threshold: u32,
    auto_down: bool,
}

impl HealthTracker {
    pub fn new(success_threshold: u32, fail_threshold: u32, auto_down: bool) -> Self {
        Self {
            success_threshold: success_threshold.max(1),
            fail_threshold: fail_threshold.max(1),
            auto_down,
        }
    }

    /// Record one run outcome and report a transition if a threshold was crossed.
    ///
    /// Counters always change; `is_up` changes at most once per call. The
    /// counter in the direction of the transition is left as-is so operators
    /// can see how long the streak has lasted.
    pub fn record(
        &self,
        counters: &mut HealthCounters,
        passed: bool,
        now: u64,
    ) -> Option<Transition> {
        let was_up = counters.is_up;

        if passed {
            counters.consecutive_up = counters.consecutive_up.saturating_add(1);
            counters.consecutive_down = 0;
            if !was_up && counters.consecutive_up >= self.success_threshold {
                counters.is_up = true;
            }
        } else {
            counters.consecutive_down = counters.consecutive_down.saturating_add(1);
            counters.consecutive_up = 0;
            if was_up && self.auto_down && counters.consecutive_down >= self.fail_threshold {
                counters.is_up = false;
            }
        }

        if counters.is_up == was_up {
            return None;
        }
        counters.state_changed_at = now;
        Some(Transition {
            was_up,
            is_up: counters.is_up,
        })
    }
}

impl From<&EffectivePolicy> for HealthTracker {
    fn from(policy: &EffectivePolicy) -> Self {
        Self::new(
            policy.success_threshold,
            policy.fail_threshold,
            policy.auto_down,
        )
    }
}

/// Persists counter updates, one record at a time.
///
/// Each call must read, apply and write the counters atomically so the
/// transition it reports is exactly the one that was stored.
pub trait HealthLedger: Send + Sync {
    fn record_address(
        &self,
        address_id: AddressId,
        tracker: &HealthTracker,
        passed: bool,
        now: u64,
    ) -> StateResult<(NodeAddress, Option<Transition>)>;

    fn record_node(
        &self,
        node_id: NodeId,
        tracker: &HealthTracker,
        passed: bool,
        now: u64,
    ) -> StateResult<(Node, Option<Transition>)>;
}

impl HealthLedger for StateStore {
    fn record_address(
        &self,
        address_id: AddressId,
        tracker: &HealthTracker,
        passed: bool,
        now: u64,
    ) -> StateResult<(NodeAddress, Option<Transition>)> {
        self.update_address_health(address_id, |counters| {
            tracker.record(counters, passed, now)
        })
    }

    fn record_node(
        &self,
        node_id: NodeId,
        tracker: &HealthTracker,
        passed: bool,
        now: u64,
    ) -> StateResult<(Node, Option<Transition>)> {
        self.update_node_health(node_id, |counters| tracker.record(counters, passed, now))
    }
}
