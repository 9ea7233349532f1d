//! Shared fixtures for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use edgewatch_state::*;

use crate::checker::{ProbeOutcome, Prober};
use crate::policy::EffectivePolicy;

pub fn test_policy() -> HealthCheckPolicy {
    HealthCheckPolicy {
        url: "http://${host}/healthz".to_string(),
        status_codes: vec![200, 204],
        max_attempts: 3,
        try_delay_ms: Some(0),
        count_up: 2,
        count_down: 2,
        auto_down: true,
        ..HealthCheckPolicy::default()
    }
}

pub fn seed_cluster(store: &StateStore, id: ClusterId, policy: HealthCheckPolicy) -> Cluster {
    let cluster = Cluster {
        id,
        name: format!("cluster-{id}"),
        is_on: true,
        health_check: Some(policy),
        created_at: 1000,
    };
    store.put_cluster(&cluster).unwrap();
    cluster
}

pub fn seed_node(store: &StateStore, id: NodeId, cluster_id: ClusterId) -> Node {
    let node = Node {
        id,
        cluster_id,
        name: format!("edge-{id}"),
        is_on: true,
        role: NodeRole::Node,
        health: HealthCounters::default(),
        created_at: 1000,
    };
    store.put_node(&node).unwrap();
    node
}

pub fn seed_address(
    store: &StateStore,
    id: AddressId,
    node_id: NodeId,
    ip: &str,
    can_access: bool,
) -> NodeAddress {
    let address = NodeAddress {
        id,
        node_id,
        role: NodeRole::Node,
        name: String::new(),
        ip: ip.to_string(),
        order: 0,
        can_access,
        is_on: true,
        health: HealthCounters::default(),
        backup_ip: None,
        backup_threshold_id: None,
    };
    store.put_address(&address).unwrap();
    address
}

/// Prober replaying a scripted sequence of outcomes per IP.
///
/// Once an IP's script runs out every further probe fails.
#[derive(Default)]
pub struct ScriptedProber {
    scripts: Mutex<HashMap<String, VecDeque<bool>>>,
    calls: AtomicUsize,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, ip: &str, outcomes: &[bool]) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(ip.to_string(), outcomes.iter().copied().collect());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Prober for ScriptedProber {
    async fn probe(&self, ip: &str, _policy: &EffectivePolicy) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(ip)
            .and_then(|script| script.pop_front());
        match next {
            Some(true) => ProbeOutcome::pass(),
            Some(false) => ProbeOutcome::fail(format!("scripted failure for {ip}")),
            None => ProbeOutcome::fail("connection refused"),
        }
    }
}
