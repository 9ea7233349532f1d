//! One health-check run over a cluster.
//!
//! A run resolves its targets, probes them on a bounded worker pool, folds
//! each outcome into the persisted hysteresis counters, and hands confirmed
//! transitions to the propagation pipeline. It returns once every dispatched
//! target has a result.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};

use edgewatch_state::{
    AddressId, ClusterId, Node, NodeAddress, NodeId, StateStore, TrackingMode,
};

use crate::checker::Prober;
use crate::error::HealthResult;
use crate::policy::EffectivePolicy;
use crate::propagation::{PropagationPipeline, PropagationReport, StateTransitionEvent};
use crate::resolver::{FleetDirectory, resolve_targets};
use crate::retry::{self, ProbeResult};
use crate::tracker::{HealthLedger, HealthTracker, Transition};

/// Default number of concurrent probe workers.
pub const DEFAULT_POOL_SIZE: usize = 128;

/// Reason reported for nodes without an eligible address.
pub const NO_ADDRESS_REASON: &str = "no address available";

/// Reason reported for targets whose worker died before finishing.
pub const WORKER_ABORTED_REASON: &str = "health check worker aborted";

/// Outcome of one target in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheckResult {
    pub node_id: NodeId,
    pub node_name: String,
    pub address_id: Option<AddressId>,
    pub address: Option<String>,
    /// Whether this run's probe passed.
    pub is_up: bool,
    pub error: Option<String>,
    pub cost_ms: u64,
    pub attempts: u32,
    /// Set when this run flipped the persisted state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transitioned_to: Option<bool>,
    /// Transition handlers that failed while propagating this run's change.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_handlers: Vec<&'static str>,
}

impl HealthCheckResult {
    fn failed_without_probe(node: &Node, address: Option<&NodeAddress>, reason: &str) -> Self {
        Self {
            node_id: node.id,
            node_name: node.name.clone(),
            address_id: address.map(|a| a.id),
            address: address.map(|a| a.ip.clone()),
            is_up: false,
            error: Some(reason.to_string()),
            cost_ms: 0,
            attempts: 0,
            transitioned_to: None,
            failed_handlers: Vec::new(),
        }
    }
}

/// Runs cluster health checks against injected collaborators.
pub struct HealthCheckExecutor<P> {
    directory: Arc<dyn FleetDirectory>,
    ledger: Arc<dyn HealthLedger>,
    pipeline: Arc<PropagationPipeline>,
    prober: Arc<P>,
    pool_size: usize,
    tracking_mode: TrackingMode,
}

impl<P: Prober> HealthCheckExecutor<P> {
    pub fn new(
        directory: Arc<dyn FleetDirectory>,
        ledger: Arc<dyn HealthLedger>,
        pipeline: Arc<PropagationPipeline>,
        prober: Arc<P>,
    ) -> Self {
        Self {
            directory,
            ledger,
            pipeline,
            prober,
            pool_size: DEFAULT_POOL_SIZE,
            tracking_mode: TrackingMode::default(),
        }
    }

    /// Executor whose lookups, counters and downstream records all live in one store.
    pub fn for_store(store: Arc<StateStore>, prober: Arc<P>) -> Self {
        let pipeline = Arc::new(PropagationPipeline::for_store(store.clone()));
        Self::new(store.clone(), store, pipeline, prober)
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    pub fn with_tracking_mode(mut self, mode: TrackingMode) -> Self {
        self.tracking_mode = mode;
        self
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Check every enabled node of a cluster once.
    ///
    /// Configuration errors abort before any probe is sent. Once probing
    /// starts, the returned list has exactly one entry per enabled node, in
    /// no particular order.
    pub async fn run_cluster(&self, cluster_id: ClusterId) -> HealthResult<Vec<HealthCheckResult>> {
        let started = Instant::now();
        let resolved = resolve_targets(self.directory.as_ref(), cluster_id)?;

        let mut results = Vec::with_capacity(resolved.targets.len());
        let mut queue = VecDeque::new();
        for target in resolved.targets {
            match target.address {
                Some(address) => queue.push_back((target.node, address)),
                None => {
                    warn!(
                        cluster_id,
                        node_id = target.node.id,
                        "node has no address eligible for health check"
                    );
                    results.push(HealthCheckResult::failed_without_probe(
                        &target.node,
                        None,
                        NO_ADDRESS_REASON,
                    ));
                }
            }
        }

        // Kept to account for targets whose worker never reported back.
        let dispatched: Vec<(Node, NodeAddress)> = queue.iter().cloned().collect();
        let workers = self.pool_size.min(queue.len());
        let queue = Arc::new(Mutex::new(queue));
        let worker = Worker {
            prober: self.prober.clone(),
            ledger: self.ledger.clone(),
            pipeline: self.pipeline.clone(),
            tracker: HealthTracker::from(&resolved.policy),
            policy: Arc::new(resolved.policy),
            tracking_mode: self.tracking_mode,
        };

        // Workers hand each result over as soon as it exists, so a worker
        // that dies only loses the target it was holding.
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut set = JoinSet::new();
        for _ in 0..workers {
            let queue = queue.clone();
            let worker = worker.clone();
            let tx = tx.clone();
            set.spawn(async move {
                loop {
                    let next = queue.lock().await.pop_front();
                    let Some((node, address)) = next else {
                        break;
                    };
                    if tx.send(worker.check(&node, &address).await).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!(cluster_id, error = %e, "health check worker failed");
            }
        }

        let mut probed = Vec::with_capacity(dispatched.len());
        while let Ok(result) = rx.try_recv() {
            probed.push(result);
        }

        let reported: HashSet<AddressId> = probed.iter().filter_map(|r| r.address_id).collect();
        for (node, address) in &dispatched {
            if !reported.contains(&address.id) {
                results.push(HealthCheckResult::failed_without_probe(
                    node,
                    Some(address),
                    WORKER_ABORTED_REASON,
                ));
            }
        }
        results.extend(probed);

        info!(
            cluster_id,
            cluster = %resolved.cluster.name,
            targets = results.len(),
            workers,
            failed = results.iter().filter(|r| !r.is_up).count(),
            transitions = results.iter().filter(|r| r.transitioned_to.is_some()).count(),
            propagation_failures = results.iter().map(|r| r.failed_handlers.len()).sum::<usize>(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "health check run finished"
        );
        Ok(results)
    }
}

/// Everything one worker task needs, shared by all workers of a run.
struct Worker<P> {
    prober: Arc<P>,
    ledger: Arc<dyn HealthLedger>,
    pipeline: Arc<PropagationPipeline>,
    policy: Arc<EffectivePolicy>,
    tracker: HealthTracker,
    tracking_mode: TrackingMode,
}

impl<P> Clone for Worker<P> {
    fn clone(&self) -> Self {
        Self {
            prober: self.prober.clone(),
            ledger: self.ledger.clone(),
            pipeline: self.pipeline.clone(),
            policy: self.policy.clone(),
            tracker: self.tracker,
            tracking_mode: self.tracking_mode,
        }
    }
}

impl<P: Prober> Worker<P> {
    async fn check(&self, node: &Node, address: &NodeAddress) -> HealthCheckResult {
        let probe = retry::attempt(self.prober.as_ref(), &address.ip, &self.policy).await;
        if !probe.passed {
            warn!(
                node_id = node.id,
                address = %address.ip,
                reason = probe.reason.as_deref().unwrap_or_default(),
                "health check failed"
            );
        }
        let settled = self.settle(node, address, &probe);
        let (transitioned_to, failed_handlers) = match settled {
            Some((transition, report)) => (Some(transition.is_up), report.failed),
            None => (None, Vec::new()),
        };

        HealthCheckResult {
            node_id: node.id,
            node_name: node.name.clone(),
            address_id: Some(address.id),
            address: Some(address.ip.clone()),
            is_up: probe.passed,
            error: probe.reason,
            cost_ms: probe.elapsed.as_millis() as u64,
            attempts: probe.attempts,
            transitioned_to,
            failed_handlers,
        }
    }

    /// Fold one outcome into the persisted counters and propagate a transition.
    fn settle(
        &self,
        node: &Node,
        address: &NodeAddress,
        probe: &ProbeResult,
    ) -> Option<(Transition, PropagationReport)> {
        let now = epoch_secs();
        let event = match self.tracking_mode {
            TrackingMode::Address => {
                match self
                    .ledger
                    .record_address(address.id, &self.tracker, probe.passed, now)
                {
                    Ok((stored, Some(transition))) => Some((
                        transition,
                        StateTransitionEvent::for_address(
                            node,
                            &stored,
                            transition,
                            probe.reason.clone(),
                        ),
                    )),
                    Ok((_, None)) => None,
                    Err(e) => {
                        error!(address_id = address.id, error = %e, "failed to persist address health");
                        None
                    }
                }
            }
            TrackingMode::Node => {
                if !self.policy.auto_down {
                    return None;
                }
                match self
                    .ledger
                    .record_node(node.id, &self.tracker, probe.passed, now)
                {
                    Ok((stored, Some(transition))) => Some((
                        transition,
                        StateTransitionEvent::for_node(&stored, transition, probe.reason.clone()),
                    )),
                    Ok((_, None)) => None,
                    Err(e) => {
                        error!(node_id = node.id, error = %e, "failed to persist node health");
                        None
                    }
                }
            }
        };

        let (transition, event) = event?;
        Some((transition, self.pipeline.apply(&event)))
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use edgewatch_state::{DnsTaskType, MessageType, NewNotification};

    use super::*;
    use crate::checker::ProbeOutcome;
    use crate::error::{HealthError, PropagationError, PropagationResult};
    use crate::propagation::{DnsTaskHandler, DnsTaskSink, NotificationHandler, NotificationSink};
    use crate::test_support::*;

    /// Fails every probe, except that it panics on one IP.
    struct PanicOn(&'static str);

    impl Prober for PanicOn {
        async fn probe(&self, ip: &str, _policy: &EffectivePolicy) -> ProbeOutcome {
            if ip == self.0 {
                panic!("prober crashed on {ip}");
            }
            ProbeOutcome::fail("connection refused")
        }
    }

    /// Passes after a short sleep, tracking how many probes overlap.
    #[derive(Default)]
    struct GaugeProber {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Prober for GaugeProber {
        async fn probe(&self, _ip: &str, _policy: &EffectivePolicy) -> ProbeOutcome {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            ProbeOutcome::pass()
        }
    }

    /// Scripted prober that remembers when each probe was sent.
    struct TimedProber {
        inner: ScriptedProber,
        origin: Instant,
        sent: std::sync::Mutex<Vec<(String, Duration)>>,
    }

    impl TimedProber {
        fn new(inner: ScriptedProber) -> Self {
            Self {
                inner,
                origin: Instant::now(),
                sent: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn sent_to(&self, ip: &str) -> Vec<Duration> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(sent_ip, _)| sent_ip == ip)
                .map(|(_, at)| *at)
                .collect()
        }
    }

    impl Prober for TimedProber {
        async fn probe(&self, ip: &str, policy: &EffectivePolicy) -> ProbeOutcome {
            self.sent
                .lock()
                .unwrap()
                .push((ip.to_string(), self.origin.elapsed()));
            self.inner.probe(ip, policy).await
        }
    }

    /// Counts downstream calls instead of storing anything.
    #[derive(Default)]
    struct CountingSink {
        notified: AtomicUsize,
        enqueued: AtomicUsize,
    }

    impl NotificationSink for CountingSink {
        fn notify(&self, _notification: NewNotification) -> PropagationResult<()> {
            self.notified.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl DnsTaskSink for CountingSink {
        fn enqueue(&self, _node_id: NodeId, _task_type: DnsTaskType) -> PropagationResult<()> {
            self.enqueued.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct OfflineNotifier;

    impl NotificationSink for OfflineNotifier {
        fn notify(&self, _notification: NewNotification) -> PropagationResult<()> {
            Err(PropagationError::Unavailable("notifier offline".to_string()))
        }
    }

    fn seed_nodes(store: &StateStore, count: u64) {
        for id in 1..=count {
            seed_node(store, id, 1);
            seed_address(store, id * 10, id, &format!("10.0.0.{id}"), true);
        }
    }

    fn executor(store: &Arc<StateStore>, prober: &Arc<ScriptedProber>) -> HealthCheckExecutor<ScriptedProber> {
        HealthCheckExecutor::for_store(store.clone(), prober.clone())
    }

    fn mark_down(store: &StateStore, address_id: AddressId) {
        store
            .update_address_health(address_id, |c| c.is_up = false)
            .unwrap();
    }

    #[tokio::test]
    async fn down_address_recovers_after_two_passing_runs() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        seed_cluster(&store, 1, test_policy());
        seed_node(&store, 1, 1);
        seed_address(&store, 10, 1, "10.0.0.1", true);
        mark_down(&store, 10);

        // Run 1 fails every attempt, runs 2 and 3 pass on the first.
        let prober = Arc::new(
            ScriptedProber::new().script("10.0.0.1", &[false, false, false, true, true]),
        );
        let executor = executor(&store, &prober);

        let run1 = executor.run_cluster(1).await.unwrap();
        assert!(!run1[0].is_up);
        assert_eq!(run1[0].attempts, 3);

        let run2 = executor.run_cluster(1).await.unwrap();
        assert!(run2[0].is_up);
        assert_eq!(run2[0].transitioned_to, None);
        let address = store.get_address(10).unwrap().unwrap();
        assert_eq!(address.health.consecutive_up, 1);
        assert!(!address.health.is_up);

        let run3 = executor.run_cluster(1).await.unwrap();
        assert_eq!(run3[0].transitioned_to, Some(true));
        let address = store.get_address(10).unwrap().unwrap();
        assert_eq!(address.health.consecutive_up, 2);
        assert!(address.health.is_up);

        let notifications = store.list_notifications().unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].message_type, MessageType::HealthCheckNodeUp);
    }

    #[tokio::test]
    async fn up_address_goes_down_once() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        seed_cluster(&store, 1, test_policy());
        seed_node(&store, 1, 1);
        seed_address(&store, 10, 1, "10.0.0.1", true);
        let prober = Arc::new(ScriptedProber::new());
        let executor = executor(&store, &prober);

        let run1 = executor.run_cluster(1).await.unwrap();
        assert_eq!(run1[0].transitioned_to, None);
        let run2 = executor.run_cluster(1).await.unwrap();
        assert_eq!(run2[0].transitioned_to, Some(false));
        let run3 = executor.run_cluster(1).await.unwrap();
        assert_eq!(run3[0].transitioned_to, None);

        assert!(!store.get_address(10).unwrap().unwrap().health.is_up);
        assert_eq!(store.list_notifications().unwrap().len(), 1);
        let tasks = store.list_dns_tasks().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].node_id, 1);
        assert_eq!(tasks[0].task_type, DnsTaskType::NodeChange);
    }

    #[tokio::test]
    async fn empty_cluster_returns_empty_list() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        seed_cluster(&store, 1, test_policy());
        let prober = Arc::new(ScriptedProber::new());

        let results = executor(&store, &prober).run_cluster(1).await.unwrap();
        assert!(results.is_empty());
        assert_eq!(prober.calls(), 0);
    }

    #[tokio::test]
    async fn small_pool_processes_every_target() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        seed_cluster(&store, 1, test_policy());
        let mut prober = ScriptedProber::new();
        for id in 1..=10u64 {
            let ip = format!("10.0.0.{id}");
            seed_node(&store, id, 1);
            seed_address(&store, id * 10, id, &ip, true);
            prober = prober.script(&ip, &[true]);
        }
        let prober = Arc::new(prober);

        let executor = executor(&store, &prober).with_pool_size(3);
        let mut results = executor.run_cluster(1).await.unwrap();
        results.sort_by_key(|r| r.node_id);

        assert_eq!(results.len(), 10);
        assert!(results.iter().all(|r| r.is_up));
        assert_eq!(
            results.iter().map(|r| r.node_id).collect::<Vec<_>>(),
            (1..=10).collect::<Vec<_>>()
        );
        assert_eq!(prober.calls(), 10);
    }

    #[tokio::test]
    async fn unresolved_node_is_reported_but_not_probed() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        seed_cluster(&store, 1, test_policy());
        seed_node(&store, 1, 1);
        seed_address(&store, 10, 1, "10.0.0.1", false);
        let prober = Arc::new(ScriptedProber::new());

        let results = executor(&store, &prober).run_cluster(1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(!results[0].is_up);
        assert_eq!(results[0].error.as_deref(), Some(NO_ADDRESS_REASON));
        assert_eq!(results[0].address_id, None);
        assert_eq!(prober.calls(), 0);

        let address = store.get_address(10).unwrap().unwrap();
        assert_eq!(address.health.consecutive_down, 0);
    }

    #[tokio::test]
    async fn configuration_errors_abort_before_probing() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let prober = Arc::new(ScriptedProber::new());

        let result = executor(&store, &prober).run_cluster(42).await;
        assert!(matches!(result, Err(HealthError::ClusterNotFound(42))));
        assert_eq!(prober.calls(), 0);
    }

    #[tokio::test]
    async fn node_tracking_moves_node_state() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        seed_cluster(&store, 1, test_policy());
        seed_node(&store, 1, 1);
        seed_address(&store, 10, 1, "10.0.0.1", true);
        let prober = Arc::new(ScriptedProber::new());
        let executor = executor(&store, &prober).with_tracking_mode(TrackingMode::Node);

        executor.run_cluster(1).await.unwrap();
        let results = executor.run_cluster(1).await.unwrap();
        assert_eq!(results[0].transitioned_to, Some(false));

        assert!(!store.get_node(1).unwrap().unwrap().health.is_up);
        // Address counters are untouched in node mode.
        assert!(store.get_address(10).unwrap().unwrap().health.is_up);

        let notifications = store.list_notifications().unwrap();
        assert_eq!(notifications.len(), 1);
        assert!(!notifications[0].subject.contains("10.0.0.1"));
        assert_eq!(store.list_dns_tasks().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn node_tracking_without_auto_down_records_nothing() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let mut policy = test_policy();
        policy.auto_down = false;
        seed_cluster(&store, 1, policy);
        seed_node(&store, 1, 1);
        seed_address(&store, 10, 1, "10.0.0.1", true);
        let prober = Arc::new(ScriptedProber::new());
        let executor = executor(&store, &prober).with_tracking_mode(TrackingMode::Node);

        executor.run_cluster(1).await.unwrap();
        executor.run_cluster(1).await.unwrap();

        let node = store.get_node(1).unwrap().unwrap();
        assert_eq!(node.health.consecutive_down, 0);
        assert!(store.list_notifications().unwrap().is_empty());
    }

    #[tokio::test]
    async fn auto_down_disabled_only_counts_failures() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let mut policy = test_policy();
        policy.auto_down = false;
        seed_cluster(&store, 1, policy);
        seed_node(&store, 1, 1);
        seed_address(&store, 10, 1, "10.0.0.1", true);
        let prober = Arc::new(ScriptedProber::new());
        let executor = executor(&store, &prober);

        for _ in 0..4 {
            executor.run_cluster(1).await.unwrap();
        }
        let address = store.get_address(10).unwrap().unwrap();
        assert!(address.health.is_up);
        assert_eq!(address.health.consecutive_down, 4);
        assert!(store.list_dns_tasks().unwrap().is_empty());
    }

    #[tokio::test]
    async fn worker_panic_keeps_results_it_already_reported() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let mut policy = test_policy();
        policy.max_attempts = 1;
        policy.count_down = 1;
        seed_cluster(&store, 1, policy);
        seed_nodes(&store, 3);

        let executor = HealthCheckExecutor::for_store(store.clone(), Arc::new(PanicOn("10.0.0.3")))
            .with_pool_size(1);
        let mut results = executor.run_cluster(1).await.unwrap();
        results.sort_by_key(|r| r.node_id);

        assert_eq!(results.len(), 3);
        for result in &results[..2] {
            assert_eq!(result.error.as_deref(), Some("connection refused"));
            assert_eq!(result.transitioned_to, Some(false));
            assert_eq!(result.attempts, 1);
        }
        assert_eq!(results[2].error.as_deref(), Some(WORKER_ABORTED_REASON));
        assert_eq!(results[2].transitioned_to, None);

        assert!(!store.get_address(10).unwrap().unwrap().health.is_up);
        assert!(!store.get_address(20).unwrap().unwrap().health.is_up);
        assert!(store.get_address(30).unwrap().unwrap().health.is_up);
        assert_eq!(store.list_notifications().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn probes_in_flight_never_exceed_pool_size() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        seed_cluster(&store, 1, test_policy());
        seed_nodes(&store, 20);
        let prober = Arc::new(GaugeProber::default());

        let executor = HealthCheckExecutor::for_store(store.clone(), prober.clone()).with_pool_size(4);
        let results = executor.run_cluster(1).await.unwrap();

        assert_eq!(results.len(), 20);
        assert!(results.iter().all(|r| r.is_up));
        assert_eq!(prober.peak.load(Ordering::SeqCst), 4);
        assert_eq!(prober.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_delay_does_not_hold_other_targets() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let mut policy = test_policy();
        policy.try_delay_ms = Some(10_000);
        seed_cluster(&store, 1, policy);
        seed_nodes(&store, 3);

        let prober = Arc::new(TimedProber::new(
            ScriptedProber::new()
                .script("10.0.0.1", &[false, false, true])
                .script("10.0.0.2", &[true])
                .script("10.0.0.3", &[true]),
        ));
        let executor = HealthCheckExecutor::for_store(store.clone(), prober.clone()).with_pool_size(2);
        let mut results = executor.run_cluster(1).await.unwrap();
        results.sort_by_key(|r| r.node_id);

        assert!(results.iter().all(|r| r.is_up));
        assert_eq!(results[0].attempts, 3);
        let retried = prober.sent_to("10.0.0.1");
        assert_eq!(retried.len(), 3);
        assert!(retried[1] >= Duration::from_secs(10));
        assert!(retried[2] >= Duration::from_secs(20));
        // The other worker finished both remaining targets before the first delay ended.
        for ip in ["10.0.0.2", "10.0.0.3"] {
            let sent = prober.sent_to(ip);
            assert_eq!(sent.len(), 1);
            assert!(sent[0] < Duration::from_secs(1));
        }
    }

    #[tokio::test]
    async fn transition_reaches_each_sink_exactly_once() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        seed_cluster(&store, 1, test_policy());
        seed_node(&store, 1, 1);
        seed_address(&store, 10, 1, "10.0.0.1", true);

        let sink = Arc::new(CountingSink::default());
        let pipeline = PropagationPipeline::new(vec![
            Box::new(NotificationHandler::new(sink.clone())),
            Box::new(DnsTaskHandler::new(sink.clone())),
        ]);
        let executor = HealthCheckExecutor::new(
            store.clone(),
            store.clone(),
            Arc::new(pipeline),
            Arc::new(ScriptedProber::new()),
        );

        for _ in 0..4 {
            executor.run_cluster(1).await.unwrap();
        }
        assert!(!store.get_address(10).unwrap().unwrap().health.is_up);
        assert_eq!(sink.notified.load(Ordering::SeqCst), 1);
        assert_eq!(sink.enqueued.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_handlers_are_reported_on_the_result() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        seed_cluster(&store, 1, test_policy());
        seed_node(&store, 1, 1);
        seed_address(&store, 10, 1, "10.0.0.1", true);

        let pipeline = PropagationPipeline::new(vec![
            Box::new(NotificationHandler::new(Arc::new(OfflineNotifier))),
            Box::new(DnsTaskHandler::new(store.clone())),
        ]);
        let executor = HealthCheckExecutor::new(
            store.clone(),
            store.clone(),
            Arc::new(pipeline),
            Arc::new(ScriptedProber::new()),
        );

        let run1 = executor.run_cluster(1).await.unwrap();
        assert!(run1[0].failed_handlers.is_empty());
        let run2 = executor.run_cluster(1).await.unwrap();
        assert_eq!(run2[0].transitioned_to, Some(false));
        assert_eq!(run2[0].failed_handlers, vec!["notification"]);

        // The state change and the other handlers still went through.
        assert!(!store.get_address(10).unwrap().unwrap().health.is_up);
        assert_eq!(store.list_dns_tasks().unwrap().len(), 1);
        let json = serde_json::to_value(&run2[0]).unwrap();
        assert_eq!(json["failed_handlers"][0], "notification");
    }

    #[test]
    fn pool_size_never_zero() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let prober = Arc::new(ScriptedProber::new());
        assert_eq!(executor(&store, &prober).with_pool_size(0).pool_size(), 1);
        assert_eq!(executor(&store, &prober).pool_size(), DEFAULT_POOL_SIZE);
    }

    #[test]
    fn result_omits_absent_transition_in_json() {
        let result = HealthCheckResult {
            node_id: 1,
            node_name: "edge-1".to_string(),
            address_id: Some(10),
            address: Some("10.0.0.1".to_string()),
            is_up: true,
            error: None,
            cost_ms: 3,
            attempts: 1,
            transitioned_to: None,
            failed_handlers: Vec::new(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["address"], "10.0.0.1");
        assert!(json.get("transitioned_to").is_none());
        assert!(json.get("failed_handlers").is_none());
    }
}
