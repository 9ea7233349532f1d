//! Fan-out of confirmed state transitions to downstream systems.
//!
//! The persisted up/down state is authoritative and is written before any
//! handler runs. Handlers are independent: one failing never stops the
//! others, and nothing is rolled back. Every handler is safe to re-run for
//! the same event.

use std::sync::Arc;

use tracing::{error, info, warn};

use edgewatch_state::{
    AddressId, ClusterId, DnsTaskType, MessageLevel, MessageType, NewNotification, Node,
    NodeAddress, NodeId, NodeRole, StateStore,
};

use crate::error::PropagationResult;
use crate::tracker::Transition;

/// A confirmed up/down change, as seen by downstream handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransitionEvent {
    pub cluster_id: ClusterId,
    pub node_id: NodeId,
    pub node_name: String,
    pub role: NodeRole,
    /// `None` when health is tracked per node.
    pub address_id: Option<AddressId>,
    pub address: Option<String>,
    pub was_up: bool,
    pub is_up: bool,
    /// Failure reason of the run that caused a down transition.
    pub reason: Option<String>,
}

impl StateTransitionEvent {
    pub fn for_address(
        node: &Node,
        address: &NodeAddress,
        transition: Transition,
        reason: Option<String>,
    ) -> Self {
        Self {
            cluster_id: node.cluster_id,
            node_id: node.id,
            node_name: node.name.clone(),
            role: node.role,
            address_id: Some(address.id),
            address: Some(address.ip.clone()),
            was_up: transition.was_up,
            is_up: transition.is_up,
            reason,
        }
    }

    pub fn for_node(node: &Node, transition: Transition, reason: Option<String>) -> Self {
        Self {
            cluster_id: node.cluster_id,
            node_id: node.id,
            node_name: node.name.clone(),
            role: node.role,
            address_id: None,
            address: None,
            was_up: transition.was_up,
            is_up: transition.is_up,
            reason,
        }
    }

    pub fn message_type(&self) -> MessageType {
        if self.is_up {
            MessageType::HealthCheckNodeUp
        } else {
            MessageType::HealthCheckNodeDown
        }
    }

    pub fn level(&self) -> MessageLevel {
        if self.is_up {
            MessageLevel::Success
        } else {
            MessageLevel::Error
        }
    }

    /// One-line summary for notification lists.
    pub fn subject(&self) -> String {
        let state = if self.is_up { "up" } else { "down" };
        match &self.address {
            Some(ip) => format!("node '{}' address {ip} is {state}", self.node_name),
            None => format!("node '{}' is {state}", self.node_name),
        }
    }

    /// Full notification text.
    pub fn body(&self) -> String {
        let target = match &self.address {
            Some(ip) => format!("address {ip} of node '{}'", self.node_name),
            None => format!("node '{}'", self.node_name),
        };
        if self.is_up {
            format!("health check passed again, {target} was brought back online")
        } else {
            match &self.reason {
                Some(reason) => format!(
                    "health check failed, {target} was taken offline automatically: {reason}"
                ),
                None => format!("health check failed, {target} was taken offline automatically"),
            }
        }
    }
}

// ── Sinks ─────────────────────────────────────────────────────────

/// Operator-facing notification store.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: NewNotification) -> PropagationResult<()>;
}

/// Queue consumed by the DNS subsystem.
pub trait DnsTaskSink: Send + Sync {
    fn enqueue(&self, node_id: NodeId, task_type: DnsTaskType) -> PropagationResult<()>;
}

/// Escalation thresholds configured on nodes.
pub trait ThresholdSink: Send + Sync {
    /// Re-evaluate every threshold of a node against its addresses' current state.
    fn fire(&self, role: NodeRole, node_id: NodeId) -> PropagationResult<()>;
}

impl NotificationSink for StateStore {
    fn notify(&self, notification: NewNotification) -> PropagationResult<()> {
        self.create_notification(notification)?;
        Ok(())
    }
}

impl DnsTaskSink for StateStore {
    fn enqueue(&self, node_id: NodeId, task_type: DnsTaskType) -> PropagationResult<()> {
        self.enqueue_dns_task(node_id, task_type)?;
        Ok(())
    }
}

impl ThresholdSink for StateStore {
    fn fire(&self, role: NodeRole, node_id: NodeId) -> PropagationResult<()> {
        for threshold in self.list_thresholds_for_node(node_id)? {
            let Some(address) = self.get_address(threshold.address_id)? else {
                warn!(
                    threshold_id = threshold.id,
                    address_id = threshold.address_id,
                    "threshold refers to a missing address"
                );
                continue;
            };
            if address.role != role {
                continue;
            }

            let backup = match (address.health.is_up, address.backup_threshold_id) {
                // Only withdraw what this threshold assigned.
                (true, Some(id)) if id == threshold.id => None,
                (true, _) => continue,
                // Another threshold already covers this address.
                (false, Some(id)) if id != threshold.id => continue,
                (false, _) => Some((threshold.id, threshold.backup_ip.clone())),
            };

            if self.set_address_backup(address.id, backup)? {
                info!(
                    node_id,
                    address_id = address.id,
                    threshold_id = threshold.id,
                    is_up = address.health.is_up,
                    "address backup updated"
                );
            }
        }
        Ok(())
    }
}

// ── Handlers ──────────────────────────────────────────────────────

/// One downstream reaction to a transition.
pub trait TransitionHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn handle(&self, event: &StateTransitionEvent) -> PropagationResult<()>;
}

pub struct NotificationHandler<S> {
    sink: Arc<S>,
}

impl<S: NotificationSink> NotificationHandler<S> {
    pub fn new(sink: Arc<S>) -> Self {
        Self { sink }
    }
}

impl<S: NotificationSink> TransitionHandler for NotificationHandler<S> {
    fn name(&self) -> &'static str {
        "notification"
    }

    fn handle(&self, event: &StateTransitionEvent) -> PropagationResult<()> {
        self.sink.notify(NewNotification {
            role: event.role,
            cluster_id: event.cluster_id,
            node_id: event.node_id,
            message_type: event.message_type(),
            level: event.level(),
            subject: event.subject(),
            body: event.body(),
        })
    }
}

/// Asks DNS to re-evaluate the node's records, for roles that serve DNS.
pub struct DnsTaskHandler<S> {
    sink: Arc<S>,
}

impl<S: DnsTaskSink> DnsTaskHandler<S> {
    pub fn new(sink: Arc<S>) -> Self {
        Self { sink }
    }
}

impl<S: DnsTaskSink> TransitionHandler for DnsTaskHandler<S> {
    fn name(&self) -> &'static str {
        "dns_task"
    }

    fn handle(&self, event: &StateTransitionEvent) -> PropagationResult<()> {
        if !event.role.participates_in_dns() {
            return Ok(());
        }
        self.sink.enqueue(event.node_id, DnsTaskType::NodeChange)
    }
}

/// Promotes or withdraws backup addresses. Skips node-level events.
pub struct ThresholdHandler<S> {
    sink: Arc<S>,
}

impl<S: ThresholdSink> ThresholdHandler<S> {
    pub fn new(sink: Arc<S>) -> Self {
        Self { sink }
    }
}

impl<S: ThresholdSink> TransitionHandler for ThresholdHandler<S> {
    fn name(&self) -> &'static str {
        "threshold"
    }

    fn handle(&self, event: &StateTransitionEvent) -> PropagationResult<()> {
        if event.address_id.is_none() {
            return Ok(());
        }
        self.sink.fire(event.role, event.node_id)
    }
}

// ── Pipeline ──────────────────────────────────────────────────────

/// Which handlers failed for one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagationReport {
    pub failed: Vec<&'static str>,
}

impl PropagationReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Ordered list of independent transition handlers.
pub struct PropagationPipeline {
    handlers: Vec<Box<dyn TransitionHandler>>,
}

impl PropagationPipeline {
    pub fn new(handlers: Vec<Box<dyn TransitionHandler>>) -> Self {
        Self { handlers }
    }

    /// Notification, DNS and threshold handlers all backed by one store.
    pub fn for_store(store: Arc<StateStore>) -> Self {
        Self::new(vec![
            Box::new(NotificationHandler::new(store.clone())),
            Box::new(DnsTaskHandler::new(store.clone())),
            Box::new(ThresholdHandler::new(store)),
        ])
    }

    /// Run every handler once. Failures are logged and reported, never retried.
    pub fn apply(&self, event: &StateTransitionEvent) -> PropagationReport {
        info!(
            cluster_id = event.cluster_id,
            node_id = event.node_id,
            address = event.address.as_deref().unwrap_or_default(),
            is_up = event.is_up,
            "health state changed"
        );

        let mut report = PropagationReport::default();
        for handler in &self.handlers {
            if let Err(e) = handler.handle(event) {
                error!(
                    handler = handler.name(),
                    node_id = event.node_id,
                    error = %e,
                    "transition handler failed"
                );
                report.failed.push(handler.name());
            }
        }
        report
    }
}
