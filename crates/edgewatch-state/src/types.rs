//! Domain types for the EdgeWatch state store.
//!
//! These types represent the persisted fleet model: clusters and their
//! health-check policies, nodes, node addresses, and the records emitted
//! downstream of a health transition. All types are serializable to/from
//! JSON for storage in redb tables.

use serde::{Deserialize, Serialize};

use crate::tables::id_key;

/// Unique identifier for a node cluster.
pub type ClusterId = u64;

/// Unique identifier for a node.
pub type NodeId = u64;

/// Unique identifier for a node address.
pub type AddressId = u64;

/// Unique identifier for an address threshold.
pub type ThresholdId = u64;

// ── Cluster ───────────────────────────────────────────────────────

/// A group of nodes sharing one health-check policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    pub id: ClusterId,
    pub name: String,
    /// Disabled clusters are invisible to the health subsystem.
    pub is_on: bool,
    /// Health-check policy; `None` means health checking is not configured.
    pub health_check: Option<HealthCheckPolicy>,
    /// Unix timestamp (seconds) when this cluster was created.
    pub created_at: u64,
}

/// Health-check policy as configured by operators.
///
/// Values are stored as entered; clamping and defaults are applied when a
/// run takes its snapshot of the policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct HealthCheckPolicy {
    /// Probe URL template containing a `${host}` placeholder.
    pub url: String,
    /// HTTP method, e.g. "GET" or "HEAD".
    pub method: String,
    /// Accepted status codes. Empty means any response counts as reachable.
    pub status_codes: Vec<u16>,
    /// User-Agent override.
    pub user_agent: String,
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Attempts per target per run.
    pub max_attempts: i64,
    /// Delay between attempts in milliseconds.
    pub try_delay_ms: Option<u64>,
    /// Consecutive successes needed to go up.
    pub count_up: u32,
    /// Consecutive failures needed to go down.
    pub count_down: u32,
    /// Whether sustained failures may take an address down automatically.
    pub auto_down: bool,
    /// Ask the edge node to answer the probe without running its full
    /// request pipeline.
    pub only_basic_request: bool,
}

/// Which record carries the hysteresis counters of a cluster's health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    /// Counters and up/down state live on each probed address.
    #[default]
    Address,
    /// Counters and up/down state live on the node; only evaluated when
    /// the policy enables auto-down.
    Node,
}

// ── Node ──────────────────────────────────────────────────────────

/// What a node does in the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Edge node serving traffic; resolvable through DNS.
    #[default]
    Node,
    /// Authoritative name server node.
    Ns,
}

impl NodeRole {
    /// Whether address changes of this role feed DNS resolution.
    pub fn participates_in_dns(self) -> bool {
        matches!(self, NodeRole::Node)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeRole::Node => "node",
            NodeRole::Ns => "ns",
        }
    }
}

/// Hysteresis state persisted alongside a node or address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthCounters {
    /// Aggregated health state.
    pub is_up: bool,
    /// Consecutive passing runs.
    pub consecutive_up: u32,
    /// Consecutive failing runs.
    pub consecutive_down: u32,
    /// Unix timestamp of the last up/down transition.
    pub state_changed_at: u64,
}

impl Default for HealthCounters {
    fn default() -> Self {
        Self {
            is_up: true,
            consecutive_up: 0,
            consecutive_down: 0,
            state_changed_at: 0,
        }
    }
}

/// A fleet member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub cluster_id: ClusterId,
    pub name: String,
    pub is_on: bool,
    #[serde(default)]
    pub role: NodeRole,
    /// Node-level health, used only when tracking by node.
    #[serde(default)]
    pub health: HealthCounters,
    pub created_at: u64,
}

// ── Node address ──────────────────────────────────────────────────

/// One reachable endpoint of a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeAddress {
    pub id: AddressId,
    pub node_id: NodeId,
    #[serde(default)]
    pub role: NodeRole,
    #[serde(default)]
    pub name: String,
    /// IPv4 or IPv6 literal.
    pub ip: String,
    /// Higher orders are preferred when picking a node's probe address.
    #[serde(default)]
    pub order: i32,
    /// Eligible for probing and serving.
    pub can_access: bool,
    pub is_on: bool,
    #[serde(default)]
    pub health: HealthCounters,
    /// Backup IP assigned by a fired threshold while this address is down.
    #[serde(default)]
    pub backup_ip: Option<String>,
    #[serde(default)]
    pub backup_threshold_id: Option<ThresholdId>,
}

/// Escalation rule promoting a backup IP for a node's address while it is down.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddressThreshold {
    pub id: ThresholdId,
    pub node_id: NodeId,
    pub address_id: AddressId,
    pub backup_ip: String,
}

// ── Notifications ─────────────────────────────────────────────────

/// Kind of operator notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    HealthCheckNodeUp,
    HealthCheckNodeDown,
}

/// Severity of an operator notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageLevel {
    Success,
    Error,
}

/// Human-facing record of something that happened to a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    /// Sequence number assigned by the store.
    pub id: u64,
    pub role: NodeRole,
    pub cluster_id: ClusterId,
    pub node_id: NodeId,
    pub message_type: MessageType,
    pub level: MessageLevel,
    pub subject: String,
    pub body: String,
    pub created_at: u64,
}

/// Fields of a notification before the store assigns its sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub role: NodeRole,
    pub cluster_id: ClusterId,
    pub node_id: NodeId,
    pub message_type: MessageType,
    pub level: MessageLevel,
    pub subject: String,
    pub body: String,
}

// ── DNS tasks ─────────────────────────────────────────────────────

/// Kind of DNS re-evaluation requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DnsTaskType {
    NodeChange,
}

impl DnsTaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            DnsTaskType::NodeChange => "node_change",
        }
    }
}

/// Pending request for the DNS subsystem to re-evaluate a node's records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DnsTask {
    pub node_id: NodeId,
    pub task_type: DnsTaskType,
    /// Unix timestamp of the first enqueue since the task was last taken.
    pub created_at: u64,
    /// Unix timestamp of the latest enqueue.
    pub updated_at: u64,
}

impl Cluster {
    pub fn table_key(&self) -> String {
        id_key(self.id)
    }
}

impl Node {
    pub fn table_key(&self) -> String {
        id_key(self.id)
    }
}

impl NodeAddress {
    pub fn table_key(&self) -> String {
        id_key(self.id)
    }
}

impl AddressThreshold {
    pub fn table_key(&self) -> String {
        id_key(self.id)
    }
}

impl DnsTask {
    /// Build the composite key for the DNS tasks table.
    pub fn table_key(&self) -> String {
        dns_task_key(self.node_id, self.task_type)
    }
}

pub(crate) fn dns_task_key(node_id: NodeId, task_type: DnsTaskType) -> String {
    format!("{}:{}", id_key(node_id), task_type.as_str())
}
