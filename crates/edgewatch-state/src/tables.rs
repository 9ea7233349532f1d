//! redb table definitions for the EdgeWatch state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).
//! Id-keyed tables store the id zero-padded to 20 digits (see [`id_key`]).

use redb::TableDefinition;

/// Shape shared by every table in the store.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Clusters keyed by `{cluster_id}`.
pub const CLUSTERS: JsonTable = TableDefinition::new("clusters");

/// Nodes keyed by `{node_id}`.
pub const NODES: JsonTable = TableDefinition::new("nodes");

/// Node addresses keyed by `{address_id}`.
pub const ADDRESSES: JsonTable = TableDefinition::new("addresses");

/// Notifications keyed by a monotonically increasing sequence.
pub const NOTIFICATIONS: JsonTable = TableDefinition::new("notifications");

/// Pending DNS tasks keyed by `{node_id}:{task_type}`.
pub const DNS_TASKS: JsonTable = TableDefinition::new("dns_tasks");

/// Address thresholds keyed by `{threshold_id}`.
pub const THRESHOLDS: JsonTable = TableDefinition::new("thresholds");

/// Render a numeric id as an order-preserving table key.
pub fn id_key(id: u64) -> String {
    format!("{id:020}")
}
