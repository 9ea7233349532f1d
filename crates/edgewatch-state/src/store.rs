//! Redb-backed state persistence for EdgeWatch.
//!
//! Provides typed operations over clusters, nodes, node addresses,
//! notifications, DNS tasks, and address thresholds. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, TableHandle};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in [CLUSTERS, NODES, ADDRESSES, NOTIFICATIONS, DNS_TASKS, THRESHOLDS] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Clusters ───────────────────────────────────────────────────

    /// Insert or update a cluster.
    pub fn put_cluster(&self, cluster: &Cluster) -> StateResult<()> {
        self.put_value(CLUSTERS, &cluster.table_key(), cluster)?;
        debug!(cluster_id = cluster.id, "cluster stored");
        Ok(())
    }

    /// Get a cluster by ID, enabled or not.
    pub fn get_cluster(&self, cluster_id: ClusterId) -> StateResult<Option<Cluster>> {
        self.get_value(CLUSTERS, &id_key(cluster_id))
    }

    /// Get a cluster by ID if it is switched on.
    pub fn find_enabled_cluster(&self, cluster_id: ClusterId) -> StateResult<Option<Cluster>> {
        Ok(self.get_cluster(cluster_id)?.filter(|c| c.is_on))
    }

    /// List all clusters.
    pub fn list_clusters(&self) -> StateResult<Vec<Cluster>> {
        self.scan_values(CLUSTERS, |_: &Cluster| true)
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Insert or update a node.
    pub fn put_node(&self, node: &Node) -> StateResult<()> {
        self.put_value(NODES, &node.table_key(), node)
    }

    /// Get a node by ID.
    pub fn get_node(&self, node_id: NodeId) -> StateResult<Option<Node>> {
        self.get_value(NODES, &id_key(node_id))
    }

    /// List the switched-on nodes of a cluster, in id order.
    pub fn find_enabled_nodes_in_cluster(&self, cluster_id: ClusterId) -> StateResult<Vec<Node>> {
        self.scan_values(NODES, |n: &Node| n.cluster_id == cluster_id && n.is_on)
    }

    /// Apply `apply` to a node's health counters inside one write transaction.
    ///
    /// Only the counters are handed to the closure, so concurrent edits to
    /// other node fields are never overwritten with stale values.
    pub fn update_node_health<R>(
        &self,
        node_id: NodeId,
        apply: impl FnOnce(&mut HealthCounters) -> R,
    ) -> StateResult<(Node, R)> {
        self.update_value(NODES, &id_key(node_id), |node: &mut Node| {
            apply(&mut node.health)
        })
    }

    // ── Addresses ──────────────────────────────────────────────────

    /// Insert or update a node address.
    pub fn put_address(&self, address: &NodeAddress) -> StateResult<()> {
        self.put_value(ADDRESSES, &address.table_key(), address)
    }

    /// Get an address by ID.
    pub fn get_address(&self, address_id: AddressId) -> StateResult<Option<NodeAddress>> {
        self.get_value(ADDRESSES, &id_key(address_id))
    }

    /// List every address of a node, in id order.
    pub fn list_addresses_for_node(&self, node_id: NodeId) -> StateResult<Vec<NodeAddress>> {
        self.scan_values(ADDRESSES, |a: &NodeAddress| a.node_id == node_id)
    }

    /// First address of a node eligible for probing.
    ///
    /// Candidates are switched on, accessible, and of the requested role.
    /// The highest `order` wins; ties go to the lowest id.
    pub fn find_first_accessible_address(
        &self,
        node_id: NodeId,
        role: NodeRole,
    ) -> StateResult<Option<NodeAddress>> {
        let candidates = self.scan_values(ADDRESSES, |a: &NodeAddress| {
            a.node_id == node_id && a.role == role && a.is_on && a.can_access
        })?;
        // `max_by_key` returns the last of equal maxima, so walk ids in
        // descending order to resolve ties to the lowest id.
        Ok(candidates
            .into_iter()
            .rev()
            .max_by_key(|a| a.order))
    }

    /// Apply `apply` to an address's health counters inside one write transaction.
    ///
    /// Returns the stored address after the update together with the
    /// closure's result.
    pub fn update_address_health<R>(
        &self,
        address_id: AddressId,
        apply: impl FnOnce(&mut HealthCounters) -> R,
    ) -> StateResult<(NodeAddress, R)> {
        self.update_value(ADDRESSES, &id_key(address_id), |address: &mut NodeAddress| {
            apply(&mut address.health)
        })
    }

    /// Assign or clear the backup IP of an address. Returns true if it changed.
    pub fn set_address_backup(
        &self,
        address_id: AddressId,
        backup: Option<(ThresholdId, String)>,
    ) -> StateResult<bool> {
        let (_, changed) =
            self.update_value(ADDRESSES, &id_key(address_id), |address: &mut NodeAddress| {
                let (threshold_id, ip) = match backup {
                    Some((id, ip)) => (Some(id), Some(ip)),
                    None => (None, None),
                };
                let changed =
                    address.backup_threshold_id != threshold_id || address.backup_ip != ip;
                address.backup_threshold_id = threshold_id;
                address.backup_ip = ip;
                changed
            })?;
        Ok(changed)
    }

    // ── Thresholds ─────────────────────────────────────────────────

    /// Insert or update an address threshold.
    pub fn put_threshold(&self, threshold: &AddressThreshold) -> StateResult<()> {
        self.put_value(THRESHOLDS, &threshold.table_key(), threshold)
    }

    /// List the thresholds configured on a node.
    pub fn list_thresholds_for_node(&self, node_id: NodeId) -> StateResult<Vec<AddressThreshold>> {
        self.scan_values(THRESHOLDS, |t: &AddressThreshold| t.node_id == node_id)
    }

    // ── Notifications ──────────────────────────────────────────────

    /// Append a notification and return it with its assigned sequence number.
    pub fn create_notification(&self, new: NewNotification) -> StateResult<Notification> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let notification;
        {
            let mut table = txn.open_table(NOTIFICATIONS).map_err(map_err!(Table))?;
            let next_id = match table.last().map_err(map_err!(Read))? {
                Some((key, _)) => key.value().parse::<u64>().unwrap_or(0) + 1,
                None => 1,
            };
            notification = Notification {
                id: next_id,
                role: new.role,
                cluster_id: new.cluster_id,
                node_id: new.node_id,
                message_type: new.message_type,
                level: new.level,
                subject: new.subject,
                body: new.body,
                created_at: epoch_secs(),
            };
            let value = serde_json::to_vec(&notification).map_err(map_err!(Serialize))?;
            table
                .insert(id_key(next_id).as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = notification.id, node_id = notification.node_id, "notification created");
        Ok(notification)
    }

    /// List all notifications, oldest first.
    pub fn list_notifications(&self) -> StateResult<Vec<Notification>> {
        self.scan_values(NOTIFICATIONS, |_: &Notification| true)
    }

    // ── DNS tasks ──────────────────────────────────────────────────

    /// Request DNS re-evaluation for a node.
    ///
    /// A pending task of the same type for the same node is refreshed
    /// rather than duplicated.
    pub fn enqueue_dns_task(&self, node_id: NodeId, task_type: DnsTaskType) -> StateResult<DnsTask> {
        let key = dns_task_key(node_id, task_type);
        let now = epoch_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let task;
        {
            let mut table = txn.open_table(DNS_TASKS).map_err(map_err!(Table))?;
            let existing: Option<DnsTask> = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };
            task = DnsTask {
                node_id,
                task_type,
                created_at: existing.map(|t| t.created_at).unwrap_or(now),
                updated_at: now,
            };
            let value = serde_json::to_vec(&task).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "dns task enqueued");
        Ok(task)
    }

    /// List pending DNS tasks without removing them.
    pub fn list_dns_tasks(&self) -> StateResult<Vec<DnsTask>> {
        self.scan_values(DNS_TASKS, |_: &DnsTask| true)
    }

    /// Remove and return all pending DNS tasks.
    pub fn take_dns_tasks(&self) -> StateResult<Vec<DnsTask>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut tasks = Vec::new();
        {
            let mut table = txn.open_table(DNS_TASKS).map_err(map_err!(Table))?;
            let mut keys = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                keys.push(key.value().to_string());
                let task: DnsTask =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                tasks.push(task);
            }
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(count = tasks.len(), "dns tasks taken");
        Ok(tasks)
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn put_value<T: Serialize>(&self, def: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_value<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn scan_values<T: DeserializeOwned>(
        &self,
        def: JsonTable,
        mut keep: impl FnMut(&T) -> bool,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let item: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if keep(&item) {
                results.push(item);
            }
        }
        Ok(results)
    }

    /// Read-modify-write a single record inside one write transaction.
    fn update_value<T, R>(
        &self,
        def: JsonTable,
        key: &str,
        apply: impl FnOnce(&mut T) -> R,
    ) -> StateResult<(T, R)>
    where
        T: Serialize + DeserializeOwned,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            let mut record: T = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => {
                    return Err(StateError::NotFound {
                        table: def.name().to_string(),
                        key: key.to_string(),
                    });
                }
            };
            let result = apply(&mut record);
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
            updated = (record, result);
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
