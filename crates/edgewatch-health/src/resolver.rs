//! Target resolution: which (node, address) pairs a run probes.

use edgewatch_state::{
    Cluster, ClusterId, Node, NodeAddress, NodeId, NodeRole, StateResult, StateStore,
};

use crate::error::{HealthError, HealthResult};
use crate::policy::EffectivePolicy;

/// Read-only lookups the health checker needs from cluster management.
pub trait FleetDirectory: Send + Sync {
    fn find_enabled_cluster(&self, cluster_id: ClusterId) -> StateResult<Option<Cluster>>;

    fn find_enabled_nodes_in_cluster(&self, cluster_id: ClusterId) -> StateResult<Vec<Node>>;

    fn find_first_accessible_address(
        &self,
        node_id: NodeId,
        role: NodeRole,
    ) -> StateResult<Option<NodeAddress>>;
}

impl FleetDirectory for StateStore {
    fn find_enabled_cluster(&self, cluster_id: ClusterId) -> StateResult<Option<Cluster>> {
        StateStore::find_enabled_cluster(self, cluster_id)
    }

    fn find_enabled_nodes_in_cluster(&self, cluster_id: ClusterId) -> StateResult<Vec<Node>> {
        StateStore::find_enabled_nodes_in_cluster(self, cluster_id)
    }

    fn find_first_accessible_address(
        &self,
        node_id: NodeId,
        role: NodeRole,
    ) -> StateResult<Option<NodeAddress>> {
        StateStore::find_first_accessible_address(self, node_id, role)
    }
}

/// One enabled node and the address it will be probed on.
///
/// `address` is `None` when the node has no eligible address, so callers can
/// tell "never checked" apart from "checked and failed".
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub node: Node,
    pub address: Option<NodeAddress>,
}

/// Everything a run needs, read once before probing starts.
#[derive(Debug, Clone)]
pub struct ResolvedCluster {
    pub cluster: Cluster,
    pub policy: EffectivePolicy,
    pub targets: Vec<Target>,
}

/// Resolve a cluster's policy snapshot and targets.
///
/// Fails without partial results if the cluster is missing or disabled, or if
/// its policy is absent or malformed.
pub fn resolve_targets<D>(directory: &D, cluster_id: ClusterId) -> HealthResult<ResolvedCluster>
where
    D: FleetDirectory + ?Sized,
{
    let cluster = directory
        .find_enabled_cluster(cluster_id)?
        .ok_or(HealthError::ClusterNotFound(cluster_id))?;
    let policy = cluster
        .health_check
        .as_ref()
        .ok_or(HealthError::PolicyMissing(cluster_id))?;
    let policy = EffectivePolicy::from_policy(policy)?;

    let mut targets = Vec::new();
    for node in directory.find_enabled_nodes_in_cluster(cluster_id)? {
        let address = directory.find_first_accessible_address(node.id, node.role)?;
        targets.push(Target { node, address });
    }

    Ok(ResolvedCluster {
        cluster,
        policy,
        targets,
    })
}
