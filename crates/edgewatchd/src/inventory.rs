//! Fleet inventory import.
//!
//! Loads clusters, nodes, addresses and thresholds from a JSON document into
//! the state store. Records are upserted by id, so importing the same file
//! twice is harmless. Health counters already in the store are preserved.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use edgewatch_state::{AddressThreshold, Cluster, Node, NodeAddress, StateStore};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Inventory {
    pub clusters: Vec<Cluster>,
    pub nodes: Vec<Node>,
    pub addresses: Vec<NodeAddress>,
    pub thresholds: Vec<AddressThreshold>,
}

/// Number of records written per kind.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub clusters: usize,
    pub nodes: usize,
    pub addresses: usize,
    pub thresholds: usize,
}

impl Inventory {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read inventory {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse inventory {}", path.display()))
    }

    /// Check that every reference resolves, either within this inventory or
    /// to a record already in the store.
    pub fn validate(&self, store: &StateStore) -> Result<()> {
        let clusters: HashSet<_> = self.clusters.iter().map(|c| c.id).collect();
        let nodes: HashSet<_> = self.nodes.iter().map(|n| n.id).collect();
        let addresses: HashSet<_> = self.addresses.iter().map(|a| a.id).collect();

        for node in &self.nodes {
            if !clusters.contains(&node.cluster_id) && store.get_cluster(node.cluster_id)?.is_none()
            {
                bail!("node {} refers to unknown cluster {}", node.id, node.cluster_id);
            }
        }
        for address in &self.addresses {
            if !nodes.contains(&address.node_id) && store.get_node(address.node_id)?.is_none() {
                bail!("address {} refers to unknown node {}", address.id, address.node_id);
            }
        }
        for threshold in &self.thresholds {
            if !addresses.contains(&threshold.address_id)
                && store.get_address(threshold.address_id)?.is_none()
            {
                bail!(
                    "threshold {} refers to unknown address {}",
                    threshold.id,
                    threshold.address_id
                );
            }
        }
        Ok(())
    }

    /// Validate, then write every record into `store`.
    pub fn load_into(&self, store: &StateStore) -> Result<ImportSummary> {
        self.validate(store)?;

        for cluster in &self.clusters {
            store.put_cluster(cluster)?;
        }
        for node in &self.nodes {
            let mut node = node.clone();
            if let Some(existing) = store.get_node(node.id)? {
                node.health = existing.health;
            }
            store.put_node(&node)?;
        }
        for address in &self.addresses {
            let mut address = address.clone();
            if let Some(existing) = store.get_address(address.id)? {
                address.health = existing.health;
                address.backup_ip = existing.backup_ip;
                address.backup_threshold_id = existing.backup_threshold_id;
            }
            store.put_address(&address)?;
        }
        for threshold in &self.thresholds {
            store.put_threshold(threshold)?;
        }

        Ok(ImportSummary {
            clusters: self.clusters.len(),
            nodes: self.nodes.len(),
            addresses: self.addresses.len(),
            thresholds: self.thresholds.len(),
        })
    }
}
