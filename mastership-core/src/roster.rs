//! The cluster node roster.
//!
//! Cluster membership and failure detection are owned by another layer. This module only defines
//! the read-only view which the election algorithm consults, along with a simple implementation
//! which the membership layer keeps up-to-date.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::ids::NodeId;

/// A view of the cluster's nodes and their liveness.
pub trait NodeRoster: Send + Sync + 'static {
    /// The identity of this node.
    fn local_node(&self) -> &NodeId;

    /// All nodes known to the cluster, reachable or not.
    fn nodes(&self) -> Vec<NodeId>;

    /// Check if the given node is currently reachable.
    ///
    /// Nodes unknown to the roster are never reachable.
    fn is_reachable(&self, node: &NodeId) -> bool;
}

/// A roster holding a fixed set of nodes whose liveness is updated externally.
pub struct StaticRoster {
    local: NodeId,
    /// All known nodes mapped to their reachability.
    nodes: ArcSwap<BTreeMap<NodeId, bool>>,
}

impl StaticRoster {
    /// Create a new instance where all given nodes, including the local node, start reachable.
    pub fn new(local: NodeId, nodes: impl IntoIterator<Item = NodeId>) -> Self {
        let mut map: BTreeMap<NodeId, bool> = nodes.into_iter().map(|node| (node, true)).collect();
        map.insert(local.clone(), true);
        Self {
            local,
            nodes: ArcSwap::from_pointee(map),
        }
    }

    /// Update the reachability of the given node, adding it to the roster if it is unknown.
    ///
    /// Returns `true` if this changed the roster.
    pub fn set_reachable(&self, node: &NodeId, reachable: bool) -> bool {
        let current = self.nodes.load();
        if current.get(node) == Some(&reachable) {
            return false;
        }
        self.nodes.rcu(|nodes| {
            let mut nodes = BTreeMap::clone(nodes);
            nodes.insert(node.clone(), reachable);
            Arc::new(nodes)
        });
        tracing::debug!(%node, reachable, "node reachability updated");
        true
    }
}

impl NodeRoster for StaticRoster {
    fn local_node(&self) -> &NodeId {
        &self.local
    }

    fn nodes(&self) -> Vec<NodeId> {
        self.nodes.load().keys().cloned().collect()
    }

    fn is_reachable(&self, node: &NodeId) -> bool {
        self.nodes.load().get(node).copied().unwrap_or(false)
    }
}
