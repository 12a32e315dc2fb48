//! Cluster membership effect trait

use crate::identifiers::NodeId;
use serde::{Deserialize, Serialize};

/// Liveness of a cluster member as seen by the local node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    /// Reachable and participating
    Active,
    /// Known but currently not participating
    Inactive,
}

impl NodeState {
    /// Whether the node is active
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Local view of cluster membership
pub trait ClusterMembershipEffects: Send + Sync {
    /// Identity of the local node
    fn local_node(&self) -> NodeId;

    /// Every known node, including the local one
    fn nodes(&self) -> Vec<NodeId>;

    /// Current state of a node; unknown nodes are inactive
    fn state(&self, node: &NodeId) -> NodeState;

    /// Every other node, active or not
    fn peers(&self) -> Vec<NodeId> {
        let local = self.local_node();
        self.nodes().into_iter().filter(|n| *n != local).collect()
    }

    /// Every other node that is currently active
    fn active_peers(&self) -> Vec<NodeId> {
        self.peers()
            .into_iter()
            .filter(|n| self.state(n).is_active())
            .collect()
    }
}
