//! Static cluster membership
//!
//! A [`MemoryClusterMembership`] holds the node list and liveness shared by every node
//! of a simulated cluster; [`MemoryClusterMembership::view`] hands each node its local
//! [`ClusterMembershipEffects`] handle.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use strand_core::effects::{ClusterMembershipEffects, NodeState};
use strand_core::NodeId;

#[derive(Default)]
struct MembershipState {
    nodes: BTreeSet<NodeId>,
    inactive: HashSet<NodeId>,
}

/// Shared membership table
#[derive(Clone, Default)]
pub struct MemoryClusterMembership {
    state: Arc<RwLock<MembershipState>>,
}

impl MemoryClusterMembership {
    /// Create a membership table with every node active
    pub fn new(nodes: impl IntoIterator<Item = NodeId>) -> Self {
        let membership = Self::default();
        membership.state.write().nodes.extend(nodes);
        membership
    }

    /// Local view for `node`
    pub fn view(&self, node: NodeId) -> MembershipView {
        MembershipView {
            local: node,
            state: self.state.clone(),
        }
    }

    /// Add an active node
    pub fn add_node(&self, node: NodeId) {
        let mut state = self.state.write();
        state.inactive.remove(&node);
        state.nodes.insert(node);
    }

    /// Forget a node entirely
    pub fn remove_node(&self, node: &NodeId) {
        let mut state = self.state.write();
        state.nodes.remove(node);
        state.inactive.remove(node);
    }

    /// Change the liveness of a known node
    pub fn set_state(&self, node: &NodeId, node_state: NodeState) {
        let mut state = self.state.write();
        match node_state {
            NodeState::Active => {
                state.inactive.remove(node);
            }
            NodeState::Inactive => {
                state.inactive.insert(node.clone());
            }
        }
    }
}

/// One node's view of a [`MemoryClusterMembership`]
#[derive(Clone)]
pub struct MembershipView {
    local: NodeId,
    state: Arc<RwLock<MembershipState>>,
}

impl ClusterMembershipEffects for MembershipView {
    fn local_node(&self) -> NodeId {
        self.local.clone()
    }

    fn nodes(&self) -> Vec<NodeId> {
        self.state.read().nodes.iter().cloned().collect()
    }

    fn state(&self, node: &NodeId) -> NodeState {
        let state = self.state.read();
        if state.nodes.contains(node) && !state.inactive.contains(node) {
            NodeState::Active
        } else {
            NodeState::Inactive
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<NodeId> {
        names.iter().map(|n| NodeId::new(*n)).collect()
    }

    #[test]
    fn test_peers_exclude_local_node() {
        let membership = MemoryClusterMembership::new(ids(&["a", "b", "c"]));
        let view = membership.view(NodeId::new("b"));
        assert_eq!(view.peers(), ids(&["a", "c"]));
    }

    #[test]
    fn test_inactive_nodes_are_not_active_peers() {
        let membership = MemoryClusterMembership::new(ids(&["a", "b", "c"]));
        let view = membership.view(NodeId::new("a"));
        membership.set_state(&NodeId::new("c"), NodeState::Inactive);

        assert_eq!(view.active_peers(), ids(&["b"]));
        assert_eq!(view.peers(), ids(&["b", "c"]));
        assert_eq!(view.state(&NodeId::new("zz")), NodeState::Inactive);

        membership.set_state(&NodeId::new("c"), NodeState::Active);
        assert_eq!(view.active_peers(), ids(&["b", "c"]));
    }

    #[test]
    fn test_membership_changes_are_shared() {
        let membership = MemoryClusterMembership::new(ids(&["a"]));
        let view = membership.view(NodeId::new("a"));
        membership.add_node(NodeId::new("d"));
        assert_eq!(view.active_peers(), ids(&["d"]));
        membership.remove_node(&NodeId::new("d"));
        assert!(view.peers().is_empty());
    }
}
