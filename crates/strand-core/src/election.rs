//! Leadership records of a leader elector

use crate::identifiers::NodeId;
use serde::{Deserialize, Serialize};

/// Current holder of a topic's leadership
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leader {
    /// Elected node
    pub node: NodeId,
    /// Election term; grows by one every time the topic gets a new leader
    pub term: u64,
}

/// Leader and candidate queue of one topic
///
/// `candidates` is in succession order: when the leader leaves, the first remaining
/// candidate takes over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leadership {
    /// Contested topic
    pub topic: String,
    /// Current leader, if any candidate is registered
    pub leader: Option<Leader>,
    /// Registered candidates, leader included
    pub candidates: Vec<NodeId>,
}

impl Leadership {
    /// Topic nobody runs for
    pub fn vacant(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            leader: None,
            candidates: Vec::new(),
        }
    }

    /// Node holding the leadership
    pub fn leader_node(&self) -> Option<&NodeId> {
        self.leader.as_ref().map(|leader| &leader.node)
    }

    /// Whether `node` is the leader
    pub fn is_leader(&self, node: &NodeId) -> bool {
        self.leader_node() == Some(node)
    }
}
