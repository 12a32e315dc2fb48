//! Leader elector pinned to the partition its name hashes to

use std::collections::BTreeMap;
use std::sync::Arc;
use strand_core::effects::LeaderElectorEffects;
use strand_core::{Leadership, NodeId, PartitionId, Result};
use tracing::debug;

/// A named elector living on exactly one partition for its whole lifetime
///
/// All topics of one elector share that partition, so leadership across them is
/// decided by a single linearizable replica.
#[derive(Clone)]
pub struct DistributedLeaderElector {
    name: String,
    partition: PartitionId,
    inner: Arc<dyn LeaderElectorEffects>,
}

impl DistributedLeaderElector {
    pub(crate) fn new(
        name: impl Into<String>,
        partition: PartitionId,
        inner: Arc<dyn LeaderElectorEffects>,
    ) -> Self {
        Self {
            name: name.into(),
            partition,
            inner,
        }
    }

    /// Elector name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Partition hosting the elector
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Run `node` for `topic`
    pub async fn run(&self, topic: &str, node: NodeId) -> Result<Leadership> {
        let leadership = self.inner.run(topic, node).await?;
        debug!(elector = %self.name, topic, leader = ?leadership.leader_node(), "Candidate registered");
        Ok(leadership)
    }

    /// Withdraw `node` from `topic`
    pub async fn withdraw(&self, topic: &str, node: &NodeId) -> Result<()> {
        self.inner.withdraw(topic, node).await
    }

    /// Make candidate `node` the leader of `topic`
    pub async fn anoint(&self, topic: &str, node: &NodeId) -> Result<bool> {
        self.inner.anoint(topic, node).await
    }

    /// Put candidate `node` first in line for `topic`
    pub async fn promote(&self, topic: &str, node: &NodeId) -> Result<bool> {
        self.inner.promote(topic, node).await
    }

    /// Withdraw `node` from every topic
    pub async fn evict(&self, node: &NodeId) -> Result<()> {
        self.inner.evict(node).await
    }

    /// Current leadership of `topic`
    pub async fn leadership(&self, topic: &str) -> Result<Leadership> {
        self.inner.leadership(topic).await
    }

    /// Leader of `topic`, if any
    pub async fn leader(&self, topic: &str) -> Result<Option<NodeId>> {
        Ok(self.leadership(topic).await?.leader.map(|leader| leader.node))
    }

    /// Every contested topic
    pub async fn leaderships(&self) -> Result<BTreeMap<String, Leadership>> {
        self.inner.leaderships().await
    }
}

impl std::fmt::Debug for DistributedLeaderElector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLeaderElector")
            .field("name", &self.name)
            .field("partition", &self.partition)
            .finish_non_exhaustive()
    }
}
