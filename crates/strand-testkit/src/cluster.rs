//! Multi-node in-memory cluster for gossip map tests

use std::sync::Arc;
use strand_anti_entropy::{EventuallyConsistentMap, EventuallyConsistentMapBuilder};
use strand_core::effects::MapStorageEffects;
use strand_core::{GossipConfig, NodeId, StoreKey, StoreValue};
use strand_effects::{LogicalClock, MemoryClusterMembership, MemoryClusterNetwork, SimulatedClock};

/// Nodes `node-0..node-N` sharing one in-memory network, one membership table, one
/// simulated wall clock and one logical timestamp source
///
/// The shared logical clock makes every write timestamp unique and ordered by the
/// order writes were issued in the test.
pub struct TestCluster {
    nodes: Vec<NodeId>,
    network: MemoryClusterNetwork,
    membership: MemoryClusterMembership,
    clock: SimulatedClock,
    timestamps: LogicalClock,
}

impl TestCluster {
    /// Cluster of `size` nodes, all up and connected
    pub fn new(size: usize) -> Self {
        let nodes: Vec<NodeId> = (0..size).map(|i| NodeId::new(format!("node-{i}"))).collect();
        Self {
            membership: MemoryClusterMembership::new(nodes.iter().cloned()),
            nodes,
            network: MemoryClusterNetwork::new(),
            clock: SimulatedClock::new(1_000),
            timestamps: LogicalClock::new(),
        }
    }

    /// Identity of node `index`
    pub fn node(&self, index: usize) -> NodeId {
        self.nodes[index].clone()
    }

    /// Every node, in index order
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Shared network, for isolating and healing nodes
    pub fn network(&self) -> &MemoryClusterNetwork {
        &self.network
    }

    /// Shared membership table
    pub fn membership(&self) -> &MemoryClusterMembership {
        &self.membership
    }

    /// Shared simulated wall clock
    pub fn clock(&self) -> &SimulatedClock {
        &self.clock
    }

    /// Shared logical write timestamps
    pub fn timestamps(&self) -> &LogicalClock {
        &self.timestamps
    }

    /// Gossip settings for deterministic tests: no background task and no load
    /// shedding, so every round is driven explicitly
    pub fn gossip_config() -> GossipConfig {
        GossipConfig {
            background_tasks: false,
            high_load_threshold: u64::MAX,
            ..GossipConfig::default()
        }
    }

    /// Replica of map `name` on node `index` with [`Self::gossip_config`]
    pub async fn gossip_map<K: StoreKey, V: StoreValue>(
        &self,
        index: usize,
        name: &str,
    ) -> EventuallyConsistentMap<K, V> {
        self.gossip_map_with(index, name, Self::gossip_config()).await
    }

    /// Replica of map `name` on node `index` with `config`
    pub async fn gossip_map_with<K: StoreKey, V: StoreValue>(
        &self,
        index: usize,
        name: &str,
        config: GossipConfig,
    ) -> EventuallyConsistentMap<K, V> {
        self.builder(index, name)
            .with_config(config)
            .build()
            .await
            .expect("gossip map should build")
    }

    /// Replica of map `name` on node `index` whose entries live in `storage`
    pub async fn persistent_gossip_map<K: StoreKey, V: StoreValue>(
        &self,
        index: usize,
        name: &str,
        storage: Arc<dyn MapStorageEffects>,
    ) -> EventuallyConsistentMap<K, V> {
        self.builder(index, name)
            .with_config(Self::gossip_config())
            .with_persistence(storage)
            .build()
            .await
            .expect("persistent gossip map should build")
    }

    fn builder<K: StoreKey, V: StoreValue>(
        &self,
        index: usize,
        name: &str,
    ) -> EventuallyConsistentMapBuilder<K, V> {
        let node = self.node(index);
        EventuallyConsistentMap::builder(name)
            .with_network(Arc::new(self.network.endpoint(node.clone())))
            .with_membership(Arc::new(self.membership.view(node)))
            .with_clock(Arc::new(self.clock.clone()))
            .with_timestamp_provider(self.timestamps.clone())
    }

    /// Flush every replica's pending pushes until no more are produced
    ///
    /// Applying a pushed batch can queue responses on the receiver, so a few passes
    /// are made.
    pub async fn settle<K: StoreKey, V: StoreValue>(maps: &[&EventuallyConsistentMap<K, V>]) {
        for _ in 0..3 {
            for map in maps {
                map.flush().await;
            }
        }
    }

    /// Run anti-entropy from every replica to every other replica, then settle
    pub async fn full_anti_entropy<K: StoreKey, V: StoreValue>(
        maps: &[&EventuallyConsistentMap<K, V>],
    ) {
        for from in maps {
            for to in maps {
                if from.local_node() != to.local_node() {
                    from.anti_entropy_with(to.local_node()).await;
                }
            }
        }
        Self::settle(maps).await;
    }
}
