//! In-memory cluster simulation
//!
//! Two scenarios share one configuration. The gossip scenario writes keys from every
//! node of a simulated cluster, removes some of them, and drives anti-entropy rounds
//! until every replica holds the same entries. The transaction scenario opens
//! accounts spread over the partitions and moves balances between them in
//! cross-partition transactions, checking that the total never changes.

use anyhow::{bail, Result};
use clap::Args;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use strand_anti_entropy::EventuallyConsistentMap;
use strand_core::{NodeId, PartitionId, StrandConfig};
use strand_effects::{
    MemoryClusterMembership, MemoryClusterNetwork, MemoryPartition, SystemClock,
    WallClockTimestamps,
};
use strand_partition::FederatedPrimitiveCreator;
use strand_transaction::{CommitStatus, TransactionManager};
use tracing::info;

const GOSSIP_MAP: &str = "simulation";
const ACCOUNTS: &str = "accounts";
const OPENING_BALANCE: i64 = 100;

/// Simulation parameters
#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Number of cluster nodes
    #[arg(short, long, default_value = "3")]
    pub nodes: usize,

    /// Number of partitions; defaults to `partitions.count` from the configuration
    #[arg(short, long)]
    pub partitions: Option<u32>,

    /// Keys written during the gossip scenario
    #[arg(short, long, default_value = "32")]
    pub keys: usize,

    /// Upper bound on anti-entropy rounds
    #[arg(long, default_value = "10")]
    pub max_rounds: usize,

    /// Transfers run during the transaction scenario
    #[arg(long, default_value = "5")]
    pub transfers: usize,
}

/// Outcome of [`run`]
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub nodes: usize,
    pub partitions: u32,
    pub gossip: GossipSummary,
    pub transactions: TransactionSummary,
}

#[derive(Debug, Serialize)]
pub struct GossipSummary {
    pub keys_written: usize,
    pub keys_removed: usize,
    /// Anti-entropy rounds run before the replicas agreed
    pub rounds: usize,
    pub converged: bool,
    /// Live entries per node
    pub entries: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize)]
pub struct TransactionSummary {
    pub accounts: usize,
    pub committed: usize,
    pub failed: usize,
    pub total_balance: i64,
    pub expected_balance: i64,
    /// Value of the commit counter after the scenario
    pub commit_counter: i64,
}

/// Run both scenarios
pub async fn run(config: &StrandConfig, args: &SimulateArgs) -> Result<SimulationReport> {
    if args.nodes == 0 {
        bail!("a simulation needs at least one node");
    }
    let partitions = args.partitions.unwrap_or(config.partitions.count);
    if partitions == 0 {
        bail!("a simulation needs at least one partition");
    }

    let gossip = run_gossip(config, args).await?;
    let transactions = run_transactions(config, partitions, args.transfers).await?;

    Ok(SimulationReport {
        nodes: args.nodes,
        partitions,
        gossip,
        transactions,
    })
}

async fn run_gossip(config: &StrandConfig, args: &SimulateArgs) -> Result<GossipSummary> {
    let network = MemoryClusterNetwork::new();
    let nodes: Vec<NodeId> = (0..args.nodes).map(|i| NodeId::new(format!("node-{i}"))).collect();
    let membership = MemoryClusterMembership::new(nodes.iter().cloned());
    let clock = Arc::new(SystemClock::new());

    let mut maps: Vec<EventuallyConsistentMap<String, u64>> = Vec::with_capacity(nodes.len());
    for node in &nodes {
        let map = EventuallyConsistentMap::builder(GOSSIP_MAP)
            .with_config(config.gossip.clone())
            .with_network(Arc::new(network.endpoint(node.clone())))
            .with_membership(Arc::new(membership.view(node.clone())))
            .with_clock(clock.clone())
            .with_timestamp_provider(WallClockTimestamps::new(clock.clone()))
            .build()
            .await?;
        maps.push(map);
    }

    // Each key has a single writer so wall-clock ties between nodes cannot occur.
    let mut keys_removed = 0;
    for i in 0..args.keys {
        let writer = &maps[i % maps.len()];
        let key = format!("key-{i}");
        writer.put(key.clone(), i as u64)?;
        if i % 4 == 3 {
            writer.remove(&key)?;
            keys_removed += 1;
        }
    }
    flush_all(&maps).await;

    let mut rounds = 0;
    let mut converged = replicas_agree(&maps)?;
    while !converged && rounds < args.max_rounds {
        rounds += 1;
        for map in &maps {
            for peer in &nodes {
                if peer != map.local_node() {
                    map.anti_entropy_with(peer).await;
                }
            }
        }
        flush_all(&maps).await;
        converged = replicas_agree(&maps)?;
    }

    let mut entries = BTreeMap::new();
    for map in &maps {
        entries.insert(map.local_node().to_string(), map.size()?);
    }
    info!(rounds, converged, "Gossip scenario finished");

    for map in &maps {
        map.destroy();
    }

    Ok(GossipSummary {
        keys_written: args.keys,
        keys_removed,
        rounds,
        converged,
        entries,
    })
}

async fn flush_all(maps: &[EventuallyConsistentMap<String, u64>]) {
    futures::future::join_all(maps.iter().map(EventuallyConsistentMap::flush)).await;
}

fn replicas_agree(maps: &[EventuallyConsistentMap<String, u64>]) -> Result<bool> {
    let mut snapshots = Vec::with_capacity(maps.len());
    for map in maps {
        let snapshot: BTreeMap<String, u64> = map.entry_set()?.into_iter().collect();
        snapshots.push(snapshot);
    }
    Ok(snapshots.windows(2).all(|pair| pair[0] == pair[1]))
}

async fn run_transactions(
    config: &StrandConfig,
    partitions: u32,
    transfers: usize,
) -> Result<TransactionSummary> {
    let creator = Arc::new(FederatedPrimitiveCreator::new(
        (1..=partitions).map(|id| Arc::new(MemoryPartition::new(PartitionId(id)))),
    )?);
    let manager = TransactionManager::new(creator.clone(), config.transactions.clone())?;
    let counter = creator.atomic_counter("commits")?;

    // One account per partition, so every transfer crosses partitions when it can.
    let accounts = account_names(&creator, partitions);
    if accounts.is_empty() {
        bail!("no account name hashed to any partition");
    }
    let opening = manager.new_context();
    let map = opening.transactional_map::<String, i64>(ACCOUNTS).await?;
    for account in &accounts {
        map.put(account.clone(), OPENING_BALANCE).await?;
    }
    if opening.commit().await? != CommitStatus::Success {
        bail!("opening the accounts failed");
    }
    counter.increment_and_get().await?;

    let mut committed = 0;
    let mut failed = 0;
    for i in 0..transfers {
        let from = &accounts[i % accounts.len()];
        let to = &accounts[(i + 1) % accounts.len()];
        let amount = (i as i64 % 10) + 1;

        let context = manager.new_context();
        let map = context.transactional_map::<String, i64>(ACCOUNTS).await?;
        let from_balance = map.get(from).await?.unwrap_or_default();
        let to_balance = map.get(to).await?.unwrap_or_default();
        if from != to {
            map.put(from.clone(), from_balance - amount).await?;
            map.put(to.clone(), to_balance + amount).await?;
        }

        match context.commit().await? {
            CommitStatus::Success => {
                committed += 1;
                counter.increment_and_get().await?;
            }
            CommitStatus::Failure => failed += 1,
        }
    }

    let balances = creator.consistent_map::<String, i64>(ACCOUNTS)?;
    let total_balance: i64 = balances
        .values()
        .await?
        .into_iter()
        .map(|versioned| versioned.into_value())
        .sum();
    let expected_balance = OPENING_BALANCE * accounts.len() as i64;
    info!(committed, failed, total_balance, "Transaction scenario finished");

    Ok(TransactionSummary {
        accounts: accounts.len(),
        committed,
        failed,
        total_balance,
        expected_balance,
        commit_counter: counter.get().await?,
    })
}

/// First `account-N` name owned by each partition
fn account_names(
    creator: &FederatedPrimitiveCreator<MemoryPartition>,
    partitions: u32,
) -> Vec<String> {
    let mut by_partition: BTreeMap<PartitionId, String> = BTreeMap::new();
    let wanted = partitions as usize;
    let mut i = 0;
    while by_partition.len() < wanted && i < wanted * 64 {
        let name = format!("account-{i}");
        if let Ok(partition) = creator.hasher().partition_for(&name) {
            by_partition.entry(partition).or_insert(name);
        }
        i += 1;
    }
    by_partition.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(nodes: usize, partitions: u32) -> SimulateArgs {
        SimulateArgs {
            nodes,
            partitions: Some(partitions),
            keys: 12,
            max_rounds: 5,
            transfers: 4,
        }
    }

    #[tokio::test]
    async fn test_simulation_converges_and_conserves_balance() {
        let report = run(&StrandConfig::default(), &args(3, 3)).await.unwrap();

        assert!(report.gossip.converged);
        assert_eq!(report.gossip.keys_removed, 3);
        assert!(report.gossip.entries.values().all(|count| *count == 9));

        let transactions = &report.transactions;
        assert_eq!(transactions.committed, 4);
        assert_eq!(transactions.failed, 0);
        assert_eq!(transactions.total_balance, transactions.expected_balance);
        assert_eq!(transactions.commit_counter, 5);
    }

    #[tokio::test]
    async fn test_single_partition_uses_one_account() {
        let report = run(&StrandConfig::default(), &args(1, 1)).await.unwrap();

        assert_eq!(report.transactions.accounts, 1);
        assert_eq!(report.transactions.total_balance, OPENING_BALANCE);
        assert!(report.gossip.converged);
    }

    #[tokio::test]
    async fn test_zero_nodes_is_rejected() {
        assert!(run(&StrandConfig::default(), &args(0, 3)).await.is_err());
    }
}
