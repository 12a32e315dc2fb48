//! Push replication to one peer

use crate::accumulator::BatchProcessor;
use crate::wire::UpdateEntry;
use async_trait::async_trait;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use strand_core::effects::ClusterCommunicationEffects;
use strand_core::serialization::encode;
use strand_core::{MessageSubject, NodeId, StoreKey, StoreValue};
use tracing::{debug, trace, warn};

/// Sends accumulated update batches to a single peer
pub(crate) struct PeerUpdateSender<K, V> {
    pub(crate) map: String,
    pub(crate) peer: NodeId,
    pub(crate) subject: MessageSubject,
    pub(crate) network: Arc<dyn ClusterCommunicationEffects>,
    pub(crate) _types: PhantomData<fn() -> (K, V)>,
}

/// Keep only the newest entry per key
pub(crate) fn dedupe<K: StoreKey, V: StoreValue>(
    items: Vec<UpdateEntry<K, V>>,
) -> Vec<UpdateEntry<K, V>> {
    let mut newest: HashMap<K, UpdateEntry<K, V>> = HashMap::with_capacity(items.len());
    for item in items {
        match newest.entry(item.key.clone()) {
            Entry::Occupied(mut existing) => {
                if item.is_newer_than(existing.get()) {
                    existing.insert(item);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(item);
            }
        }
    }
    newest.into_values().collect()
}

#[async_trait]
impl<K: StoreKey, V: StoreValue> BatchProcessor<UpdateEntry<K, V>> for PeerUpdateSender<K, V> {
    async fn process(&self, items: Vec<UpdateEntry<K, V>>) {
        let batch = dedupe(items);
        let payload = match encode(&batch) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(map = %self.map, peer = %self.peer, error = %err, "Failed to encode update batch");
                return;
            }
        };

        trace!(map = %self.map, peer = %self.peer, entries = batch.len(), "Pushing updates");
        if let Err(err) = self.network.unicast(&self.subject, payload, &self.peer).await {
            debug!(map = %self.map, peer = %self.peer, error = %err, "Failed to push updates; anti-entropy will repair");
        }
    }
}
