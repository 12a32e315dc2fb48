//! Anti-entropy rounds, update processing and tombstone purge

use crate::events::MapEvent;
use crate::map::{EventuallyConsistentMap, MapInner};
use crate::wire::{AntiEntropyAdvertisement, AntiEntropyResponse, UpdateEntry, UpdateRequest};
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use strand_core::serialization::{decode, encode};
use strand_core::{MapValue, NodeId, StoreKey, StoreValue, StrandError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Result of one anti-entropy exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AntiEntropyOutcome {
    /// The map was destroyed or under high load
    Skipped,
    /// No active peer was available
    NoPeers,
    /// The peer answered the advertisement
    Completed {
        /// Advertised peer
        peer: NodeId,
        /// Its answer
        response: AntiEntropyResponse,
    },
    /// The advertisement could not be delivered or answered in time
    Failed {
        /// Advertised peer
        peer: NodeId,
    },
}

impl<K: StoreKey, V: StoreValue> MapInner<K, V> {
    pub(crate) async fn run_anti_entropy_round(&self) -> AntiEntropyOutcome {
        if self.is_destroyed() || self.is_under_high_load() {
            trace!(map = %self.name, "Skipping anti-entropy round");
            return AntiEntropyOutcome::Skipped;
        }
        let peers = self.membership.active_peers();
        let Some(peer) = peers.choose(&mut rand::thread_rng()).cloned() else {
            return AntiEntropyOutcome::NoPeers;
        };
        self.send_advertisement(&peer).await
    }

    pub(crate) async fn send_advertisement(&self, peer: &NodeId) -> AntiEntropyOutcome {
        if self.is_destroyed() {
            return AntiEntropyOutcome::Skipped;
        }
        let advertisement_time = self.now();
        let advertisement = self.create_advertisement();
        let payload = match encode(&advertisement) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(map = %self.name, error = %err, "Failed to encode advertisement");
                return AntiEntropyOutcome::Failed { peer: peer.clone() };
            }
        };

        let reply = self
            .network
            .send_and_receive(
                &self.subjects.anti_entropy,
                payload,
                peer,
                self.config.anti_entropy_timeout(),
            )
            .await
            .map_err(StrandError::from)
            .and_then(|bytes| decode::<AntiEntropyResponse>(&bytes));

        match reply {
            Ok(response) => {
                if response == AntiEntropyResponse::Processed {
                    self.anti_entropy_times
                        .lock()
                        .insert(peer.clone(), advertisement_time);
                }
                trace!(map = %self.name, peer = %peer, ?response, "Anti-entropy round completed");
                AntiEntropyOutcome::Completed {
                    peer: peer.clone(),
                    response,
                }
            }
            Err(err) => {
                debug!(map = %self.name, peer = %peer, error = %err, "Anti-entropy advertisement failed");
                AntiEntropyOutcome::Failed { peer: peer.clone() }
            }
        }
    }

    fn create_advertisement(&self) -> AntiEntropyAdvertisement<K> {
        let digest = self
            .items
            .read()
            .iter()
            .map(|(key, value)| (key.clone(), value.digest()))
            .collect();
        AntiEntropyAdvertisement {
            sender: self.local_node.clone(),
            digest,
        }
    }

    pub(crate) async fn handle_advertisement(
        &self,
        advertisement: AntiEntropyAdvertisement<K>,
    ) -> AntiEntropyResponse {
        if self.is_destroyed() || self.is_under_high_load() {
            return AntiEntropyResponse::Ignored;
        }
        let sender = advertisement.sender.clone();
        let (events, requested) = self.reconcile(advertisement);

        for event in events {
            if let Err(err) = self.listeners.notify(&event) {
                debug!(map = %self.name, peer = %sender, error = %err, "Listeners failed on repaired entry");
            }
        }

        if !requested.is_empty() {
            trace!(map = %self.name, peer = %sender, keys = requested.len(), "Requesting updates");
            let request = UpdateRequest {
                sender: self.local_node.clone(),
                keys: requested,
            };
            let payload = match encode(&request) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(map = %self.name, error = %err, "Failed to encode update request");
                    return AntiEntropyResponse::Failed;
                }
            };
            if let Err(err) = self
                .network
                .unicast(&self.subjects.update_request, payload, &sender)
                .await
            {
                debug!(map = %self.name, peer = %sender, error = %err, "Failed to send update request");
            }
        }
        AntiEntropyResponse::Processed
    }

    /// Compare the local state against a remote digest
    ///
    /// Entries the sender lacks or holds older are pushed back to it. Newer remote
    /// tombstones are applied immediately; newer remote values and keys missing locally
    /// are returned for an update request.
    fn reconcile(
        &self,
        advertisement: AntiEntropyAdvertisement<K>,
    ) -> (Vec<MapEvent<K, V>>, HashSet<K>) {
        let AntiEntropyAdvertisement { sender, mut digest } = advertisement;
        let snapshot: Vec<(K, MapValue<V>)> = self
            .items
            .read()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let mut events = Vec::new();
        let mut requested = HashSet::new();
        let mut pushes = Vec::new();

        for (key, local) in snapshot {
            let Some(remote) = digest.remove(&key) else {
                pushes.push(UpdateEntry::new(key, Some(local)));
                continue;
            };
            if local.is_newer_than_digest(&remote) {
                pushes.push(UpdateEntry::new(key, Some(local)));
            } else if remote.is_newer_than(&local.digest()) {
                if remote.tombstone {
                    let tombstone = (!self.config.tombstones_disabled)
                        .then(|| MapValue::tombstone(remote.timestamp, self.now()));
                    if let Some(value) = self
                        .remove_internal(&key, None, tombstone)
                        .and_then(MapValue::into_value)
                    {
                        events.push(MapEvent::remove(self.name.clone(), key, value));
                    }
                } else {
                    requested.insert(key);
                }
            }
        }
        requested.extend(digest.into_keys());

        let peers = [sender];
        for entry in pushes {
            self.queue_update(entry, &peers);
        }
        (events, requested)
    }

    /// Queue the current entry of every requested key for the requester
    pub(crate) fn handle_update_request(&self, request: UpdateRequest<K>) {
        if self.is_destroyed() {
            return;
        }
        let UpdateRequest { sender, keys } = request;
        let entries: Vec<UpdateEntry<K, V>> = {
            let items = self.items.read();
            keys.into_iter()
                .filter_map(|key| match items.get(&key) {
                    Some(value) => Some(UpdateEntry::new(key, Some(value.clone()))),
                    None if self.config.tombstones_disabled => Some(UpdateEntry::new(key, None)),
                    None => None,
                })
                .collect()
        };

        let peers = [sender];
        for entry in entries {
            self.queue_update(entry, &peers);
        }
    }

    /// Apply a batch received from a peer
    pub(crate) fn process_updates(&self, updates: Vec<UpdateEntry<K, V>>) {
        if self.is_destroyed() {
            return;
        }
        for UpdateEntry { key, value } in updates {
            let value = value.map(|value| value.with_creation_time(self.now()));
            match value {
                Some(value) if value.is_alive() => {
                    if self.put_internal(key.clone(), value.clone()) {
                        if let Some(value) = value.into_value() {
                            let event = MapEvent::put(self.name.clone(), key, value);
                            if let Err(err) = self.listeners.notify(&event) {
                                debug!(map = %self.name, error = %err, "Listeners failed on replicated put");
                            }
                        }
                    }
                }
                removal => {
                    let tombstone = removal.filter(|_| !self.config.tombstones_disabled);
                    if let Some(value) = self
                        .remove_internal(&key, None, tombstone)
                        .and_then(MapValue::into_value)
                    {
                        let event = MapEvent::remove(self.name.clone(), key, value);
                        if let Err(err) = self.listeners.notify(&event) {
                            debug!(map = %self.name, error = %err, "Listeners failed on replicated removal");
                        }
                    }
                }
            }
        }
    }

    /// Drop tombstones every peer has been advertised
    ///
    /// The watermark is the oldest last-processed advertisement time across all other
    /// cluster nodes; a peer that never processed one pins it at zero.
    pub(crate) fn purge_tombstones(&self) -> usize {
        if self.config.tombstones_disabled || self.is_destroyed() {
            return 0;
        }
        let watermark = {
            let times = self.anti_entropy_times.lock();
            self.membership
                .peers()
                .iter()
                .map(|peer| times.get(peer).copied().unwrap_or(0))
                .min()
                .unwrap_or(0)
        };
        if self.previous_purge_watermark.swap(watermark, Ordering::SeqCst) == watermark {
            return 0;
        }

        let mut items = self.items.write();
        let expired: Vec<K> = items
            .iter()
            .filter(|(_, value)| value.is_tombstone() && value.creation_time() <= watermark)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            items.remove(key);
            self.persist(key, None);
        }
        let purged = expired.len();
        if purged > 0 {
            debug!(map = %self.name, purged, watermark, "Purged tombstones");
        }
        purged
    }
}

/// Periodic anti-entropy and purge on the map's runtime
///
/// The task holds a weak reference and stops once the map is dropped or destroyed.
pub(crate) fn spawn_background<K: StoreKey, V: StoreValue>(
    inner: &Arc<MapInner<K, V>>,
) -> JoinHandle<()> {
    let map = Arc::downgrade(inner);
    let period = inner.config.anti_entropy_period();
    let start = Instant::now() + inner.config.initial_delay();

    inner.runtime.spawn(async move {
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(map) = map.upgrade() else {
                break;
            };
            if map.is_destroyed() {
                break;
            }
            map.run_anti_entropy_round().await;
            map.purge_tombstones();
        }
    })
}

impl<K: StoreKey, V: StoreValue> EventuallyConsistentMap<K, V> {
    /// Advertise to a random active peer, skipping the round under high load
    pub async fn run_anti_entropy_round(&self) -> AntiEntropyOutcome {
        self.inner.run_anti_entropy_round().await
    }

    /// Advertise to `peer`
    pub async fn anti_entropy_with(&self, peer: &NodeId) -> AntiEntropyOutcome {
        self.inner.send_advertisement(peer).await
    }

    /// Purge tombstones below the current watermark; returns how many were dropped
    pub fn purge_tombstones(&self) -> usize {
        self.inner.purge_tombstones()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;
    use strand_core::Timestamp;
    use strand_effects::{MemoryClusterMembership, MemoryClusterNetwork, SimulatedClock};

    async fn lone_map() -> EventuallyConsistentMap<u8, u64> {
        let network = MemoryClusterNetwork::new();
        let node = NodeId::new("solo");
        let membership = MemoryClusterMembership::new([node.clone()]);
        EventuallyConsistentMap::builder("lww")
            .with_network(Arc::new(network.endpoint(node.clone())))
            .with_membership(Arc::new(membership.view(node)))
            .with_clock(Arc::new(SimulatedClock::new(1_000)))
            .with_timestamp_provider(|_: &u8, _: Option<&u64>| Timestamp::logical(0))
            .without_background_tasks()
            .build()
            .await
            .unwrap()
    }

    fn entry(key: u8, ts: u64, tombstone: bool) -> UpdateEntry<u8, u64> {
        let value = if tombstone {
            MapValue::tombstone(Timestamp::logical(ts), 0)
        } else {
            MapValue::new(ts, Timestamp::logical(ts), 0)
        };
        UpdateEntry::new(key, Some(value))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Whatever the delivery order, the highest timestamp per key wins
        #[test]
        fn prop_update_order_does_not_matter(
            updates in prop::collection::vec((0u8..4, any::<bool>()), 1..24),
            seed in any::<u64>(),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let map = lone_map().await;
                let mut entries: Vec<_> = updates
                    .iter()
                    .enumerate()
                    .map(|(ts, (key, tombstone))| entry(*key, ts as u64 + 1, *tombstone))
                    .collect();
                entries.shuffle(&mut StdRng::seed_from_u64(seed));

                let mut expected: HashMap<u8, bool> = HashMap::new();
                for (key, tombstone) in &updates {
                    // Later positions carry higher timestamps.
                    expected.insert(*key, *tombstone);
                }

                for chunk in entries.chunks(3) {
                    map.inner.process_updates(chunk.to_vec());
                }

                for (key, tombstone) in expected {
                    let newest = updates
                        .iter()
                        .rposition(|(k, _)| *k == key)
                        .map(|position| position as u64 + 1);
                    let value = map.get(&key).unwrap();
                    if tombstone {
                        prop_assert_eq!(value, None);
                    } else {
                        prop_assert_eq!(value, newest);
                    }
                }
                Ok(())
            })?;
        }
    }

    #[tokio::test]
    async fn test_equal_timestamp_tombstone_beats_value() {
        let map = lone_map().await;
        map.inner.process_updates(vec![entry(1, 5, false)]);
        map.inner.process_updates(vec![entry(1, 5, true)]);
        assert_eq!(map.get(&1).unwrap(), None);

        map.inner.process_updates(vec![entry(1, 5, false)]);
        assert_eq!(map.get(&1).unwrap(), None);
        assert_eq!(map.tombstone_count(), 1);
    }

    #[tokio::test]
    async fn test_purge_without_peers_uses_zero_watermark() {
        let map = lone_map().await;
        map.inner.process_updates(vec![entry(1, 5, true)]);
        assert_eq!(map.purge_tombstones(), 0);
        assert_eq!(map.tombstone_count(), 1);
    }
}
