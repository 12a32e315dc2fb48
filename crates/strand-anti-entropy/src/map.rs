//! Eventually consistent gossip map
//!
//! Every replica holds the full key space. Local writes are stamped by the map's
//! [`TimestampProvider`], applied locally under last-writer-wins, and pushed to the
//! peers chosen by the peer-update function through per-peer batching accumulators.
//! Removals leave tombstones so that a stale value cannot resurrect a removed key;
//! periodic anti-entropy rounds repair whatever pushes missed, and tombstones are
//! purged once every peer has been advertised a digest that includes them.

use crate::accumulator::{Accumulator, AccumulatorConfig};
use crate::events::{ListenerHandle, ListenerRegistry, MapEvent, MapListener};
use crate::handlers::MapMessageHandler;
use crate::load::SlidingWindowCounter;
use crate::persistence::PersistentItems;
use crate::push::PeerUpdateSender;
use crate::wire::{MapSubjects, UpdateEntry};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use strand_core::effects::{
    ClusterCommunicationEffects, ClusterMembershipEffects, MapStorageEffects, PhysicalTimeEffects,
    TimestampProvider,
};
use strand_core::{GossipConfig, MapValue, NodeId, Result, StoreKey, StoreValue, StrandError};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Chooses the peers a local change is pushed to
pub type PeerUpdateFunction<K, V> = Arc<dyn Fn(&K, Option<&V>) -> Vec<NodeId> + Send + Sync>;

/// State shared by a map handle, its message handlers and its background task
pub(crate) struct MapInner<K, V> {
    pub(crate) name: String,
    pub(crate) local_node: NodeId,
    pub(crate) config: GossipConfig,
    pub(crate) subjects: MapSubjects,
    pub(crate) items: RwLock<HashMap<K, MapValue<V>>>,
    /// Write-through copy of `items`, when the map is persistent
    persistence: Option<PersistentItems>,
    pub(crate) listeners: ListenerRegistry<K, V>,
    senders: Mutex<HashMap<NodeId, Arc<Accumulator<UpdateEntry<K, V>>>>>,
    /// Local time of the last advertisement each peer processed
    pub(crate) anti_entropy_times: Mutex<HashMap<NodeId, u64>>,
    pub(crate) previous_purge_watermark: AtomicU64,
    pub(crate) load: SlidingWindowCounter,
    destroyed: AtomicBool,
    pub(crate) timestamps: Arc<dyn TimestampProvider<K, V>>,
    peer_update: PeerUpdateFunction<K, V>,
    pub(crate) network: Arc<dyn ClusterCommunicationEffects>,
    pub(crate) membership: Arc<dyn ClusterMembershipEffects>,
    clock: Arc<dyn PhysicalTimeEffects>,
    pub(crate) runtime: Handle,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl<K: StoreKey, V: StoreValue> MapInner<K, V> {
    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub(crate) fn check_destroyed(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(StrandError::destroyed(self.name.clone()));
        }
        Ok(())
    }

    pub(crate) fn now(&self) -> u64 {
        self.clock.physical_time_ms()
    }

    pub(crate) fn is_under_high_load(&self) -> bool {
        self.load.get(self.config.high_load_window) > self.config.high_load_threshold
    }

    /// Install `value` if it is newer than what the map holds
    pub(crate) fn put_internal(&self, key: K, value: MapValue<V>) -> bool {
        let mut items = self.items.write();
        self.load.increment();
        let updated = match items.get(&key) {
            Some(existing) => value.is_newer_than(existing),
            None => true,
        };
        if updated {
            self.persist(&key, Some(&value));
            items.insert(key, value);
        }
        updated
    }

    /// Mirror a change of the entry for `key` into local storage
    pub(crate) fn persist(&self, key: &K, value: Option<&MapValue<V>>) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        match value {
            Some(value) => persistence.write(key, value),
            None => persistence.erase(key),
        }
    }

    /// Replace the entry for `key` with `tombstone`, or delete it when `tombstone` is `None`
    ///
    /// With a tombstone the removal only applies when the tombstone is newer than the
    /// current entry. `expected` further restricts it to an entry holding that exact
    /// live value. Returns the replaced entry.
    pub(crate) fn remove_internal(
        &self,
        key: &K,
        expected: Option<&V>,
        tombstone: Option<MapValue<V>>,
    ) -> Option<MapValue<V>> {
        let mut items = self.items.write();
        self.load.increment();
        let existing = items.get(key);

        if let Some(expected) = expected {
            if existing.and_then(MapValue::get) != Some(expected) {
                return None;
            }
        }

        match tombstone {
            Some(tombstone) => {
                let updated = existing.map_or(true, |current| tombstone.is_newer_than(current));
                if !updated {
                    return None;
                }
                self.persist(key, Some(&tombstone));
                items.insert(key.clone(), tombstone)
            }
            None => {
                let removed = items.remove(key);
                if removed.is_some() {
                    self.persist(key, None);
                }
                removed
            }
        }
    }

    /// Remove `key` locally, replicate the removal and notify listeners
    ///
    /// Returns the removed live value.
    pub(crate) fn remove_and_notify(&self, key: &K, expected: Option<&V>) -> Result<Option<V>> {
        let tombstone = if self.config.tombstones_disabled {
            None
        } else {
            let timestamp = self.timestamps.timestamp(key, None);
            Some(MapValue::tombstone(timestamp, self.now()))
        };

        let Some(previous) = self.remove_internal(key, expected, tombstone.clone()) else {
            return Ok(None);
        };
        self.notify_peers(key, tombstone);

        match previous.into_value() {
            Some(value) => {
                self.listeners
                    .notify(&MapEvent::remove(self.name.clone(), key.clone(), value.clone()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Push a local change to the peers selected by the peer-update function
    pub(crate) fn notify_peers(&self, key: &K, value: Option<MapValue<V>>) {
        let peers = (self.peer_update)(key, value.as_ref().and_then(MapValue::get));
        self.queue_update(UpdateEntry::new(key.clone(), value), &peers);
    }

    /// Queue `entry` on the accumulator of each peer
    pub(crate) fn queue_update(&self, entry: UpdateEntry<K, V>, peers: &[NodeId]) {
        if peers.is_empty() || self.is_destroyed() {
            return;
        }
        let mut senders = self.senders.lock();
        for peer in peers.iter().filter(|peer| **peer != self.local_node) {
            let sender = senders
                .entry(peer.clone())
                .or_insert_with(|| Arc::new(self.new_sender(peer.clone())));
            if !sender.add(entry.clone()) {
                debug!(map = %self.name, peer = %peer, "Update accumulator stopped; dropping update");
            }
        }
    }

    fn new_sender(&self, peer: NodeId) -> Accumulator<UpdateEntry<K, V>> {
        let processor = Arc::new(PeerUpdateSender {
            map: self.name.clone(),
            peer,
            subject: self.subjects.update.clone(),
            network: self.network.clone(),
            _types: PhantomData,
        });
        let config = AccumulatorConfig {
            max_items: self.config.max_events,
            max_batch: self.config.max_batch(),
            max_idle: self.config.max_idle(),
        };
        Accumulator::spawn(&self.runtime, config, processor)
    }

    pub(crate) async fn flush(&self) {
        let senders: Vec<_> = self.senders.lock().values().cloned().collect();
        futures::future::join_all(senders.iter().map(|sender| sender.flush())).await;
    }

    fn register_handlers(self: &Arc<Self>) {
        for (subject, handler) in MapMessageHandler::for_map(self) {
            self.network.add_subscriber(subject, handler);
        }
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        for subject in self.subjects.all() {
            self.network.remove_subscriber(subject);
        }
        if let Some(task) = self.background.lock().take() {
            task.abort();
        }
        for (_, sender) in self.senders.lock().drain() {
            sender.abort();
        }
        self.listeners.clear();
        info!(map = %self.name, node = %self.local_node, "Gossip map destroyed");
    }
}

/// Builder for [`EventuallyConsistentMap`]
pub struct EventuallyConsistentMapBuilder<K, V> {
    name: String,
    config: GossipConfig,
    network: Option<Arc<dyn ClusterCommunicationEffects>>,
    membership: Option<Arc<dyn ClusterMembershipEffects>>,
    clock: Option<Arc<dyn PhysicalTimeEffects>>,
    timestamps: Option<Arc<dyn TimestampProvider<K, V>>>,
    peer_update: Option<PeerUpdateFunction<K, V>>,
    storage: Option<Arc<dyn MapStorageEffects>>,
}

impl<K: StoreKey, V: StoreValue> EventuallyConsistentMapBuilder<K, V> {
    /// Use `config` instead of the defaults
    pub fn with_config(mut self, config: GossipConfig) -> Self {
        self.config = config;
        self
    }

    /// Cluster transport
    pub fn with_network(mut self, network: Arc<dyn ClusterCommunicationEffects>) -> Self {
        self.network = Some(network);
        self
    }

    /// Cluster membership view
    pub fn with_membership(mut self, membership: Arc<dyn ClusterMembershipEffects>) -> Self {
        self.membership = Some(membership);
        self
    }

    /// Local wall clock used for creation times and the purge watermark
    pub fn with_clock(mut self, clock: Arc<dyn PhysicalTimeEffects>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Source of write timestamps
    pub fn with_timestamp_provider(mut self, provider: impl TimestampProvider<K, V> + 'static) -> Self {
        self.timestamps = Some(Arc::new(provider));
        self
    }

    /// Choose the peers each local change is pushed to; defaults to every other node
    pub fn with_peer_update_function<F>(mut self, peer_update: F) -> Self
    where
        F: Fn(&K, Option<&V>) -> Vec<NodeId> + Send + Sync + 'static,
    {
        self.peer_update = Some(Arc::new(peer_update));
        self
    }

    /// Delete removed keys outright instead of keeping tombstones
    pub fn with_tombstones_disabled(mut self) -> Self {
        self.config.tombstones_disabled = true;
        self
    }

    /// Persist the entry table in `storage` and restore it from there on build
    ///
    /// Tombstones are persisted too, so a restored replica does not resurrect keys that
    /// were removed before it went down.
    pub fn with_persistence(mut self, storage: Arc<dyn MapStorageEffects>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Skip the periodic anti-entropy task; rounds can still be driven by hand
    pub fn without_background_tasks(mut self) -> Self {
        self.config.background_tasks = false;
        self
    }

    /// Register the map on the network, start its background task and bootstrap from
    /// an active peer
    ///
    /// Must be called inside a Tokio runtime. A persistent map first restores its
    /// stored entries and fails to build when the storage cannot be read. A failed
    /// bootstrap is logged and the map starts with whatever it restored.
    pub async fn build(self) -> Result<EventuallyConsistentMap<K, V>> {
        let network = self
            .network
            .ok_or_else(|| StrandError::invalid("gossip map requires a network"))?;
        let membership = self
            .membership
            .ok_or_else(|| StrandError::invalid("gossip map requires a membership view"))?;
        let clock = self
            .clock
            .ok_or_else(|| StrandError::invalid("gossip map requires a clock"))?;
        let timestamps = self
            .timestamps
            .ok_or_else(|| StrandError::invalid("gossip map requires a timestamp provider"))?;
        self.config.validate()?;
        if self.name.is_empty() {
            return Err(StrandError::invalid("gossip map name must not be empty"));
        }
        let runtime = Handle::try_current()
            .map_err(|_| StrandError::internal("gossip map must be built inside a Tokio runtime"))?;

        let peer_update = self.peer_update.unwrap_or_else(|| {
            let membership = membership.clone();
            Arc::new(move |_: &K, _: Option<&V>| membership.peers())
        });

        let persistence = self
            .storage
            .map(|storage| PersistentItems::new(self.name.clone(), storage));
        let items = match &persistence {
            Some(persistence) => persistence.restore()?,
            None => HashMap::new(),
        };

        let inner = Arc::new(MapInner {
            local_node: membership.local_node(),
            subjects: MapSubjects::for_map(&self.name),
            items: RwLock::new(items),
            persistence,
            listeners: ListenerRegistry::new(),
            senders: Mutex::new(HashMap::new()),
            anti_entropy_times: Mutex::new(HashMap::new()),
            previous_purge_watermark: AtomicU64::new(0),
            load: SlidingWindowCounter::new(self.config.load_window_slots),
            destroyed: AtomicBool::new(false),
            timestamps,
            peer_update,
            network,
            membership,
            clock,
            runtime,
            background: Mutex::new(None),
            name: self.name,
            config: self.config,
        });

        inner.register_handlers();
        if inner.config.background_tasks {
            let task = crate::anti_entropy::spawn_background(&inner);
            *inner.background.lock() = Some(task);
        }
        inner.bootstrap().await;

        info!(map = %inner.name, node = %inner.local_node, "Gossip map started");
        Ok(EventuallyConsistentMap { inner })
    }
}

/// Replicated map with last-writer-wins conflict resolution and anti-entropy repair
///
/// Cloning yields another handle to the same replica. Every operation fails with
/// [`StrandError::Destroyed`] once [`Self::destroy`] has been called.
pub struct EventuallyConsistentMap<K, V> {
    pub(crate) inner: Arc<MapInner<K, V>>,
}

impl<K, V> Clone for EventuallyConsistentMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K: StoreKey, V: StoreValue> EventuallyConsistentMap<K, V> {
    /// Start building a replica of map `name`
    pub fn builder(name: impl Into<String>) -> EventuallyConsistentMapBuilder<K, V> {
        EventuallyConsistentMapBuilder {
            name: name.into(),
            config: GossipConfig::default(),
            network: None,
            membership: None,
            clock: None,
            timestamps: None,
            peer_update: None,
            storage: None,
        }
    }

    /// Map name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Node hosting this replica
    pub fn local_node(&self) -> &NodeId {
        &self.inner.local_node
    }

    /// Number of live entries
    pub fn size(&self) -> Result<usize> {
        self.inner.check_destroyed()?;
        Ok(self.inner.items.read().values().filter(|v| v.is_alive()).count())
    }

    /// Whether no live entry exists
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.size()? == 0)
    }

    /// Whether `key` maps to a live value
    pub fn contains_key(&self, key: &K) -> Result<bool> {
        self.inner.check_destroyed()?;
        Ok(self.inner.items.read().get(key).is_some_and(MapValue::is_alive))
    }

    /// Whether any live entry holds `value`
    pub fn contains_value(&self, value: &V) -> Result<bool> {
        self.inner.check_destroyed()?;
        Ok(self
            .inner
            .items
            .read()
            .values()
            .any(|entry| entry.get() == Some(value)))
    }

    /// Live value for `key`
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        self.inner.check_destroyed()?;
        Ok(self.inner.items.read().get(key).and_then(|v| v.get().cloned()))
    }

    /// Write `value` under a fresh timestamp
    ///
    /// The write is applied locally, pushed to peers and announced to listeners. A
    /// listener failure is reported after the write has been applied.
    pub fn put(&self, key: K, value: V) -> Result<()> {
        self.inner.check_destroyed()?;
        let timestamp = self.inner.timestamps.timestamp(&key, Some(&value));
        let new_value = MapValue::new(value, timestamp, self.inner.now());

        if self.inner.put_internal(key.clone(), new_value.clone()) {
            self.inner.notify_peers(&key, Some(new_value.clone()));
            if let Some(value) = new_value.into_value() {
                self.inner
                    .listeners
                    .notify(&MapEvent::put(self.inner.name.clone(), key, value))?;
            }
        }
        Ok(())
    }

    /// Write every pair; the first listener failure is reported once all are applied
    pub fn put_all(&self, entries: impl IntoIterator<Item = (K, V)>) -> Result<()> {
        self.inner.check_destroyed()?;
        let mut first_error = None;
        for (key, value) in entries {
            if let Err(err) = self.put(key, value) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Remove `key`, returning the removed live value
    pub fn remove(&self, key: &K) -> Result<Option<V>> {
        self.inner.check_destroyed()?;
        self.inner.remove_and_notify(key, None)
    }

    /// Remove `key` only while it holds `value`
    pub fn remove_value(&self, key: &K, value: &V) -> Result<bool> {
        self.inner.check_destroyed()?;
        Ok(self.inner.remove_and_notify(key, Some(value))?.is_some())
    }

    /// Atomically recompute the value of `key`
    ///
    /// `f` runs under the map's write lock and receives the current live value.
    /// Returning `None` removes the key. Returning the current value leaves the map
    /// untouched. Returns the value the map holds for `key` afterwards.
    pub fn compute<F>(&self, key: K, f: F) -> Result<Option<V>>
    where
        F: FnOnce(&K, Option<&V>) -> Option<V>,
    {
        let inner = &self.inner;
        inner.check_destroyed()?;

        let (previous, replicated) = {
            let mut items = inner.items.write();
            inner.load.increment();
            let existing = items.get(&key);
            let previous = existing.and_then(|entry| entry.get().cloned());

            let computed = f(&key, previous.as_ref());
            if computed.is_some() && computed == previous {
                return Ok(previous);
            }

            let timestamp = inner.timestamps.timestamp(&key, computed.as_ref());
            let now = inner.now();
            let candidate = match computed {
                Some(value) => Some(MapValue::new(value, timestamp, now)),
                None if inner.config.tombstones_disabled => None,
                None => Some(MapValue::tombstone(timestamp, now)),
            };

            let updated = match (existing, &candidate) {
                (None, None) => false,
                (None, Some(_)) | (Some(_), None) => true,
                (Some(current), Some(candidate)) => candidate.is_newer_than(current),
            };
            if !updated {
                return Ok(previous);
            }

            inner.persist(&key, candidate.as_ref());
            match &candidate {
                Some(value) => {
                    items.insert(key.clone(), value.clone());
                }
                None => {
                    items.remove(&key);
                }
            }
            (previous, candidate)
        };

        inner.notify_peers(&key, replicated.clone());
        let current = replicated.and_then(MapValue::into_value);
        let event = match (&current, previous) {
            (Some(value), _) => Some(MapEvent::put(inner.name.clone(), key, value.clone())),
            (None, Some(removed)) => Some(MapEvent::remove(inner.name.clone(), key, removed)),
            (None, None) => None,
        };
        if let Some(event) = event {
            inner.listeners.notify(&event)?;
        }
        Ok(current)
    }

    /// Remove every live key
    pub fn clear(&self) -> Result<()> {
        self.inner.check_destroyed()?;
        let keys: Vec<K> = self
            .inner
            .items
            .read()
            .iter()
            .filter(|(_, value)| value.is_alive())
            .map(|(key, _)| key.clone())
            .collect();

        let mut first_error = None;
        for key in keys {
            if let Err(err) = self.inner.remove_and_notify(&key, None) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Keys with live values
    pub fn key_set(&self) -> Result<HashSet<K>> {
        self.inner.check_destroyed()?;
        Ok(self
            .inner
            .items
            .read()
            .iter()
            .filter(|(_, value)| value.is_alive())
            .map(|(key, _)| key.clone())
            .collect())
    }

    /// Live values
    pub fn values(&self) -> Result<Vec<V>> {
        self.inner.check_destroyed()?;
        Ok(self
            .inner
            .items
            .read()
            .values()
            .filter_map(|value| value.get().cloned())
            .collect())
    }

    /// Live entries
    pub fn entry_set(&self) -> Result<Vec<(K, V)>> {
        self.inner.check_destroyed()?;
        Ok(self
            .inner
            .items
            .read()
            .iter()
            .filter_map(|(key, value)| value.get().map(|v| (key.clone(), v.clone())))
            .collect())
    }

    /// Register a listener and replay every live entry to it as a put event
    ///
    /// Failures during the replay are logged and do not fail the registration.
    pub fn add_listener(&self, listener: impl MapListener<K, V> + 'static) -> Result<ListenerHandle> {
        self.inner.check_destroyed()?;
        let listener: Arc<dyn MapListener<K, V>> = Arc::new(listener);
        let handle = self.inner.listeners.add(listener.clone());

        for (key, value) in self.entry_set()? {
            let event = MapEvent::put(self.inner.name.clone(), key, value);
            if let Err(err) = ListenerRegistry::notify_one(handle, &listener, &event) {
                debug!(map = %self.inner.name, error = %err, "Listener failed during replay");
            }
        }
        Ok(handle)
    }

    /// Unregister a listener; returns whether it was registered
    pub fn remove_listener(&self, handle: ListenerHandle) -> bool {
        self.inner.listeners.remove(handle)
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Release every queued push and wait until the batches have been sent
    pub async fn flush(&self) {
        self.inner.flush().await;
    }

    /// Whether recent local write activity exceeds the high-load threshold
    pub fn is_under_high_load(&self) -> bool {
        self.inner.is_under_high_load()
    }

    /// Number of tombstones currently retained
    pub fn tombstone_count(&self) -> usize {
        self.inner
            .items
            .read()
            .values()
            .filter(|value| value.is_tombstone())
            .count()
    }

    /// Local time of the last advertisement `peer` processed
    pub fn last_anti_entropy_time(&self, peer: &NodeId) -> Option<u64> {
        self.inner.anti_entropy_times.lock().get(peer).copied()
    }

    /// Stop the replica
    ///
    /// Unsubscribes from every map subject, stops the background task and the push
    /// accumulators, and drops all listeners. Idempotent.
    pub fn destroy(&self) {
        self.inner.destroy();
    }

    /// Whether [`Self::destroy`] has been called
    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }
}

impl<K, V> std::fmt::Debug for EventuallyConsistentMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventuallyConsistentMap")
            .field("name", &self.inner.name)
            .field("local_node", &self.inner.local_node)
            .finish_non_exhaustive()
    }
}
