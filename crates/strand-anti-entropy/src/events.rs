//! Map events and listener registry

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strand_core::{Result, StrandError};
use tracing::warn;

/// Kind of change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapEventType {
    /// A live value was installed
    Put,
    /// A live value was replaced by a tombstone or deleted
    Remove,
}

/// A change observed on a gossip map
#[derive(Debug, Clone, PartialEq)]
pub struct MapEvent<K, V> {
    /// Map name
    pub name: String,
    /// Kind of change
    pub event_type: MapEventType,
    /// Changed key
    pub key: K,
    /// New value for puts, removed value for removes
    pub value: V,
}

impl<K, V> MapEvent<K, V> {
    /// A put event
    pub fn put(name: impl Into<String>, key: K, value: V) -> Self {
        Self {
            name: name.into(),
            event_type: MapEventType::Put,
            key,
            value,
        }
    }

    /// A remove event
    pub fn remove(name: impl Into<String>, key: K, value: V) -> Self {
        Self {
            name: name.into(),
            event_type: MapEventType::Remove,
            key,
            value,
        }
    }
}

/// Receiver of map events
///
/// Listeners run on the thread that applied the change, outside the map's lock.
pub trait MapListener<K, V>: Send + Sync {
    /// Handle one event
    fn event(&self, event: &MapEvent<K, V>) -> Result<()>;
}

impl<K, V, F> MapListener<K, V> for F
where
    F: Fn(&MapEvent<K, V>) -> Result<()> + Send + Sync,
{
    fn event(&self, event: &MapEvent<K, V>) -> Result<()> {
        self(event)
    }
}

/// Registration token returned by `add_listener`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerHandle(u64);

/// Listeners of one map
pub(crate) struct ListenerRegistry<K, V> {
    next_id: AtomicU64,
    listeners: RwLock<BTreeMap<ListenerHandle, Arc<dyn MapListener<K, V>>>>,
}

impl<K, V> ListenerRegistry<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: RwLock::new(BTreeMap::new()),
        }
    }

    pub(crate) fn add(&self, listener: Arc<dyn MapListener<K, V>>) -> ListenerHandle {
        let handle = ListenerHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().insert(handle, listener);
        handle
    }

    pub(crate) fn remove(&self, handle: ListenerHandle) -> bool {
        self.listeners.write().remove(&handle).is_some()
    }

    pub(crate) fn clear(&self) {
        self.listeners.write().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Deliver `event` to every listener
    ///
    /// A failing or panicking listener does not stop delivery to the others. Failures
    /// are logged and reported together once every listener has run.
    pub(crate) fn notify(&self, event: &MapEvent<K, V>) -> Result<()> {
        let listeners: Vec<(ListenerHandle, Arc<dyn MapListener<K, V>>)> = self
            .listeners
            .read()
            .iter()
            .map(|(handle, listener)| (*handle, listener.clone()))
            .collect();
        deliver(&event.name, &listeners, event)
    }

    /// Deliver `event` to a single listener with the same isolation as [`Self::notify`]
    pub(crate) fn notify_one(
        handle: ListenerHandle,
        listener: &Arc<dyn MapListener<K, V>>,
        event: &MapEvent<K, V>,
    ) -> Result<()> {
        deliver(&event.name, &[(handle, listener.clone())], event)
    }
}

fn deliver<K, V>(
    map: &str,
    listeners: &[(ListenerHandle, Arc<dyn MapListener<K, V>>)],
    event: &MapEvent<K, V>,
) -> Result<()> {
    let mut failures = 0;
    let mut first_failure: Option<String> = None;

    for (handle, listener) in listeners {
        let message = match catch_unwind(AssertUnwindSafe(|| listener.event(event))) {
            Ok(Ok(())) => continue,
            Ok(Err(err)) => err.to_string(),
            Err(_) => "listener panicked".to_string(),
        };
        warn!(map, listener = handle.0, event = ?event.event_type, error = %message, "Listener failed");
        failures += 1;
        first_failure.get_or_insert(message);
    }

    match first_failure {
        None => Ok(()),
        Some(message) => Err(StrandError::listener(failures, message)),
    }
}
