//! Gossip map wire format
//!
//! Every message is bincode-encoded and published on a per-map subject.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use strand_core::{Digest, MapValue, MessageSubject, NodeId};

/// One replicated key and its latest value
///
/// `value` is `None` only when the sending map runs with tombstones disabled and the
/// key was removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEntry<K, V> {
    /// Replicated key
    pub key: K,
    /// Latest value or tombstone
    pub value: Option<MapValue<V>>,
}

impl<K, V> UpdateEntry<K, V> {
    /// Build an entry
    pub fn new(key: K, value: Option<MapValue<V>>) -> Self {
        Self { key, value }
    }

    /// Whether this entry should replace `other` in an outgoing batch
    pub fn is_newer_than(&self, other: &UpdateEntry<K, V>) -> bool {
        match (&self.value, &other.value) {
            (_, None) => true,
            (Some(ours), Some(theirs)) => ours.is_newer_than(theirs),
            (None, Some(_)) => false,
        }
    }
}

/// Digest of every key a node holds, tombstones included
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(
    serialize = "K: Serialize",
    deserialize = "K: Deserialize<'de> + Eq + Hash"
))]
pub struct AntiEntropyAdvertisement<K> {
    /// Advertising node
    pub sender: NodeId,
    /// Per-key summary
    pub digest: HashMap<K, Digest>,
}

impl<K: Eq + Hash> PartialEq for AntiEntropyAdvertisement<K> {
    fn eq(&self, other: &Self) -> bool {
        self.sender == other.sender && self.digest == other.digest
    }
}

/// Outcome reported by the receiver of an advertisement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AntiEntropyResponse {
    /// The advertisement was reconciled
    Processed,
    /// The receiver was destroyed or under high load
    Ignored,
    /// The receiver failed while reconciling
    Failed,
}

/// Pull request for keys the sender found stale or missing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(
    serialize = "K: Serialize",
    deserialize = "K: Deserialize<'de> + Eq + Hash"
))]
pub struct UpdateRequest<K> {
    /// Requesting node
    pub sender: NodeId,
    /// Keys to send back
    pub keys: HashSet<K>,
}

impl<K: Eq + Hash> PartialEq for UpdateRequest<K> {
    fn eq(&self, other: &Self) -> bool {
        self.sender == other.sender && self.keys == other.keys
    }
}

/// Subjects a gossip map listens on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapSubjects {
    /// Bootstrap request from a newly created replica
    pub bootstrap: MessageSubject,
    /// Bulk seed batches answering a bootstrap
    pub initialize: MessageSubject,
    /// Pushed update batches
    pub update: MessageSubject,
    /// Anti-entropy advertisements
    pub anti_entropy: MessageSubject,
    /// Pull requests
    pub update_request: MessageSubject,
}

impl MapSubjects {
    /// Subjects of map `name`
    pub fn for_map(name: &str) -> Self {
        let subject = |suffix: &str| MessageSubject::new(format!("ecm-{name}-{suffix}"));
        Self {
            bootstrap: subject("bootstrap"),
            initialize: subject("initialize"),
            update: subject("update"),
            anti_entropy: subject("anti-entropy"),
            update_request: subject("update-request"),
        }
    }

    /// Every subject
    pub fn all(&self) -> [&MessageSubject; 5] {
        [
            &self.bootstrap,
            &self.initialize,
            &self.update,
            &self.anti_entropy,
            &self.update_request,
        ]
    }
}
