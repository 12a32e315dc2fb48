//! Inbound message dispatch for one gossip map

use crate::map::MapInner;
use crate::wire::{AntiEntropyAdvertisement, UpdateEntry, UpdateRequest};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Weak};
use strand_core::effects::{MessageHandler, NetworkError};
use strand_core::serialization::{decode, encode};
use strand_core::{MessageSubject, NodeId, StoreKey, StoreValue};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Bootstrap,
    Initialize,
    Update,
    AntiEntropy,
    UpdateRequest,
}

/// Routes one map subject to the map's state
///
/// Holds a weak reference so that a registered handler never keeps a dropped map alive.
pub(crate) struct MapMessageHandler<K, V> {
    map: Weak<MapInner<K, V>>,
    endpoint: Endpoint,
}

impl<K: StoreKey, V: StoreValue> MapMessageHandler<K, V> {
    /// One handler per map subject
    pub(crate) fn for_map(map: &Arc<MapInner<K, V>>) -> Vec<(MessageSubject, Arc<dyn MessageHandler>)> {
        let subjects = &map.subjects;
        [
            (&subjects.bootstrap, Endpoint::Bootstrap),
            (&subjects.initialize, Endpoint::Initialize),
            (&subjects.update, Endpoint::Update),
            (&subjects.anti_entropy, Endpoint::AntiEntropy),
            (&subjects.update_request, Endpoint::UpdateRequest),
        ]
        .into_iter()
        .map(|(subject, endpoint)| {
            let handler: Arc<dyn MessageHandler> = Arc::new(Self {
                map: Arc::downgrade(map),
                endpoint,
            });
            (subject.clone(), handler)
        })
        .collect()
    }
}

#[async_trait]
impl<K: StoreKey, V: StoreValue> MessageHandler for MapMessageHandler<K, V> {
    async fn handle(&self, sender: NodeId, payload: Vec<u8>) -> Result<Vec<u8>, NetworkError> {
        let map = self.map.upgrade().ok_or_else(|| NetworkError::HandlerFailed {
            reason: "map has been dropped".to_string(),
        })?;

        match self.endpoint {
            Endpoint::Update => {
                let updates: Vec<UpdateEntry<K, V>> = read(&map.name, &sender, &payload)?;
                map.process_updates(updates);
                Ok(Vec::new())
            }
            Endpoint::Initialize => {
                let updates: Vec<UpdateEntry<K, V>> = read(&map.name, &sender, &payload)?;
                map.process_updates(updates);
                reply(&())
            }
            Endpoint::AntiEntropy => {
                let advertisement: AntiEntropyAdvertisement<K> = read(&map.name, &sender, &payload)?;
                let response = map.handle_advertisement(advertisement).await;
                reply(&response)
            }
            Endpoint::UpdateRequest => {
                let request: UpdateRequest<K> = read(&map.name, &sender, &payload)?;
                map.handle_update_request(request);
                Ok(Vec::new())
            }
            Endpoint::Bootstrap => {
                let requester: NodeId = read(&map.name, &sender, &payload)?;
                map.handle_bootstrap(&requester)
                    .await
                    .map_err(|err| NetworkError::HandlerFailed {
                        reason: err.to_string(),
                    })?;
                reply(&())
            }
        }
    }
}

fn read<T: DeserializeOwned>(map: &str, sender: &NodeId, payload: &[u8]) -> Result<T, NetworkError> {
    decode(payload).map_err(|err| {
        debug!(map, peer = %sender, error = %err, "Dropping undecodable message");
        NetworkError::DeserializationFailed {
            error: err.to_string(),
        }
    })
}

fn reply<T: Serialize>(value: &T) -> Result<Vec<u8>, NetworkError> {
    encode(value).map_err(|err| NetworkError::SerializationFailed {
        error: err.to_string(),
    })
}
