//! In-memory cluster network
//!
//! A shared [`MemoryClusterNetwork`] hub routes payloads between per-node
//! [`MemoryClusterEndpoint`]s. Delivery awaits the destination handler inline, so a
//! request/response round trip completes within the caller's task. Links and nodes can
//! be cut to simulate partitions and crashes.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strand_core::effects::{ClusterCommunicationEffects, MessageHandler, NetworkError};
use strand_core::{MessageSubject, NodeId};
use tracing::trace;

#[derive(Default)]
struct NetworkState {
    /// Handlers keyed by destination node and subject
    subscribers: RwLock<HashMap<(NodeId, MessageSubject), Arc<dyn MessageHandler>>>,
    /// Nodes that neither send nor receive
    isolated: RwLock<HashSet<NodeId>>,
    /// Directed links that drop traffic
    blocked_links: RwLock<HashSet<(NodeId, NodeId)>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Shared hub connecting every in-memory endpoint
#[derive(Clone, Default)]
pub struct MemoryClusterNetwork {
    state: Arc<NetworkState>,
}

impl MemoryClusterNetwork {
    /// Create an empty network
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport handle for `node`
    pub fn endpoint(&self, node: NodeId) -> MemoryClusterEndpoint {
        MemoryClusterEndpoint {
            local: node,
            state: self.state.clone(),
        }
    }

    /// Drop all traffic to and from `node`
    pub fn isolate(&self, node: &NodeId) {
        self.state.isolated.write().insert(node.clone());
    }

    /// Undo [`Self::isolate`]
    pub fn heal(&self, node: &NodeId) {
        self.state.isolated.write().remove(node);
    }

    /// Drop traffic from `from` to `to` (one direction)
    pub fn block_link(&self, from: &NodeId, to: &NodeId) {
        self.state
            .blocked_links
            .write()
            .insert((from.clone(), to.clone()));
    }

    /// Undo [`Self::block_link`]
    pub fn unblock_link(&self, from: &NodeId, to: &NodeId) {
        self.state
            .blocked_links
            .write()
            .remove(&(from.clone(), to.clone()));
    }

    /// Messages handed to a destination handler so far
    pub fn delivered_count(&self) -> u64 {
        self.state.delivered.load(Ordering::Relaxed)
    }

    /// Messages dropped by isolation or blocked links so far
    pub fn dropped_count(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }

    /// Whether `node` has a handler for `subject`
    pub fn has_subscriber(&self, node: &NodeId, subject: &MessageSubject) -> bool {
        self.state
            .subscribers
            .read()
            .contains_key(&(node.clone(), subject.clone()))
    }
}

/// Per-node view of a [`MemoryClusterNetwork`]
#[derive(Clone)]
pub struct MemoryClusterEndpoint {
    local: NodeId,
    state: Arc<NetworkState>,
}

impl MemoryClusterEndpoint {
    /// Node this endpoint sends from
    pub fn local_node(&self) -> &NodeId {
        &self.local
    }

    fn reachable(&self, to: &NodeId) -> bool {
        let isolated = self.state.isolated.read();
        if isolated.contains(&self.local) || isolated.contains(to) {
            return false;
        }
        !self
            .state
            .blocked_links
            .read()
            .contains(&(self.local.clone(), to.clone()))
    }

    async fn deliver(
        &self,
        subject: &MessageSubject,
        payload: Vec<u8>,
        to: &NodeId,
    ) -> Result<Vec<u8>, NetworkError> {
        if !self.reachable(to) {
            self.state.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(NetworkError::PeerUnreachable { peer: to.clone() });
        }

        let handler = self
            .state
            .subscribers
            .read()
            .get(&(to.clone(), subject.clone()))
            .cloned()
            .ok_or_else(|| NetworkError::NoHandler {
                peer: to.clone(),
                subject: subject.clone(),
            })?;

        trace!(from = %self.local, to = %to, subject = %subject, bytes = payload.len(), "Delivering message");
        self.state.delivered.fetch_add(1, Ordering::Relaxed);
        handler.handle(self.local.clone(), payload).await
    }
}

#[async_trait]
impl ClusterCommunicationEffects for MemoryClusterEndpoint {
    async fn unicast(
        &self,
        subject: &MessageSubject,
        payload: Vec<u8>,
        to: &NodeId,
    ) -> Result<(), NetworkError> {
        self.deliver(subject, payload, to).await.map(|_| ())
    }

    async fn send_and_receive(
        &self,
        subject: &MessageSubject,
        payload: Vec<u8>,
        to: &NodeId,
        timeout: Duration,
    ) -> Result<Vec<u8>, NetworkError> {
        tokio::time::timeout(timeout, self.deliver(subject, payload, to))
            .await
            .map_err(|_| NetworkError::OperationTimeout {
                operation: subject.to_string(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })?
    }

    fn add_subscriber(&self, subject: MessageSubject, handler: Arc<dyn MessageHandler>) {
        self.state
            .subscribers
            .write()
            .insert((self.local.clone(), subject), handler);
    }

    fn remove_subscriber(&self, subject: &MessageSubject) {
        self.state
            .subscribers
            .write()
            .remove(&(self.local.clone(), subject.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl MessageHandler for Echo {
        async fn handle(&self, sender: NodeId, payload: Vec<u8>) -> Result<Vec<u8>, NetworkError> {
            let mut reply = sender.as_str().as_bytes().to_vec();
            reply.extend(payload);
            Ok(reply)
        }
    }

    struct Stall;

    #[async_trait]
    impl MessageHandler for Stall {
        async fn handle(&self, _: NodeId, _: Vec<u8>) -> Result<Vec<u8>, NetworkError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    fn subject() -> MessageSubject {
        MessageSubject::new("echo")
    }

    #[tokio::test]
    async fn test_request_response() {
        let network = MemoryClusterNetwork::new();
        let a = network.endpoint(NodeId::new("a"));
        let b = network.endpoint(NodeId::new("b"));
        b.add_subscriber(subject(), Arc::new(Echo));

        let reply = a
            .send_and_receive(&subject(), b"!".to_vec(), &NodeId::new("b"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, b"a!".to_vec());
        assert_eq!(network.delivered_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_handler() {
        let network = MemoryClusterNetwork::new();
        let a = network.endpoint(NodeId::new("a"));
        let err = a
            .unicast(&subject(), Vec::new(), &NodeId::new("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::NoHandler { .. }));
    }

    #[tokio::test]
    async fn test_isolation_and_blocked_links() {
        let network = MemoryClusterNetwork::new();
        let a = network.endpoint(NodeId::new("a"));
        let b = network.endpoint(NodeId::new("b"));
        a.add_subscriber(subject(), Arc::new(Echo));
        b.add_subscriber(subject(), Arc::new(Echo));

        network.block_link(&NodeId::new("a"), &NodeId::new("b"));
        assert!(a.unicast(&subject(), Vec::new(), &NodeId::new("b")).await.is_err());
        assert!(b.unicast(&subject(), Vec::new(), &NodeId::new("a")).await.is_ok());

        network.unblock_link(&NodeId::new("a"), &NodeId::new("b"));
        network.isolate(&NodeId::new("b"));
        assert!(b.unicast(&subject(), Vec::new(), &NodeId::new("a")).await.is_err());
        network.heal(&NodeId::new("b"));
        assert!(a.unicast(&subject(), Vec::new(), &NodeId::new("b")).await.is_ok());
        assert_eq!(network.dropped_count(), 2);
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let network = MemoryClusterNetwork::new();
        let a = network.endpoint(NodeId::new("a"));
        let b = network.endpoint(NodeId::new("b"));
        b.add_subscriber(subject(), Arc::new(Stall));

        let err = a
            .send_and_receive(&subject(), Vec::new(), &NodeId::new("b"), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::OperationTimeout { timeout_ms: 20, .. }));
    }

    #[tokio::test]
    async fn test_remove_subscriber() {
        let network = MemoryClusterNetwork::new();
        let b = network.endpoint(NodeId::new("b"));
        b.add_subscriber(subject(), Arc::new(Echo));
        assert!(network.has_subscriber(&NodeId::new("b"), &subject()));
        b.remove_subscriber(&subject());
        assert!(!network.has_subscriber(&NodeId::new("b"), &subject()));
    }
}
