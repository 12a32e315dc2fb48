//! Cluster transport effect traits
//!
//! Nodes exchange opaque byte payloads on named subjects. A node registers one
//! [`MessageHandler`] per subject; the transport routes each inbound payload to the
//! handler of the destination node and, for request/response, returns the handler's
//! reply to the caller.
//!
//! # Effect Classification
//!
//! - **Category**: Infrastructure Effect
//! - **Implementation**: `strand-effects` (in-memory cluster network)
//! - **Usage**: the gossip map for push, pull, anti-entropy and bootstrap traffic

use crate::errors::StrandError;
use crate::identifiers::{MessageSubject, NodeId};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Network operation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    /// Failed to send a message to the destination
    #[error("Failed to send message to {peer}: {reason}")]
    SendFailed {
        /// Destination node
        peer: NodeId,
        /// Reason for the failure
        reason: String,
    },
    /// Destination cannot be reached
    #[error("Peer unreachable: {peer}")]
    PeerUnreachable {
        /// Identifier of the unreachable peer
        peer: NodeId,
    },
    /// Destination has no handler registered for the subject
    #[error("No handler for '{subject}' on {peer}")]
    NoHandler {
        /// Destination node
        peer: NodeId,
        /// Subject that had no handler
        subject: MessageSubject,
    },
    /// Operation timed out
    #[error("Operation '{operation}' timed out after {timeout_ms}ms")]
    OperationTimeout {
        /// The operation that timed out
        operation: String,
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },
    /// Serialization failed while preparing a network payload
    #[error("Serialization failed: {error}")]
    SerializationFailed {
        /// Serialization error message
        error: String,
    },
    /// Deserialization failed while decoding a payload
    #[error("Deserialization failed: {error}")]
    DeserializationFailed {
        /// Deserialization error message
        error: String,
    },
    /// The receiving handler rejected the message
    #[error("Handler failed: {reason}")]
    HandlerFailed {
        /// Reason reported by the handler
        reason: String,
    },
}

impl From<NetworkError> for StrandError {
    fn from(err: NetworkError) -> Self {
        match err {
            NetworkError::OperationTimeout {
                operation,
                timeout_ms,
            } => StrandError::timeout(operation, timeout_ms),
            NetworkError::SerializationFailed { error }
            | NetworkError::DeserializationFailed { error } => StrandError::serialization(error),
            other => StrandError::network(other.to_string()),
        }
    }
}

/// Receiver of payloads published on one subject
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle a payload from `sender`, returning the reply bytes
    ///
    /// Replies of fire-and-forget messages are discarded by the transport.
    async fn handle(&self, sender: NodeId, payload: Vec<u8>) -> Result<Vec<u8>, NetworkError>;
}

/// Node-to-node messaging
#[async_trait]
pub trait ClusterCommunicationEffects: Send + Sync {
    /// Deliver a payload without waiting for a reply
    async fn unicast(
        &self,
        subject: &MessageSubject,
        payload: Vec<u8>,
        to: &NodeId,
    ) -> Result<(), NetworkError>;

    /// Deliver a payload and wait up to `timeout` for the reply
    async fn send_and_receive(
        &self,
        subject: &MessageSubject,
        payload: Vec<u8>,
        to: &NodeId,
        timeout: Duration,
    ) -> Result<Vec<u8>, NetworkError>;

    /// Register the local handler for a subject, replacing any previous one
    fn add_subscriber(&self, subject: MessageSubject, handler: Arc<dyn MessageHandler>);

    /// Unregister the local handler for a subject
    fn remove_subscriber(&self, subject: &MessageSubject);
}
