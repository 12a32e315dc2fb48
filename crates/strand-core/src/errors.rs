//! Unified error type for Strand
//!
//! Every crate in the workspace reports failures through [`StrandError`]. Transport
//! failures carry their own [`NetworkError`](crate::effects::NetworkError) and convert
//! into this type at crate boundaries.

use serde::{Deserialize, Serialize};

/// Unified error type for all Strand operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum StrandError {
    /// Invalid input, configuration or state
    #[error("Invalid: {message}")]
    Invalid {
        /// Error message describing the invalid input
        message: String,
    },

    /// Resource not found
    #[error("Not found: {message}")]
    NotFound {
        /// Error message describing what was not found
        message: String,
    },

    /// Primitive was destroyed and can no longer be used
    #[error("Primitive '{name}' has been destroyed")]
    Destroyed {
        /// Name of the destroyed primitive
        name: String,
    },

    /// Network or transport error
    #[error("Network error: {message}")]
    Network {
        /// Error message describing the network issue
        message: String,
    },

    /// Bounded operation did not complete in time
    #[error("Operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The operation that timed out
        operation: String,
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message describing the serialization failure
        message: String,
    },

    /// A key is locked by a prepared transaction or a precondition raced
    #[error("Concurrent modification: {message}")]
    ConcurrentModification {
        /// Error message describing the conflict
        message: String,
    },

    /// Transaction protocol violation or failure
    #[error("Transaction error: {message}")]
    Transaction {
        /// Error message describing the transaction failure
        message: String,
    },

    /// One or more event listeners failed
    #[error("{failures} listener(s) failed: {message}")]
    Listener {
        /// Number of listeners that failed
        failures: usize,
        /// Message of the first failure
        message: String,
    },

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Local persistent storage could not be read or written
    #[error("Storage error: {message}")]
    Storage {
        /// Error message describing the storage failure
        message: String,
    },

    /// Internal system error
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the internal error
        message: String,
    },
}

impl StrandError {
    /// Create an invalid input error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a destroyed-primitive error
    pub fn destroyed(name: impl Into<String>) -> Self {
        Self::Destroyed { name: name.into() }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a concurrent modification error
    pub fn concurrent_modification(message: impl Into<String>) -> Self {
        Self::ConcurrentModification {
            message: message.into(),
        }
    }

    /// Create a transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Create an aggregated listener failure
    pub fn listener(failures: usize, message: impl Into<String>) -> Self {
        Self::Listener {
            failures,
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether retrying the operation later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Timeout { .. } | Self::ConcurrentModification { .. }
        )
    }
}

/// Standard Result type for Strand operations
pub type Result<T> = std::result::Result<T, StrandError>;

impl From<bincode::Error> for StrandError {
    fn from(err: bincode::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<toml::de::Error> for StrandError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<toml::ser::Error> for StrandError {
    fn from(err: toml::ser::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<std::io::Error> for StrandError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(err.to_string()),
            _ => Self::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = StrandError::invalid("test message");
        assert!(matches!(err, StrandError::Invalid { .. }));
        assert_eq!(err.to_string(), "Invalid: test message");
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = StrandError::from(io_err);
        assert!(matches!(err, StrandError::NotFound { .. }));
    }

    #[test]
    fn test_transient_classification() {
        assert!(StrandError::timeout("prepare", 50).is_transient());
        assert!(StrandError::network("peer gone").is_transient());
        assert!(!StrandError::destroyed("map").is_transient());
        assert!(!StrandError::serialization("bad bytes").is_transient());
    }

    #[test]
    fn test_listener_message() {
        let err = StrandError::listener(2, "boom");
        assert_eq!(err.to_string(), "2 listener(s) failed: boom");
    }
}
