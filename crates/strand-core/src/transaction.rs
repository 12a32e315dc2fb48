//! Transaction log records exchanged between participants and partition replicas

use crate::identifiers::TransactionId;
use serde::{Deserialize, Serialize};

/// One record of a transactional map update log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MapUpdate<K, V> {
    /// Write `value` if the key is still at `version`
    PutIfVersionMatch {
        /// Key to write
        key: K,
        /// New value
        value: V,
        /// Version observed by the transaction
        version: u64,
    },
    /// Remove the key if it is still at `version`
    RemoveIfVersionMatch {
        /// Key to remove
        key: K,
        /// Version observed by the transaction
        version: u64,
    },
    /// Hold a read key at `version` until the transaction ends
    Lock {
        /// Key that was read
        key: K,
        /// Version observed by the transaction
        version: u64,
    },
    /// The whole map must not have advanced past `version`
    VersionMatch {
        /// Map version observed by the transaction
        version: u64,
    },
}

impl<K, V> MapUpdate<K, V> {
    /// Key the record applies to, if any
    pub fn key(&self) -> Option<&K> {
        match self {
            Self::PutIfVersionMatch { key, .. }
            | Self::RemoveIfVersionMatch { key, .. }
            | Self::Lock { key, .. } => Some(key),
            Self::VersionMatch { .. } => None,
        }
    }

    /// Version the record was validated against
    pub fn version(&self) -> u64 {
        match self {
            Self::PutIfVersionMatch { version, .. }
            | Self::RemoveIfVersionMatch { version, .. }
            | Self::Lock { version, .. }
            | Self::VersionMatch { version } => *version,
        }
    }

    /// Whether committing the record changes the map
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::PutIfVersionMatch { .. } | Self::RemoveIfVersionMatch { .. }
        )
    }
}

/// Update log of one transaction against one replica
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionLog<T> {
    /// Owning transaction
    pub transaction_id: TransactionId,
    /// Lock version returned by `begin`
    pub version: u64,
    /// Records to validate and apply
    pub records: Vec<T>,
}

impl<T> TransactionLog<T> {
    /// Build a log
    pub fn new(transaction_id: TransactionId, version: u64, records: Vec<T>) -> Self {
        Self {
            transaction_id,
            version,
            records,
        }
    }
}
