//! Transaction lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;
use strand_core::{Result, StrandError};

/// Lifecycle of a transaction against one participant
///
/// ```text
/// Active -> Preparing -> Prepared -> Committing -> Committed
///   |           |           |
///   +-----------+-----------+-----> RollingBack -> RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionState {
    Active,
    Preparing,
    Prepared,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
}

impl TransactionState {
    /// Whether `next` may follow `self`
    pub fn can_transition_to(self, next: TransactionState) -> bool {
        use TransactionState::*;
        matches!(
            (self, next),
            (Active, Preparing)
                | (Active, RollingBack)
                | (Preparing, Prepared)
                | (Preparing, Committing)
                | (Preparing, RollingBack)
                | (Prepared, Committing)
                | (Prepared, RollingBack)
                | (Committing, Committed)
                | (RollingBack, RolledBack)
        )
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn transition(&mut self, next: TransactionState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(StrandError::transaction(format!(
                "illegal transition {self} -> {next}"
            )));
        }
        *self = next;
        Ok(())
    }

    /// Whether the transaction has ended
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "ACTIVE",
            Self::Preparing => "PREPARING",
            Self::Prepared => "PREPARED",
            Self::Committing => "COMMITTING",
            Self::Committed => "COMMITTED",
            Self::RollingBack => "ROLLING_BACK",
            Self::RolledBack => "ROLLED_BACK",
        };
        f.write_str(name)
    }
}

/// Outcome reported to the client of a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitStatus {
    /// Every update was applied
    Success,
    /// Nothing was applied
    Failure,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut state = TransactionState::Active;
        for next in [
            TransactionState::Preparing,
            TransactionState::Prepared,
            TransactionState::Committing,
            TransactionState::Committed,
        ] {
            state.transition(next).unwrap();
        }
        assert!(state.is_terminal());
    }

    #[test]
    fn test_illegal_transitions_are_rejected() {
        let mut state = TransactionState::Active;
        assert!(state.transition(TransactionState::Committed).is_err());
        assert_eq!(state, TransactionState::Active);

        let mut committed = TransactionState::Committed;
        assert!(committed.transition(TransactionState::RollingBack).is_err());

        let mut committing = TransactionState::Committing;
        assert!(committing.transition(TransactionState::RollingBack).is_err());
    }

    #[test]
    fn test_rollback_from_any_pre_commit_state() {
        for from in [
            TransactionState::Active,
            TransactionState::Preparing,
            TransactionState::Prepared,
        ] {
            assert!(from.can_transition_to(TransactionState::RollingBack));
        }
    }
}
