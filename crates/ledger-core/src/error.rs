use crate::hash::{hash_hex, Hash};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a block was refused by `Chain::append` or chain validation.
///
/// Serialized with a `reason` tag so that HTTP clients (the remote miner in
/// particular) can tell a stale parent apart from an invalid block.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    #[error("malformed block: {detail}")]
    MalformedBlock { detail: String },

    #[error(
        "stale or forked parent: head is {}, block builds on {}",
        hex::encode(.expected),
        hex::encode(.found)
    )]
    StaleOrForkedParent {
        #[serde(with = "hash_hex")]
        expected: Hash,
        #[serde(with = "hash_hex")]
        found: Hash,
    },

    #[error("proof of work does not meet difficulty {difficulty}")]
    DifficultyNotMet { difficulty: u32 },

    #[error("invalid transaction #{position}: {detail}")]
    InvalidTransaction { position: usize, detail: String },
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::MalformedBlock { .. } => "MALFORMED_BLOCK",
            RejectReason::StaleOrForkedParent { .. } => "STALE_OR_FORKED_PARENT",
            RejectReason::DifficultyNotMet { .. } => "DIFFICULTY_NOT_MET",
            RejectReason::InvalidTransaction { .. } => "INVALID_TRANSACTION",
        }
    }

    pub(crate) fn malformed(detail: impl Into<String>) -> Self {
        RejectReason::MalformedBlock {
            detail: detail.into(),
        }
    }
}

/// Admission failures for new transactions.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionError {
    #[error("invalid parameters: {detail}")]
    InvalidParameters { detail: String },

    #[error("insufficient balance: {address} can spend {available}, needs {amount}")]
    InsufficientBalance {
        address: String,
        available: u64,
        amount: u64,
    },
}

impl TransactionError {
    pub(crate) fn invalid(detail: impl Into<String>) -> Self {
        TransactionError::InvalidParameters {
            detail: detail.into(),
        }
    }
}

/// Outcome of handing a mined block to wherever it is appended.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("block rejected: {0}")]
    Rejected(#[from] RejectReason),

    /// Network or availability problem; worth retrying.
    #[error("transport failure: {0}")]
    Transport(String),
}

impl SubmitError {
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            SubmitError::Rejected(RejectReason::StaleOrForkedParent { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_reason_json_carries_tag() {
        let reason = RejectReason::StaleOrForkedParent {
            expected: [0xab; 32],
            found: [0u8; 32],
        };
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["reason"], "STALE_OR_FORKED_PARENT");
        assert_eq!(json["expected"], "ab".repeat(32));
        let back: RejectReason = serde_json::from_value(json).unwrap();
        assert_eq!(back, reason);
        assert_eq!(back.code(), "STALE_OR_FORKED_PARENT");
    }

    #[test]
    fn stale_detection() {
        let stale = SubmitError::from(RejectReason::StaleOrForkedParent {
            expected: [1; 32],
            found: [2; 32],
        });
        assert!(stale.is_stale());
        let pow = SubmitError::from(RejectReason::DifficultyNotMet { difficulty: 2 });
        assert!(!pow.is_stale());
        assert!(!SubmitError::Transport("refused".into()).is_stale());
    }

    #[test]
    fn insufficient_balance_message() {
        let err = TransactionError::InsufficientBalance {
            address: "A".into(),
            available: 50,
            amount: 100,
        };
        assert_eq!(
            err.to_string(),
            "insufficient balance: A can spend 50, needs 100"
        );
    }
}
