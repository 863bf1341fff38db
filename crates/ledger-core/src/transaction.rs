use crate::{
    constants::COINBASE,
    error::TransactionError,
    hash::{digest, hash_hex, Hash},
};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirmed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub from: String,
    pub to: String,
    pub amount: u64,
    pub timestamp: DateTime<Utc>,
    /// Random per-transaction salt so identical transfers hash differently.
    pub nonce: u64,
    pub status: TxStatus,
    #[serde(with = "hash_hex")]
    pub hash: Hash,
}

/// Equality ignores `status`: a transaction is the same transfer before and
/// after it is confirmed.
impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.timestamp == other.timestamp
            && self.nonce == other.nonce
            && self.amount == other.amount
            && self.from == other.from
            && self.to == other.to
    }
}

impl Eq for Transaction {}

pub(crate) fn canonical_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

impl Transaction {
    /// Build a pending transaction stamped with the current time and a random
    /// nonce. No admission checks happen here.
    pub fn new(from: impl Into<String>, to: impl Into<String>, amount: u64) -> Self {
        Self::with_nonce(from, to, amount, now_millis(), rand::random())
    }

    pub fn with_nonce(
        from: impl Into<String>,
        to: impl Into<String>,
        amount: u64,
        timestamp: DateTime<Utc>,
        nonce: u64,
    ) -> Self {
        let mut tx = Transaction {
            from: from.into(),
            to: to.into(),
            amount,
            timestamp,
            nonce,
            status: TxStatus::Pending,
            hash: [0u8; 32],
        };
        tx.hash = tx.calculate_hash();
        tx
    }

    pub fn coinbase(to: impl Into<String>, amount: u64) -> Self {
        Self::new(COINBASE, to, amount)
    }

    pub fn is_coinbase(&self) -> bool {
        self.from == COINBASE
    }

    pub fn calculate_hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.from.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.to.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.amount.to_le_bytes());
        hasher.update(canonical_time(&self.timestamp).as_bytes());
        hasher.update(self.nonce.to_le_bytes());
        digest(hasher)
    }

    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }

    pub(crate) fn confirm(&mut self) {
        self.status = TxStatus::Confirmed;
    }
}

/// Parameter checks shared by API admission, gossip admission and block validation.
pub fn check_parameters(from: &str, to: &str, amount: u64) -> Result<(), TransactionError> {
    if from.trim().is_empty() || to.trim().is_empty() {
        return Err(TransactionError::invalid("sender and recipient are required"));
    }
    if amount == 0 {
        return Err(TransactionError::invalid("amount must be positive"));
    }
    if from == to {
        return Err(TransactionError::invalid("cannot send to self"));
    }
    if to == COINBASE {
        return Err(TransactionError::invalid("coinbase cannot receive funds"));
    }
    Ok(())
}
