use crate::{
    constants::{GENESIS_MINER, GENESIS_PREVIOUS_HASH, GENESIS_TIMESTAMP_SECS},
    error::RejectReason,
    hash::{digest, hash_hex, short, Hash},
    pow::{self, CancelFlag},
    transaction::{canonical_time, Transaction},
};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub transactions: Vec<Transaction>,
    #[serde(with = "hash_hex")]
    pub previous_hash: Hash,
    #[serde(with = "hash_hex")]
    pub hash: Hash,
    pub nonce: u64,
    pub miner_address: String,
}

impl Block {
    /// Assemble an unmined block with `nonce = 0`. Pure: nothing outside the
    /// returned value is touched.
    pub fn create(
        index: u64,
        timestamp: DateTime<Utc>,
        transactions: Vec<Transaction>,
        previous_hash: Hash,
        miner_address: impl Into<String>,
    ) -> Self {
        let mut block = Block {
            index,
            timestamp,
            transactions,
            previous_hash,
            hash: [0u8; 32],
            nonce: 0,
            miner_address: miner_address.into(),
        };
        block.hash = block.calculate_hash();
        block
    }

    /// Deterministic first block. Each grant becomes a coinbase credit, so
    /// nodes configured with the same grants agree on the genesis hash.
    pub fn genesis(grants: &[(String, u64)]) -> Self {
        let timestamp = Utc
            .timestamp_opt(GENESIS_TIMESTAMP_SECS, 0)
            .single()
            .unwrap_or_default();
        let transactions = grants
            .iter()
            .enumerate()
            .map(|(i, (address, amount))| {
                let mut tx = Transaction::with_nonce(
                    crate::constants::COINBASE,
                    address.clone(),
                    *amount,
                    timestamp,
                    i as u64,
                );
                tx.confirm();
                tx
            })
            .collect();
        Block::create(0, timestamp, transactions, GENESIS_PREVIOUS_HASH, GENESIS_MINER)
    }

    fn header_hasher(&self) -> Sha256 {
        let mut hasher = Sha256::new();
        hasher.update(self.index.to_le_bytes());
        hasher.update(self.previous_hash);
        hasher.update(canonical_time(&self.timestamp).as_bytes());
        for tx in &self.transactions {
            hasher.update(tx.hash);
        }
        hasher
    }

    fn finish_hash(&self, prefix: &Sha256, nonce: u64) -> Hash {
        let mut hasher = prefix.clone();
        hasher.update(nonce.to_le_bytes());
        hasher.update(self.miner_address.as_bytes());
        digest(hasher)
    }

    pub fn calculate_hash(&self) -> Hash {
        self.finish_hash(&self.header_hasher(), self.nonce)
    }

    /// Search nonces from the current one until the hash carries `difficulty`
    /// leading zero digits. Returns `false` if `cancel` fired first, leaving
    /// the block in an unspecified but self-consistent state.
    pub fn mine(&mut self, difficulty: u32, cancel: &CancelFlag) -> bool {
        let prefix = self.header_hasher();
        let found = pow::search_nonce(self.nonce, difficulty, cancel, |nonce| {
            self.finish_hash(&prefix, nonce)
        });
        self.apply_found(found, difficulty)
    }

    /// Same result as [`Block::mine`], using every rayon worker.
    pub fn mine_parallel(&mut self, difficulty: u32, cancel: &CancelFlag) -> bool {
        let prefix = self.header_hasher();
        let found = pow::search_nonce_parallel(self.nonce, difficulty, cancel, |nonce| {
            self.finish_hash(&prefix, nonce)
        });
        self.apply_found(found, difficulty)
    }

    fn apply_found(&mut self, found: Option<(u64, Hash)>, difficulty: u32) -> bool {
        match found {
            Some((nonce, hash)) => {
                debug!(
                    index = self.index,
                    nonce,
                    difficulty,
                    hash = %short(&hash),
                    "nonce found"
                );
                self.nonce = nonce;
                self.hash = hash;
                true
            }
            None => false,
        }
    }

    /// Recompute the hash from the block contents and check it both matches
    /// the stored one and meets the target.
    pub fn verify_proof_of_work(&self, difficulty: u32) -> bool {
        self.calculate_hash() == self.hash && pow::meets_difficulty(&self.hash, difficulty)
    }

    /// Field-level completeness and hash integrity, independent of chain
    /// position.
    pub fn check_structure(&self) -> Result<(), RejectReason> {
        if self.miner_address.trim().is_empty() {
            return Err(RejectReason::malformed("missing miner address"));
        }
        if self.calculate_hash() != self.hash {
            return Err(RejectReason::malformed("hash does not match block contents"));
        }
        let mut seen = HashSet::with_capacity(self.transactions.len());
        for (position, tx) in self.transactions.iter().enumerate() {
            if !tx.has_valid_hash() {
                return Err(RejectReason::malformed(format!(
                    "transaction #{position} hash does not match its contents"
                )));
            }
            if !seen.insert(tx.hash) {
                return Err(RejectReason::malformed(format!(
                    "transaction #{position} appears twice"
                )));
            }
        }
        Ok(())
    }
}
