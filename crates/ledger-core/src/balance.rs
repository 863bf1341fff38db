use crate::{
    block::Block,
    error::{RejectReason, TransactionError},
    transaction::{check_parameters, Transaction},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type Address = String;
pub type Amount = u64;

/// Confirmed balances, derived by folding every confirmed transaction over the
/// chain. Persisted copies are a cache; the chain is authoritative.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BalanceLedger {
    balances: BTreeMap<Address, Amount>,
}

impl BalanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> &BTreeMap<Address, Amount> {
        &self.balances
    }

    pub fn balance(&self, address: &str) -> Amount {
        self.balances.get(address).copied().unwrap_or(0)
    }

    /// Move `tx.amount` from sender to recipient. Coinbase has no debit side.
    pub fn apply(&mut self, tx: &Transaction) -> Result<(), TransactionError> {
        check_parameters(&tx.from, &tx.to, tx.amount)?;
        let credited = self
            .balance(&tx.to)
            .checked_add(tx.amount)
            .ok_or_else(|| TransactionError::invalid("recipient balance overflow"))?;
        if !tx.is_coinbase() {
            let available = self.balance(&tx.from);
            if available < tx.amount {
                return Err(TransactionError::InsufficientBalance {
                    address: tx.from.clone(),
                    available,
                    amount: tx.amount,
                });
            }
            self.balances.insert(tx.from.clone(), available - tx.amount);
        }
        self.balances.insert(tx.to.clone(), credited);
        Ok(())
    }

    /// Fold a whole block in order. Either every transaction applies or the
    /// ledger is left untouched.
    pub fn apply_block(&mut self, block: &Block) -> Result<(), RejectReason> {
        let mut scratch = self.clone();
        for (position, tx) in block.transactions.iter().enumerate() {
            scratch
                .apply(tx)
                .map_err(|e| RejectReason::InvalidTransaction {
                    position,
                    detail: e.to_string(),
                })?;
        }
        *self = scratch;
        Ok(())
    }

    /// Rebuild balances from scratch over `blocks`.
    pub fn replay<'a, I>(blocks: I) -> Result<Self, RejectReason>
    where
        I: IntoIterator<Item = &'a Block>,
    {
        let mut ledger = Self::new();
        for block in blocks {
            ledger.apply_block(block)?;
        }
        Ok(ledger)
    }

    /// UI view: confirmed balance plus the net effect of `pending`. Signed,
    /// because the pending view is allowed to dip below zero.
    pub fn tentative_balance<'a, I>(&self, address: &str, pending: I) -> i128
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        let mut balance = i128::from(self.balance(address));
        for tx in pending {
            if tx.to == address {
                balance += i128::from(tx.amount);
            }
            if tx.from == address && !tx.is_coinbase() {
                balance -= i128::from(tx.amount);
            }
        }
        balance
    }
}
