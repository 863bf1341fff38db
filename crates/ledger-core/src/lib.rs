//! Chain state, proof of work and the gossip rules of a small single-leader
//! proof-of-work ledger.

pub mod balance;
pub mod block;
pub mod chain;
pub mod constants;
pub mod error;
pub mod hash;
pub mod miner;
pub mod pow;
pub mod sync;
pub mod transaction;

pub use balance::{Address, Amount, BalanceLedger};
pub use block::Block;
pub use chain::{validate_chain, Chain, ChainConfig, ChainStore, Durability, MemoryStore};
pub use error::{RejectReason, SubmitError, TransactionError};
pub use hash::Hash;
pub use miner::{Miner, MinerConfig, MinerReport, MinerState, MiningTemplate, RetryPolicy, WorkSource};
pub use pow::CancelFlag;
pub use sync::{Message, SyncOutcome};
pub use transaction::{Transaction, TxStatus};
