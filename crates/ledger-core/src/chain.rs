use crate::{
    balance::{Address, Amount, BalanceLedger},
    block::Block,
    constants::{DEFAULT_DIFFICULTY, GENESIS_PREVIOUS_HASH},
    error::{RejectReason, TransactionError},
    hash::{short, Hash},
    miner::MiningTemplate,
    sync::{self, SyncAction, SyncOutcome},
    transaction::{check_parameters, Transaction, TxStatus},
};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};
use tracing::{debug, error, info, warn};

/// Snapshot persistence the chain needs. Lives in `ledger-core` so storage
/// backends can depend on the core types without a cycle.
pub trait ChainStore: Send + Sync {
    fn load_chain(&self) -> Result<Option<Vec<Block>>>;
    fn save_chain(&self, blocks: &[Block]) -> Result<()>;
    fn load_balances(&self) -> Result<Option<BTreeMap<Address, Amount>>>;
    fn save_balances(&self, balances: &BTreeMap<Address, Amount>) -> Result<()>;
    /// Move an unusable chain snapshot out of the way so the next
    /// `save_chain` cannot overwrite it.
    fn set_aside_chain(&self) -> Result<()>;
}

/// Volatile store, for tests and throwaway nodes. Writes can be made to fail
/// to exercise degraded durability.
#[derive(Default)]
pub struct MemoryStore {
    chain: Mutex<Option<Vec<Block>>>,
    balances: Mutex<Option<BTreeMap<Address, Amount>>>,
    rejected: Mutex<Option<Vec<Block>>>,
    failing: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    /// The last chain snapshot moved aside by `set_aside_chain`.
    pub fn rejected_chain(&self) -> Option<Vec<Block>> {
        self.rejected.lock().clone()
    }

    fn check_writable(&self) -> Result<()> {
        if *self.failing.lock() {
            anyhow::bail!("memory store is read-only");
        }
        Ok(())
    }
}

impl ChainStore for MemoryStore {
    fn load_chain(&self) -> Result<Option<Vec<Block>>> {
        Ok(self.chain.lock().clone())
    }

    fn save_chain(&self, blocks: &[Block]) -> Result<()> {
        self.check_writable()?;
        *self.chain.lock() = Some(blocks.to_vec());
        Ok(())
    }

    fn load_balances(&self) -> Result<Option<BTreeMap<Address, Amount>>> {
        Ok(self.balances.lock().clone())
    }

    fn save_balances(&self, balances: &BTreeMap<Address, Amount>) -> Result<()> {
        self.check_writable()?;
        *self.balances.lock() = Some(balances.clone());
        Ok(())
    }

    fn set_aside_chain(&self) -> Result<()> {
        self.check_writable()?;
        let chain = self.chain.lock().take();
        if chain.is_some() {
            *self.rejected.lock() = chain;
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct ChainConfig {
    pub difficulty: u32,
    /// Coinbase credits baked into the genesis block.
    pub genesis_grants: Vec<(Address, Amount)>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            genesis_grants: Vec::new(),
        }
    }
}

/// Whether the last snapshot write reached the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "lowercase")]
pub enum Durability {
    Durable,
    Degraded(String),
}

/// The ordered blocks, the pending pool and the derived balances of one node.
///
/// Every mutating method performs its whole read-validate-write sequence on
/// `&mut self`; callers sharing a chain wrap it in a single lock.
pub struct Chain<S: ChainStore> {
    store: Arc<S>,
    blocks: Vec<Block>,
    pending: Vec<Transaction>,
    difficulty: u32,
    ledger: BalanceLedger,
    confirmed: HashSet<Hash>,
    durability: Durability,
}

impl<S: ChainStore> Chain<S> {
    /// Load the persisted chain, re-validating all of it, or synthesize the
    /// genesis block when nothing usable is stored. Balances are always
    /// rebuilt by replay; a disagreeing balance snapshot is rewritten.
    ///
    /// An unreadable or invalid snapshot is set aside in the store before
    /// genesis is written. Fails if it cannot be set aside.
    pub fn open(store: Arc<S>, config: ChainConfig) -> Result<Self> {
        let difficulty = config.difficulty;
        let restored = match store.load_chain() {
            Ok(None) => None,
            Ok(Some(blocks)) => match validate_chain(&blocks, difficulty) {
                Ok(ledger) => Some((blocks, ledger)),
                Err(reason) => {
                    warn!(
                        blocks = blocks.len(),
                        "persisted chain rejected ({reason}); setting it aside"
                    );
                    store
                        .set_aside_chain()
                        .context("setting aside the rejected chain snapshot")?;
                    None
                }
            },
            Err(e) => {
                warn!("could not read chain snapshot ({e:#}); setting it aside");
                store
                    .set_aside_chain()
                    .context("setting aside the unreadable chain snapshot")?;
                None
            }
        };

        let mut chain = Self {
            store,
            blocks: Vec::new(),
            pending: Vec::new(),
            difficulty,
            ledger: BalanceLedger::new(),
            confirmed: HashSet::new(),
            durability: Durability::Durable,
        };

        match restored {
            Some((blocks, ledger)) => {
                chain.install(blocks, ledger);
                info!(height = chain.height(), "chain restored from snapshot");
                chain.reconcile_balance_snapshot();
            }
            None => {
                let genesis = Block::genesis(&config.genesis_grants);
                let (genesis, ledger) = match BalanceLedger::replay([&genesis]) {
                    Ok(ledger) => (genesis, ledger),
                    Err(reason) => {
                        warn!("genesis grants rejected ({reason}); using an empty genesis");
                        (Block::genesis(&[]), BalanceLedger::new())
                    }
                };
                info!(hash = %short(&genesis.hash), "genesis block created");
                chain.install(vec![genesis], ledger);
                chain.persist();
            }
        }
        Ok(chain)
    }

    fn install(&mut self, mut blocks: Vec<Block>, ledger: BalanceLedger) {
        for tx in blocks.iter_mut().flat_map(|b| b.transactions.iter_mut()) {
            tx.confirm();
        }
        self.confirmed = blocks
            .iter()
            .flat_map(|b| b.transactions.iter().map(|tx| tx.hash))
            .collect();
        self.blocks = blocks;
        self.ledger = ledger;
    }

    fn reconcile_balance_snapshot(&mut self) {
        match self.store.load_balances() {
            Ok(Some(snapshot)) if &snapshot == self.ledger.snapshot() => {}
            Ok(Some(_)) => {
                warn!("balance snapshot disagrees with the chain; rewriting it");
                self.persist();
            }
            Ok(None) => self.persist(),
            Err(e) => {
                warn!("could not read balance snapshot: {e:#}");
                self.persist();
            }
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Index of the head block.
    pub fn height(&self) -> u64 {
        self.latest_block().index
    }

    /// The head. Never fails: `open` always leaves at least the genesis block.
    pub fn latest_block(&self) -> &Block {
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn pending(&self) -> &[Transaction] {
        &self.pending
    }

    pub fn ledger(&self) -> &BalanceLedger {
        &self.ledger
    }

    pub fn balance(&self, address: &str) -> Amount {
        self.ledger.balance(address)
    }

    pub fn tentative_balance(&self, address: &str) -> i128 {
        self.ledger.tentative_balance(address, &self.pending)
    }

    pub fn durability(&self) -> &Durability {
        &self.durability
    }

    pub fn is_valid(&self) -> bool {
        validate_chain(&self.blocks, self.difficulty).is_ok()
    }

    fn pending_outgoing(&self, address: &str) -> Amount {
        self.pending
            .iter()
            .filter(|tx| tx.from == address)
            .fold(0u64, |acc, tx| acc.saturating_add(tx.amount))
    }

    fn check_affordable(&self, from: &str, amount: Amount) -> Result<(), TransactionError> {
        if from == crate::constants::COINBASE {
            return Ok(());
        }
        let available = self
            .ledger
            .balance(from)
            .saturating_sub(self.pending_outgoing(from));
        if available < amount {
            return Err(TransactionError::InsufficientBalance {
                address: from.to_string(),
                available,
                amount,
            });
        }
        Ok(())
    }

    /// Admit a new transfer into the pending pool. Balances only move once the
    /// transaction is confirmed in a block.
    pub fn create_transaction(
        &mut self,
        from: &str,
        to: &str,
        amount: Amount,
    ) -> Result<Transaction, TransactionError> {
        check_parameters(from, to, amount)?;
        self.check_affordable(from, amount)?;
        let tx = Transaction::new(from, to, amount);
        info!(from, to, amount, hash = %short(&tx.hash), "transaction pending");
        self.pending.push(tx.clone());
        Ok(tx)
    }

    /// Admit a transaction received from a peer. `Ok(false)` means it was
    /// already known and should not be gossiped again.
    pub fn admit_transaction(&mut self, mut tx: Transaction) -> Result<bool, TransactionError> {
        check_parameters(&tx.from, &tx.to, tx.amount)?;
        if !tx.has_valid_hash() {
            return Err(TransactionError::invalid("hash does not match contents"));
        }
        if self.confirmed.contains(&tx.hash) || self.pending.iter().any(|p| p.hash == tx.hash) {
            return Ok(false);
        }
        self.check_affordable(&tx.from, tx.amount)?;
        tx.status = TxStatus::Pending;
        debug!(hash = %short(&tx.hash), "gossiped transaction admitted");
        self.pending.push(tx);
        Ok(true)
    }

    /// Work for the next block: the head it must extend and the pending
    /// transactions that are valid, in order, against confirmed balances.
    pub fn mining_template(&self) -> MiningTemplate {
        let head = self.latest_block();
        let mut scratch = self.ledger.clone();
        let transactions = self
            .pending
            .iter()
            .filter(|tx| scratch.apply(tx).is_ok())
            .cloned()
            .collect();
        MiningTemplate {
            index: head.index + 1,
            previous_hash: head.hash,
            difficulty: self.difficulty,
            transactions,
        }
    }

    /// Validate `candidate` against the current head and, if it passes, make
    /// it the new head. On rejection nothing changes.
    pub fn append(&mut self, candidate: Block) -> Result<(), RejectReason> {
        if let Err(reason) = validate_successor(self.latest_block(), &candidate, self.difficulty)
            .and_then(|()| check_not_replayed(&candidate, &self.confirmed))
            .and_then(|()| self.ledger.apply_block(&candidate))
        {
            warn!(index = candidate.index, "block rejected: {reason}");
            return Err(reason);
        }

        let mut block = candidate;
        for tx in &mut block.transactions {
            tx.confirm();
            self.confirmed.insert(tx.hash);
        }
        info!(
            index = block.index,
            hash = %short(&block.hash),
            txs = block.transactions.len(),
            miner = %block.miner_address,
            "block appended"
        );
        self.blocks.push(block);
        self.reconcile_pending();
        self.persist();
        Ok(())
    }

    /// Longest-chain fork-choice. A strictly longer remote chain is adopted
    /// only after every link, proof of work and balance checks out; balances
    /// are then recomputed from it.
    pub fn replace_chain(&mut self, remote: Vec<Block>) -> Result<bool, RejectReason> {
        if remote.len() <= self.blocks.len() {
            debug!(
                remote = remote.len(),
                local = self.blocks.len(),
                "remote chain is not longer; keeping ours"
            );
            return Ok(false);
        }
        if remote[0].hash != self.blocks[0].hash {
            warn!(remote = %short(&remote[0].hash), "remote chain has a different genesis block");
            return Err(RejectReason::malformed("genesis block differs from ours"));
        }
        let ledger = validate_chain(&remote, self.difficulty).map_err(|reason| {
            warn!("remote chain rejected: {reason}");
            reason
        })?;
        let previous = self.blocks.len();
        self.install(remote, ledger);
        self.reconcile_pending();
        info!(
            from = previous,
            to = self.blocks.len(),
            "chain replaced with longer remote chain"
        );
        self.persist();
        Ok(true)
    }

    /// Apply blocks received from a peer following the gossip rules.
    pub fn receive_blocks(&mut self, blocks: Vec<Block>) -> SyncOutcome {
        match sync::plan_response(self.latest_block(), blocks) {
            SyncAction::Ignore => SyncOutcome::Ignored,
            SyncAction::AppendHead(block) => match self.append(block.clone()) {
                Ok(()) => SyncOutcome::Appended(block),
                Err(reason) => SyncOutcome::Rejected(reason),
            },
            SyncAction::QueryAll => SyncOutcome::NeedFullChain,
            SyncAction::Replace(blocks) => match self.replace_chain(blocks) {
                Ok(true) => SyncOutcome::Replaced(self.latest_block().clone()),
                Ok(false) => SyncOutcome::Ignored,
                Err(reason) => SyncOutcome::Rejected(reason),
            },
        }
    }

    /// Drop pending transactions that are now confirmed or no longer payable.
    fn reconcile_pending(&mut self) {
        let mut scratch = self.ledger.clone();
        let before = self.pending.len();
        let confirmed = &self.confirmed;
        self.pending
            .retain(|tx| !confirmed.contains(&tx.hash) && scratch.apply(tx).is_ok());
        let dropped = before - self.pending.len();
        if dropped > 0 {
            debug!(dropped, remaining = self.pending.len(), "pending pool pruned");
        }
    }

    fn persist(&mut self) {
        let result = self
            .store
            .save_chain(&self.blocks)
            .and_then(|()| self.store.save_balances(self.ledger.snapshot()));
        match result {
            Ok(()) => {
                if self.durability != Durability::Durable {
                    info!("snapshot writes recovered");
                }
                self.durability = Durability::Durable;
            }
            Err(e) => {
                error!("snapshot write failed, continuing in memory only: {e:#}");
                self.durability = Durability::Degraded(format!("{e:#}"));
            }
        }
    }
}

/// Link, index and proof-of-work checks for a block extending `head`, in
/// rejection order.
fn validate_successor(head: &Block, candidate: &Block, difficulty: u32) -> Result<(), RejectReason> {
    candidate.check_structure()?;
    if candidate.previous_hash != head.hash {
        return Err(RejectReason::StaleOrForkedParent {
            expected: head.hash,
            found: candidate.previous_hash,
        });
    }
    if candidate.index != head.index + 1 {
        return Err(RejectReason::malformed(format!(
            "index {} does not follow head index {}",
            candidate.index, head.index
        )));
    }
    if !candidate.verify_proof_of_work(difficulty) {
        return Err(RejectReason::DifficultyNotMet { difficulty });
    }
    Ok(())
}

fn check_not_replayed(block: &Block, confirmed: &HashSet<Hash>) -> Result<(), RejectReason> {
    match block
        .transactions
        .iter()
        .position(|tx| confirmed.contains(&tx.hash))
    {
        Some(position) => Err(RejectReason::InvalidTransaction {
            position,
            detail: "transaction is already confirmed".into(),
        }),
        None => Ok(()),
    }
}

/// Full re-validation of a chain from genesis, returning the balances it
/// implies.
pub fn validate_chain(blocks: &[Block], difficulty: u32) -> Result<BalanceLedger, RejectReason> {
    let genesis = blocks
        .first()
        .ok_or_else(|| RejectReason::malformed("chain is empty"))?;
    if genesis.index != 0 || genesis.previous_hash != GENESIS_PREVIOUS_HASH {
        return Err(RejectReason::malformed(
            "first block is not a genesis block",
        ));
    }
    genesis.check_structure()?;

    let mut ledger = BalanceLedger::new();
    let mut confirmed = HashSet::new();
    ledger.apply_block(genesis)?;
    confirmed.extend(genesis.transactions.iter().map(|tx| tx.hash));

    for pair in blocks.windows(2) {
        let (head, block) = (&pair[0], &pair[1]);
        validate_successor(head, block, difficulty)?;
        check_not_replayed(block, &confirmed)?;
        ledger.apply_block(block)?;
        confirmed.extend(block.transactions.iter().map(|tx| tx.hash));
    }
    Ok(ledger)
}
