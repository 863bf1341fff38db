use crate::p2p::PeerRegistry;
use ledger_core::{
    hash::short, Amount, Block, Chain, CancelFlag, Message, RejectReason, Transaction,
    TransactionError,
};
use ledger_storage::Store;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

pub type SharedChain = Arc<Mutex<Chain<Store>>>;

/// Handles shared by the HTTP API, the gossip tasks and the local miner.
#[derive(Clone)]
pub struct AppState {
    pub chain: SharedChain,
    pub peers: PeerRegistry,
    pub cancel: CancelFlag,
}

impl AppState {
    pub fn new(chain: Chain<Store>) -> Self {
        Self {
            chain: Arc::new(Mutex::new(chain)),
            peers: PeerRegistry::default(),
            cancel: CancelFlag::new(),
        }
    }

    /// Append a block produced on this node (API submission or local miner)
    /// and announce it to every peer.
    pub fn submit_block(&self, block: Block) -> Result<(), RejectReason> {
        self.chain.lock().append(block.clone())?;
        info!(
            index = block.index,
            hash = %short(&block.hash),
            peers = self.peers.len(),
            "announcing new block"
        );
        self.peers.broadcast(&Message::NewBlock(block));
        Ok(())
    }

    /// Admit a transfer into the pending pool and gossip it.
    pub fn submit_transaction(
        &self,
        from: &str,
        to: &str,
        amount: Amount,
    ) -> Result<Transaction, TransactionError> {
        let tx = self.chain.lock().create_transaction(from, to, amount)?;
        self.peers.broadcast(&Message::NewTransaction(tx.clone()));
        Ok(tx)
    }
}
