use crate::state::AppState;
use ledger_core::{Block, Miner, MinerConfig, MinerReport, MiningTemplate, SubmitError, WorkSource};
use tokio::task::JoinHandle;

/// Mines against this node's own chain. Templates and submissions each take
/// the chain lock briefly; the nonce search runs without it.
pub struct LocalWorkSource {
    state: AppState,
}

impl LocalWorkSource {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

impl WorkSource for LocalWorkSource {
    fn template(&self) -> Result<MiningTemplate, SubmitError> {
        Ok(self.state.chain.lock().mining_template())
    }

    fn submit(&self, block: &Block) -> Result<(), SubmitError> {
        self.state.submit_block(block.clone()).map_err(SubmitError::from)
    }
}

/// Run the miner on the blocking pool until the node's cancel flag fires.
pub fn spawn(state: AppState, config: MinerConfig) -> JoinHandle<MinerReport> {
    let cancel = state.cancel.clone();
    tokio::task::spawn_blocking(move || {
        let source = LocalWorkSource::new(state);
        Miner::new(config, cancel).run(&source)
    })
}
