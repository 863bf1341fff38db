use crate::{
    block::Block,
    constants::DEFAULT_MINING_REWARD,
    error::SubmitError,
    hash::{hash_hex, short, Hash},
    pow::CancelFlag,
    transaction::{now_millis, Transaction},
};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Everything a miner needs to build a block on top of the current head.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MiningTemplate {
    pub index: u64,
    #[serde(with = "hash_hex")]
    pub previous_hash: Hash,
    pub difficulty: u32,
    pub transactions: Vec<Transaction>,
}

impl MiningTemplate {
    /// Unmined candidate: an optional coinbase reward followed by the
    /// template's transactions. With nothing pending and no reward the block
    /// is empty.
    pub fn candidate(&self, miner_address: &str, reward: u64) -> Block {
        let mut txs = Vec::with_capacity(self.transactions.len() + 1);
        if reward > 0 {
            txs.push(Transaction::coinbase(miner_address, reward));
        }
        txs.extend(self.transactions.iter().cloned());
        Block::create(self.index, now_millis(), txs, self.previous_hash, miner_address)
    }
}

/// Where templates come from and mined blocks go: the local chain, or a
/// remote node over HTTP.
pub trait WorkSource {
    fn template(&self) -> Result<MiningTemplate, SubmitError>;
    fn submit(&self, block: &Block) -> Result<(), SubmitError>;
}

/// Exponential backoff for transport failures.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Clone, Debug)]
pub struct MinerConfig {
    pub address: String,
    pub reward: u64,
    /// Pause between rounds after a block is accepted or refused.
    pub interval: Duration,
    pub retry: RetryPolicy,
    pub parallel: bool,
    /// Stop after this many accepted blocks.
    pub max_blocks: Option<u64>,
}

impl MinerConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            reward: DEFAULT_MINING_REWARD,
            interval: Duration::from_secs(3),
            retry: RetryPolicy::default(),
            parallel: false,
            max_blocks: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MinerState {
    Idle,
    Searching,
    Submitting,
    Retrying { attempt: u32 },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MinerReport {
    pub accepted: u64,
    pub stale: u64,
    pub rejected: u64,
    pub transport_failures: u64,
}

pub struct Miner {
    config: MinerConfig,
    cancel: CancelFlag,
    state: MinerState,
}

const PAUSE_SLICE: Duration = Duration::from_millis(50);

impl Miner {
    pub fn new(config: MinerConfig, cancel: CancelFlag) -> Self {
        Self {
            config,
            cancel,
            state: MinerState::Idle,
        }
    }

    pub fn state(&self) -> MinerState {
        self.state
    }

    /// Mine until cancelled (or `max_blocks` are accepted). Blocking; run it
    /// on a dedicated thread.
    pub fn run<W: WorkSource>(&mut self, source: &W) -> MinerReport {
        let mut report = MinerReport::default();
        info!(
            address = %self.config.address,
            parallel = self.config.parallel,
            "miner started"
        );

        while !self.cancel.is_cancelled() {
            if let Some(max) = self.config.max_blocks {
                if report.accepted >= max {
                    break;
                }
            }

            self.state = MinerState::Idle;
            let template = match self.with_retry(&mut report, || source.template()) {
                Ok(template) => template,
                Err(e) => {
                    warn!("no mining template: {e}");
                    if !self.pause(self.config.interval) {
                        break;
                    }
                    continue;
                }
            };

            self.state = MinerState::Searching;
            let mut block = template.candidate(&self.config.address, self.config.reward);
            let started = Instant::now();
            let found = if self.config.parallel {
                block.mine_parallel(template.difficulty, &self.cancel)
            } else {
                block.mine(template.difficulty, &self.cancel)
            };
            if !found {
                break;
            }
            debug!(
                index = block.index,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "candidate mined"
            );

            self.state = MinerState::Submitting;
            match self.with_retry(&mut report, || source.submit(&block)) {
                Ok(()) => {
                    report.accepted += 1;
                    info!(
                        index = block.index,
                        nonce = block.nonce,
                        hash = %short(&block.hash),
                        "mined block accepted"
                    );
                }
                Err(e) if e.is_stale() => {
                    report.stale += 1;
                    info!(index = block.index, "head moved while mining; restarting");
                    continue;
                }
                Err(SubmitError::Rejected(reason)) => {
                    report.rejected += 1;
                    warn!(index = block.index, "mined block refused: {reason}");
                }
                Err(SubmitError::Transport(e)) => {
                    warn!(index = block.index, "dropping mined block after retries: {e}");
                }
            }
            if !self.pause(self.config.interval) {
                break;
            }
        }

        self.state = MinerState::Idle;
        info!(?report, "miner stopped");
        report
    }

    /// Run `op`, retrying transport failures with backoff. Rejections are
    /// returned immediately.
    fn with_retry<T>(
        &mut self,
        report: &mut MinerReport,
        mut op: impl FnMut() -> Result<T, SubmitError>,
    ) -> Result<T, SubmitError> {
        let resume = self.state;
        let mut attempt = 1;
        loop {
            match op() {
                Err(SubmitError::Transport(e)) => {
                    report.transport_failures += 1;
                    if attempt >= self.config.retry.max_attempts {
                        self.state = resume;
                        return Err(SubmitError::Transport(e));
                    }
                    let delay = self.config.retry.delay(attempt);
                    debug!(attempt, ?delay, "transport failure, retrying: {e}");
                    self.state = MinerState::Retrying { attempt };
                    if !self.pause(delay) {
                        return Err(SubmitError::Transport("cancelled".into()));
                    }
                    attempt += 1;
                }
                other => {
                    self.state = resume;
                    return other;
                }
            }
        }
    }

    /// Sleep in short slices so cancellation is noticed promptly. Returns
    /// `false` if cancelled.
    fn pause(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(PAUSE_SLICE.min(deadline - now));
        }
    }
}
