#![allow(dead_code)]

use ledger_core::{Block, CancelFlag, Transaction};
use ledger_storage::{JsonStore, SledStore};
use rand::Rng;
use tempfile::{tempdir, TempDir};

pub fn create_temp_sled() -> (TempDir, SledStore) {
    // Create a temporary directory for the sled database
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let store = SledStore::open(temp_dir.path()).expect("Failed to open SledStore");
    (temp_dir, store)
}

pub fn create_temp_json() -> (TempDir, JsonStore) {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let store = JsonStore::open(temp_dir.path()).expect("Failed to open JsonStore");
    (temp_dir, store)
}

/// A linked, mined chain of `len` blocks (genesis included) carrying random
/// coinbase rewards.
pub fn sample_chain(len: usize) -> Vec<Block> {
    let mut rng = rand::thread_rng();
    let mut blocks = vec![Block::genesis(&[("alice".to_string(), 100)])];
    while blocks.len() < len {
        let head = blocks.last().expect("genesis present");
        let reward = Transaction::coinbase(format!("miner-{}", rng.gen_range(0..4)), rng.gen_range(1..50));
        let mut block = Block::create(head.index + 1, chrono::Utc::now(), vec![reward], head.hash, "miner");
        assert!(block.mine(1, &CancelFlag::new()));
        blocks.push(block);
    }
    blocks
}
