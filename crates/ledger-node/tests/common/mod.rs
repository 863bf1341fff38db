#![allow(dead_code)]

use ledger_node::{NodeConfig, RunningNode};
use ledger_core::{ChainConfig, MinerConfig};
use ledger_storage::StoreKind;
use std::{path::Path, time::Duration};

pub fn test_config(data_dir: &Path, peers: Vec<String>, miner: Option<MinerConfig>) -> NodeConfig {
    NodeConfig {
        http_listen: "127.0.0.1:0".parse().expect("valid addr"),
        p2p_listen: "127.0.0.1:0".parse().expect("valid addr"),
        data_dir: data_dir.to_path_buf(),
        store: StoreKind::Json,
        peers,
        chain: ChainConfig {
            difficulty: 1,
            genesis_grants: vec![("alice".to_string(), 100)],
        },
        miner,
    }
}

pub fn base_url(node: &RunningNode) -> String {
    format!("http://{}", node.http_addr)
}

/// Poll `check` until it holds or `secs` elapse.
pub async fn eventually(secs: u64, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(secs);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
