use crate::constants::{DEFAULT_DATA_DIR, DEFAULT_HTTP_LISTEN, DEFAULT_P2P_LISTEN};
use anyhow::{bail, Context, Result};
use clap::Parser;
use ledger_core::{
    constants::{DEFAULT_DIFFICULTY, DEFAULT_MINING_REWARD, MAX_DIFFICULTY},
    Address, Amount, ChainConfig, MinerConfig,
};
use ledger_storage::StoreKind;
use std::{net::SocketAddr, path::PathBuf, time::Duration};

#[derive(Parser, Debug, Clone)]
#[command(name = "ledger-node")]
#[command(about = "Proof-of-work ledger node with HTTP API and TCP gossip")]
pub struct Args {
    /// HTTP API address, e.g. 127.0.0.1:3001
    #[arg(long, default_value = DEFAULT_HTTP_LISTEN)]
    pub listen: SocketAddr,

    /// Gossip listener address
    #[arg(long, default_value = DEFAULT_P2P_LISTEN)]
    pub p2p_listen: SocketAddr,

    /// Directory holding the chain and balance snapshots
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// Snapshot backend: json or sled
    #[arg(long, default_value = "json")]
    pub store: StoreKind,

    /// Leading zero hex digits required of every block hash
    #[arg(long, default_value_t = DEFAULT_DIFFICULTY)]
    pub difficulty: u32,

    /// Peers to dial at startup (host:port), repeatable
    #[arg(long = "peer")]
    pub peers: Vec<String>,

    /// Run the built-in miner
    #[arg(long)]
    pub mine: bool,

    /// Address credited with mining rewards
    #[arg(long, default_value = "node-miner")]
    pub miner_address: String,

    /// Coinbase reward per mined block
    #[arg(long, default_value_t = DEFAULT_MINING_REWARD)]
    pub reward: u64,

    /// Pause between mining rounds, in milliseconds
    #[arg(long, default_value_t = 3_000)]
    pub mine_interval_ms: u64,

    /// Search nonces on every core
    #[arg(long)]
    pub parallel: bool,

    /// Genesis credit as address=amount, repeatable
    #[arg(long = "grant", value_parser = parse_grant)]
    pub grants: Vec<(Address, Amount)>,
}

/// Everything `node::start` needs, resolved from the command line.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub http_listen: SocketAddr,
    pub p2p_listen: SocketAddr,
    pub data_dir: PathBuf,
    pub store: StoreKind,
    pub peers: Vec<String>,
    pub chain: ChainConfig,
    pub miner: Option<MinerConfig>,
}

impl NodeConfig {
    pub fn from_args(args: Args) -> Result<Self> {
        if args.difficulty > MAX_DIFFICULTY {
            bail!("difficulty {} exceeds the maximum of {MAX_DIFFICULTY}", args.difficulty);
        }
        let miner = args.mine.then(|| MinerConfig {
            reward: args.reward,
            interval: Duration::from_millis(args.mine_interval_ms),
            parallel: args.parallel,
            ..MinerConfig::new(args.miner_address.clone())
        });
        if let Some(miner) = &miner {
            if miner.address.trim().is_empty() {
                bail!("--miner-address must not be empty when mining");
            }
        }
        Ok(Self {
            http_listen: args.listen,
            p2p_listen: args.p2p_listen,
            data_dir: args.data_dir,
            store: args.store,
            peers: args.peers,
            chain: ChainConfig {
                difficulty: args.difficulty,
                genesis_grants: args.grants,
            },
            miner,
        })
    }
}

pub fn parse_grant(s: &str) -> Result<(Address, Amount)> {
    let (address, amount) = s
        .split_once('=')
        .with_context(|| format!("grant `{s}` is not address=amount"))?;
    let address = address.trim();
    if address.is_empty() {
        bail!("grant `{s}` has an empty address");
    }
    let amount = amount
        .trim()
        .parse::<Amount>()
        .with_context(|| format!("grant `{s}` has an invalid amount"))?;
    Ok((address.to_string(), amount))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_parse() {
        assert_eq!(parse_grant("alice=100").unwrap(), ("alice".to_string(), 100));
        assert_eq!(parse_grant(" bob = 7 ").unwrap(), ("bob".to_string(), 7));
        assert!(parse_grant("alice").is_err());
        assert!(parse_grant("=5").is_err());
        assert!(parse_grant("alice=-1").is_err());
    }

    #[test]
    fn args_resolve_to_config() {
        let args = Args::parse_from([
            "ledger-node",
            "--store",
            "sled",
            "--difficulty",
            "2",
            "--peer",
            "127.0.0.1:6002",
            "--grant",
            "alice=50",
            "--mine",
            "--miner-address",
            "m1",
        ]);
        let config = NodeConfig::from_args(args).unwrap();
        assert_eq!(config.store, StoreKind::Sled);
        assert_eq!(config.chain.difficulty, 2);
        assert_eq!(config.chain.genesis_grants, vec![("alice".to_string(), 50)]);
        assert_eq!(config.peers, vec!["127.0.0.1:6002".to_string()]);
        let miner = config.miner.unwrap();
        assert_eq!(miner.address, "m1");
        assert_eq!(miner.reward, DEFAULT_MINING_REWARD);
    }

    #[test]
    fn miner_is_off_by_default() {
        let config = NodeConfig::from_args(Args::parse_from(["ledger-node"])).unwrap();
        assert!(config.miner.is_none());
        assert_eq!(config.store, StoreKind::Json);
    }

    #[test]
    fn oversized_difficulty_is_refused() {
        let args = Args::parse_from(["ledger-node", "--difficulty", "65"]);
        assert!(NodeConfig::from_args(args).is_err());
    }
}
