mod remote;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ledger_core::{constants::DEFAULT_MINING_REWARD, CancelFlag, Miner, MinerConfig, RetryPolicy};
use remote::RemoteWorkSource;
use serde::Serialize;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_NODE: &str = "http://127.0.0.1:3001";

#[derive(Parser, Debug)]
#[command(name = "ledger-cli")]
#[command(about = "CLI client and remote miner for a ledger node")]
struct Cli {
    /// Node base URL
    #[arg(long, global = true, default_value = DEFAULT_NODE)]
    node: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a transaction
    Submit {
        /// Sender
        #[arg(long)]
        from: String,
        /// Recipient
        #[arg(long)]
        to: String,
        /// Amount
        #[arg(long)]
        amount: u64,
    },
    /// Confirmed and tentative balance of an address
    Balance { address: String },
    /// Print the head block, or the whole chain with --full
    Chain {
        #[arg(long)]
        full: bool,
    },
    /// Node height, head and peer count
    Status,
    /// Mine blocks for the node and submit them over HTTP
    Mine {
        /// Address credited with the reward
        #[arg(long)]
        address: String,
        #[arg(long, default_value_t = DEFAULT_MINING_REWARD)]
        reward: u64,
        /// Pause between rounds, in milliseconds
        #[arg(long, default_value_t = 1_000)]
        interval_ms: u64,
        /// Search nonces on every core
        #[arg(long)]
        parallel: bool,
        /// Stop after this many accepted blocks
        #[arg(long)]
        blocks: Option<u64>,
        /// Attempts per request before a candidate is dropped
        #[arg(long, default_value_t = 5)]
        retries: u32,
    },
}

#[derive(Serialize)]
struct Tx {
    from: String,
    to: String,
    amount: u64,
}

async fn print_response(res: reqwest::Response) -> Result<()> {
    let status = res.status();
    let body = res.text().await?;
    println!("status: {}", status);
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{body}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let node = cli.node.trim_end_matches('/').to_string();
    let client = reqwest::Client::new();
    match cli.cmd {
        Command::Submit { from, to, amount } => {
            let tx = Tx { from, to, amount };
            let res = client.post(format!("{node}/transaction")).json(&tx).send().await?;
            print_response(res).await?;
        }
        Command::Balance { address } => {
            let res = client.get(format!("{node}/balance/{address}")).send().await?;
            print_response(res).await?;
        }
        Command::Chain { full } => {
            let path = if full { "blockchain" } else { "latest-block" };
            let res = client.get(format!("{node}/{path}")).send().await?;
            print_response(res).await?;
        }
        Command::Status => {
            let res = client.get(format!("{node}/status")).send().await?;
            print_response(res).await?;
        }
        Command::Mine {
            address,
            reward,
            interval_ms,
            parallel,
            blocks,
            retries,
        } => {
            let config = MinerConfig {
                reward,
                interval: Duration::from_millis(interval_ms),
                parallel,
                max_blocks: blocks,
                retry: RetryPolicy {
                    max_attempts: retries.max(1),
                    ..RetryPolicy::default()
                },
                ..MinerConfig::new(address)
            };
            let cancel = CancelFlag::new();
            let stop = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("stopping miner");
                    stop.cancel();
                }
            });
            let report = tokio::task::spawn_blocking(move || -> Result<_> {
                let source = RemoteWorkSource::new(node)?;
                Ok(Miner::new(config, cancel).run(&source))
            })
            .await??;
            println!(
                "accepted: {}, stale: {}, rejected: {}, transport failures: {}",
                report.accepted, report.stale, report.rejected, report.transport_failures
            );
        }
    }
    Ok(())
}
