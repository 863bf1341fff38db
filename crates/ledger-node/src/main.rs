use clap::Parser;
use ledger_node::{Args, NodeConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = NodeConfig::from_args(Args::parse())?;
    let node = ledger_node::start(config).await?;

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    if let Some(report) = node.shutdown().await {
        info!(
            accepted = report.accepted,
            stale = report.stale,
            rejected = report.rejected,
            "miner summary"
        );
    }
    Ok(())
}
