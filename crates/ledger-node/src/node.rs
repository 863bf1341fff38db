use crate::{api, config::NodeConfig, miner, p2p, state::AppState};
use anyhow::{Context, Result};
use ledger_core::{hash::short, Chain, MinerReport};
use ledger_storage::Store;
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, sync::watch, task::JoinHandle};
use tracing::{info, warn};

/// A started node: listeners bound, gossip and (optionally) mining running.
pub struct RunningNode {
    pub state: AppState,
    pub http_addr: SocketAddr,
    pub p2p_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    http: JoinHandle<()>,
    gossip: JoinHandle<()>,
    miner: Option<JoinHandle<MinerReport>>,
}

pub async fn start(config: NodeConfig) -> Result<RunningNode> {
    let store = Store::open(config.store, &config.data_dir)
        .with_context(|| format!("opening {} store in {}", config.store, config.data_dir.display()))?;
    let chain = Chain::open(Arc::new(store), config.chain.clone())
        .context("restoring the chain")?;
    info!(
        height = chain.height(),
        head = %short(&chain.latest_block().hash),
        difficulty = chain.difficulty(),
        store = %config.store,
        "chain ready"
    );
    let state = AppState::new(chain);

    let p2p_listener = TcpListener::bind(config.p2p_listen)
        .await
        .with_context(|| format!("binding gossip listener on {}", config.p2p_listen))?;
    let p2p_addr = p2p_listener.local_addr()?;
    let gossip = tokio::spawn(p2p::serve(p2p_listener, state.clone()));
    info!("gossip listening on {p2p_addr}");

    let http_listener = TcpListener::bind(config.http_listen)
        .await
        .with_context(|| format!("binding HTTP listener on {}", config.http_listen))?;
    let http_addr = http_listener.local_addr()?;
    let (shutdown, mut stop) = watch::channel(false);
    let app = api::router(state.clone());
    let http = tokio::spawn(async move {
        let served = axum::serve(http_listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop.wait_for(|stopped| *stopped).await;
            })
            .await;
        if let Err(e) = served {
            warn!("HTTP server stopped: {e}");
        }
    });
    info!("ledger-node listening on http://{http_addr}");

    p2p::connect_all(&state, &config.peers);

    let miner = config.miner.clone().map(|miner_config| {
        info!(address = %miner_config.address, "starting local miner");
        miner::spawn(state.clone(), miner_config)
    });

    Ok(RunningNode {
        state,
        http_addr,
        p2p_addr,
        shutdown,
        http,
        gossip,
        miner,
    })
}

impl RunningNode {
    /// Stop mining, drain the HTTP server and drop gossip connections.
    pub async fn shutdown(self) -> Option<MinerReport> {
        self.state.cancel.cancel();
        let _ = self.shutdown.send(true);
        let report = match self.miner {
            Some(handle) => match handle.await {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!("miner task failed: {e}");
                    None
                }
            },
            None => None,
        };
        if let Err(e) = self.http.await {
            warn!("HTTP task failed: {e}");
        }
        self.gossip.abort();
        info!("node stopped");
        report
    }
}
