//! TCP gossip: one JSON message per line, a writer task per peer fed through
//! an mpsc queue, and the chain lock taken only inside message handlers.

use crate::{
    constants::{DIAL_ATTEMPTS, DIAL_BASE_DELAY_MS, DIAL_MAX_DELAY_MS, MAX_FRAME_LEN, PEER_QUEUE_DEPTH},
    state::AppState,
};
use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use ledger_core::{Block, Chain, Message, RetryPolicy, SyncOutcome};
use ledger_storage::Store;
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc::{self, error::TrySendError},
};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PeerInfo {
    pub id: u64,
    pub addr: SocketAddr,
    pub direction: Direction,
}

struct PeerHandle {
    info: PeerInfo,
    queue: mpsc::Sender<Message>,
}

/// Live peer connections, keyed by a per-process connection id.
#[derive(Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<Mutex<HashMap<u64, PeerHandle>>>,
    next_id: Arc<AtomicU64>,
}

impl PeerRegistry {
    fn register(
        &self,
        addr: SocketAddr,
        direction: Direction,
        queue: mpsc::Sender<Message>,
    ) -> PeerInfo {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let info = PeerInfo {
            id,
            addr,
            direction,
        };
        self.peers.lock().insert(
            id,
            PeerHandle {
                info: info.clone(),
                queue,
            },
        );
        info
    }

    fn remove(&self, id: u64) {
        self.peers.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }

    pub fn list(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<_> = self.peers.lock().values().map(|p| p.info.clone()).collect();
        peers.sort_by_key(|p| p.id);
        peers
    }

    /// Queue `msg` for every peer. Never blocks: a peer whose queue is full
    /// misses this message, and one whose writer is gone is dropped.
    pub fn broadcast(&self, msg: &Message) {
        self.peers
            .lock()
            .retain(|_, peer| match peer.queue.try_send(msg.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(peer = %peer.info.addr, kind = msg.kind(), "peer queue full; message dropped");
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(peer = %peer.info.addr, "peer writer gone; unregistering");
                    false
                }
            });
    }
}

fn dial_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: DIAL_ATTEMPTS,
        base_delay: Duration::from_millis(DIAL_BASE_DELAY_MS),
        max_delay: Duration::from_millis(DIAL_MAX_DELAY_MS),
    }
}

/// Accept inbound peers until the task is dropped.
pub async fn serve(listener: TcpListener, state: AppState) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let peer = attach(stream, addr, Direction::Inbound, state.clone());
                info!(peer = %peer.addr, id = peer.id, "inbound peer connected");
            }
            Err(e) => {
                warn!("gossip accept failed: {e}");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// Dial `target`, retrying with backoff, and start gossiping with it.
pub async fn connect(state: &AppState, target: &str) -> Result<PeerInfo> {
    let policy = dial_policy();
    let mut attempt = 1;
    let stream = loop {
        match TcpStream::connect(target).await {
            Ok(stream) => break stream,
            Err(e) if attempt < policy.max_attempts => {
                let delay = policy.delay(attempt);
                warn!(peer = target, attempt, ?delay, "dial failed: {e}");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("peer transport failure: {target} unreachable after {attempt} attempts")
                })
            }
        }
    };
    let addr = stream.peer_addr().context("reading peer address")?;
    let peer = attach(stream, addr, Direction::Outbound, state.clone());
    info!(peer = %peer.addr, id = peer.id, "outbound peer connected");
    Ok(peer)
}

/// Dial every configured peer in the background. Failures are logged only.
pub fn connect_all(state: &AppState, targets: &[String]) {
    for target in targets {
        let state = state.clone();
        let target = target.clone();
        tokio::spawn(async move {
            if let Err(e) = connect(&state, &target).await {
                warn!("{e:#}");
            }
        });
    }
}

/// Register the connection, ask for the peer's head, and spawn its tasks.
fn attach(stream: TcpStream, addr: SocketAddr, direction: Direction, state: AppState) -> PeerInfo {
    let (queue, outbox) = mpsc::channel(PEER_QUEUE_DEPTH);
    let peer = state.peers.register(addr, direction, queue.clone());
    enqueue(&queue, Message::QueryLatest);
    tokio::spawn(drive(peer.clone(), stream, queue, outbox, state));
    peer
}

async fn drive(
    peer: PeerInfo,
    stream: TcpStream,
    queue: mpsc::Sender<Message>,
    mut outbox: mpsc::Receiver<Message>,
    state: AppState,
) {
    let addr = peer.addr;
    let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LEN));
    let (mut sink, mut lines) = framed.split::<String>();

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbox.recv().await {
            let line = match msg.to_line() {
                Ok(line) => line,
                Err(e) => {
                    warn!(peer = %addr, kind = msg.kind(), "could not encode message: {e}");
                    continue;
                }
            };
            debug!(peer = %addr, kind = msg.kind(), bytes = line.len(), "gossip out");
            if let Err(e) = sink.send(line).await {
                debug!(peer = %addr, "write failed: {e}");
                break;
            }
        }
    });

    while let Some(frame) = lines.next().await {
        match frame {
            Ok(line) => match Message::from_line(&line) {
                Ok(msg) => {
                    debug!(peer = %addr, kind = msg.kind(), "gossip in");
                    handle_message(&state, &queue, addr, msg).await;
                }
                Err(e) => warn!(peer = %addr, "undecodable gossip frame: {e}"),
            },
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!(peer = %addr, limit = MAX_FRAME_LEN, "oversized gossip frame dropped");
            }
            Err(LinesCodecError::Io(e)) => {
                debug!(peer = %addr, "read failed: {e}");
                break;
            }
        }
    }

    state.peers.remove(peer.id);
    writer.abort();
    info!(peer = %addr, id = peer.id, "peer disconnected");
}

fn enqueue(queue: &mpsc::Sender<Message>, msg: Message) {
    if let Err(e) = queue.try_send(msg) {
        let kind = match &e {
            TrySendError::Full(m) | TrySendError::Closed(m) => m.kind(),
        };
        warn!(kind, "reply not queued: {e}");
    }
}

/// Run `f` against the chain on the blocking pool. Validation and snapshot
/// writes happen under the lock and must not hold up the reader loops.
async fn with_chain<T, F>(state: &AppState, f: F) -> Option<T>
where
    F: FnOnce(&mut Chain<Store>) -> T + Send + 'static,
    T: Send + 'static,
{
    let chain = state.chain.clone();
    let task = tokio::task::spawn_blocking(move || {
        let mut guard = chain.lock();
        f(&mut *guard)
    });
    match task.await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("chain task failed: {e}");
            None
        }
    }
}

/// React to one inbound message. Replies go to the sending peer only;
/// announcements go to everyone.
async fn handle_message(
    state: &AppState,
    reply: &mpsc::Sender<Message>,
    addr: SocketAddr,
    msg: Message,
) {
    match msg {
        Message::QueryLatest => {
            let head = state.chain.lock().latest_block().clone();
            enqueue(reply, Message::ResponseBlockchain(vec![head]));
        }
        Message::QueryAll => {
            let blocks = state.chain.lock().blocks().to_vec();
            enqueue(reply, Message::ResponseBlockchain(blocks));
        }
        Message::ResponseBlockchain(blocks) => handle_blocks(state, reply, addr, blocks).await,
        Message::NewBlock(block) => handle_blocks(state, reply, addr, vec![block]).await,
        Message::NewTransaction(tx) => {
            let candidate = tx.clone();
            let admission = with_chain(state, move |chain| chain.admit_transaction(candidate));
            let Some(admitted) = admission.await else {
                return;
            };
            match admitted {
                Ok(true) => state.peers.broadcast(&Message::NewTransaction(tx)),
                Ok(false) => debug!(peer = %addr, "transaction already known"),
                Err(e) => warn!(peer = %addr, "gossiped transaction refused: {e}"),
            }
        }
    }
}

async fn handle_blocks(
    state: &AppState,
    reply: &mpsc::Sender<Message>,
    addr: SocketAddr,
    blocks: Vec<Block>,
) {
    let received = blocks.len();
    let Some(outcome) = with_chain(state, move |chain| chain.receive_blocks(blocks)).await else {
        return;
    };
    match outcome {
        SyncOutcome::Ignored => debug!(peer = %addr, received, "peer is not ahead"),
        SyncOutcome::Appended(head) | SyncOutcome::Replaced(head) => {
            state
                .peers
                .broadcast(&Message::ResponseBlockchain(vec![head]));
        }
        SyncOutcome::NeedFullChain => {
            debug!(peer = %addr, "peer is ahead; requesting full chain");
            enqueue(reply, Message::QueryAll);
        }
        SyncOutcome::Rejected(reason) => {
            warn!(peer = %addr, code = reason.code(), "peer blocks rejected: {reason}");
        }
    }
}
