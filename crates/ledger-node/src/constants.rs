pub(crate) const DEFAULT_HTTP_LISTEN: &str = "127.0.0.1:3001";
pub(crate) const DEFAULT_P2P_LISTEN: &str = "127.0.0.1:6001";
pub(crate) const DEFAULT_DATA_DIR: &str = "./data";

/// Longest gossip frame accepted; a full chain is sent as one line.
pub(crate) const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
/// Outbound messages queued per peer before broadcasts to it are dropped.
pub(crate) const PEER_QUEUE_DEPTH: usize = 256;

pub(crate) const DIAL_ATTEMPTS: u32 = 5;
pub(crate) const DIAL_BASE_DELAY_MS: u64 = 200;
pub(crate) const DIAL_MAX_DELAY_MS: u64 = 3_000;
