pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;

/// Sender identity with no debit side: mining rewards and genesis grants.
pub const COINBASE: &str = "coinbase";
pub const GENESIS_MINER: &str = "genesis";
/// 2024-09-26T00:00:00Z
pub const GENESIS_TIMESTAMP_SECS: i64 = 1_727_308_800;
pub const GENESIS_PREVIOUS_HASH: [u8; HASH_SIZE] = [0u8; HASH_SIZE];

/// Leading zero hex characters required of a block hash.
pub const DEFAULT_DIFFICULTY: u32 = 3;
pub const MAX_DIFFICULTY: u32 = HASH_HEX_SIZE as u32;
pub const DEFAULT_MINING_REWARD: u64 = 10;

/// Nonces searched per rayon batch before the cancel flag is rechecked.
pub const NONCES_PER_BATCH: u64 = 1 << 16;
