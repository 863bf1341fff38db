pub mod api;
pub mod config;
mod constants;
pub mod miner;
pub mod node;
pub mod p2p;
pub mod state;

pub use config::{Args, NodeConfig};
pub use node::{start, RunningNode};
pub use state::AppState;
