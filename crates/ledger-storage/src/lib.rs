pub mod json_store;
pub mod sled_store;

use anyhow::Result;
use ledger_core::{Address, Amount, Block, ChainStore};
use std::{collections::BTreeMap, fmt, path::Path, str::FromStr};

pub use json_store::JsonStore;
pub use sled_store::SledStore;

/// Which backend holds the snapshots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StoreKind {
    #[default]
    Json,
    Sled,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(StoreKind::Json),
            "sled" => Ok(StoreKind::Sled),
            other => Err(format!("unknown store backend `{other}` (expected json or sled)")),
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StoreKind::Json => "json",
            StoreKind::Sled => "sled",
        })
    }
}

/// A backend picked at runtime.
pub enum Store {
    Json(JsonStore),
    Sled(SledStore),
}

impl Store {
    pub fn open<P: AsRef<Path>>(kind: StoreKind, dir: P) -> Result<Self> {
        Ok(match kind {
            StoreKind::Json => Store::Json(JsonStore::open(dir)?),
            StoreKind::Sled => Store::Sled(SledStore::open(dir)?),
        })
    }

    pub fn kind(&self) -> StoreKind {
        match self {
            Store::Json(_) => StoreKind::Json,
            Store::Sled(_) => StoreKind::Sled,
        }
    }

    fn inner(&self) -> &dyn ChainStore {
        match self {
            Store::Json(s) => s,
            Store::Sled(s) => s,
        }
    }
}

impl ChainStore for Store {
    fn load_chain(&self) -> Result<Option<Vec<Block>>> {
        self.inner().load_chain()
    }

    fn save_chain(&self, blocks: &[Block]) -> Result<()> {
        self.inner().save_chain(blocks)
    }

    fn load_balances(&self) -> Result<Option<BTreeMap<Address, Amount>>> {
        self.inner().load_balances()
    }

    fn save_balances(&self, balances: &BTreeMap<Address, Amount>) -> Result<()> {
        self.inner().save_balances(balances)
    }

    fn set_aside_chain(&self) -> Result<()> {
        self.inner().set_aside_chain()
    }
}
