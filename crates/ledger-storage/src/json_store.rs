//! Human-readable snapshots: `chain.json` and `balances.json` in one
//! directory.

use anyhow::{Context, Result};
use ledger_core::{Address, Amount, Block, ChainStore};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    io::{BufWriter, ErrorKind, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

pub const CHAIN_FILE: &str = "chain.json";
pub const BALANCES_FILE: &str = "balances.json";
/// Where a chain snapshot that failed to load is moved.
pub const REJECTED_CHAIN_FILE: &str = "chain.json.rejected";

#[derive(Clone, Debug)]
pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating data directory {}", dir.display()))?;
        info!(dir = %dir.display(), "json store opened");
        Ok(Self { dir })
    }

    fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.dir.join(name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        let value = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(value))
    }

    /// Replace `name` atomically: a crash leaves either the old file or the
    /// new one, never a torn write.
    fn write<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.dir.join(name);
        let tmp = NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("creating temp file in {}", self.dir.display()))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer_pretty(&mut writer, value)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&path)
            .with_context(|| format!("replacing {}", path.display()))?;
        debug!(file = %path.display(), "snapshot written");
        Ok(())
    }
}

impl ChainStore for JsonStore {
    fn load_chain(&self) -> Result<Option<Vec<Block>>> {
        self.read(CHAIN_FILE)
    }

    fn save_chain(&self, blocks: &[Block]) -> Result<()> {
        self.write(CHAIN_FILE, blocks)
    }

    fn load_balances(&self) -> Result<Option<BTreeMap<Address, Amount>>> {
        self.read(BALANCES_FILE)
    }

    fn save_balances(&self, balances: &BTreeMap<Address, Amount>) -> Result<()> {
        self.write(BALANCES_FILE, balances)
    }

    fn set_aside_chain(&self) -> Result<()> {
        let from = self.dir.join(CHAIN_FILE);
        let to = self.dir.join(REJECTED_CHAIN_FILE);
        match fs::rename(&from, &to) {
            Ok(()) => {
                warn!(file = %to.display(), "chain snapshot moved aside");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("moving {} aside", from.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_files_load_as_none() -> Result<()> {
        let dir = tempdir()?;
        let store = JsonStore::open(dir.path().join("nested"))?;
        assert!(store.load_chain()?.is_none());
        assert!(store.load_balances()?.is_none());
        Ok(())
    }

    #[test]
    fn corrupt_file_is_an_error() -> Result<()> {
        let dir = tempdir()?;
        let store = JsonStore::open(dir.path())?;
        fs::write(dir.path().join(CHAIN_FILE), b"[{\"index\":")?;
        assert!(store.load_chain().is_err());
        Ok(())
    }

    #[test]
    fn set_aside_moves_the_chain_file() -> Result<()> {
        let dir = tempdir()?;
        let store = JsonStore::open(dir.path())?;
        store.set_aside_chain()?;

        fs::write(dir.path().join(CHAIN_FILE), b"not json")?;
        store.set_aside_chain()?;
        assert!(store.load_chain()?.is_none());
        assert_eq!(fs::read(dir.path().join(REJECTED_CHAIN_FILE))?, b"not json");
        Ok(())
    }

    #[test]
    fn balances_file_is_an_address_map() -> Result<()> {
        let dir = tempdir()?;
        let store = JsonStore::open(dir.path())?;
        store.save_balances(&BTreeMap::from([("alice".to_string(), 5)]))?;
        let text = fs::read_to_string(dir.path().join(BALANCES_FILE))?;
        let parsed: serde_json::Value = serde_json::from_str(&text)?;
        assert_eq!(parsed, serde_json::json!({ "alice": 5 }));
        Ok(())
    }
}
