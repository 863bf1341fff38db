use anyhow::{anyhow, Context, Result};
use ledger_core::{Address, Amount, Block, ChainStore, Hash};
use sled::{
  transaction::{ConflictableTransactionError, Transactional},
  Batch, Db, Tree,
};
use std::{collections::BTreeMap, path::Path};
use tracing::{debug, info, warn};

const TREE_BLOCKS: &str = "blocks";
const TREE_BALANCES: &str = "balances";
const TREE_REJECTED: &str = "rejected_blocks";
const KEY_TIP_HEIGHT: &[u8] = b"tip_height";
const KEY_TIP_HASH: &[u8] = b"tip_hash";
const KEY_BALANCES_SAVED: &[u8] = b"balances_saved";

#[derive(Clone)]
pub struct SledStore {
  db: Db,
  blocks: Tree,
  balances: Tree,
  rejected: Tree,
}

impl SledStore {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
    let path = path.as_ref();
    let db = sled::open(path).with_context(|| format!("opening sled at {}", path.display()))?;
    let blocks = db.open_tree(TREE_BLOCKS)?;
    let balances = db.open_tree(TREE_BALANCES)?;
    let rejected = db.open_tree(TREE_REJECTED)?;
    info!(path = %path.display(), "sled store opened");
    Ok(Self {
      db,
      blocks,
      balances,
      rejected,
    })
  }

  pub fn tip_height(&self) -> Result<Option<u64>> {
    self
      .db
      .get(KEY_TIP_HEIGHT)?
      .map(|v| decode_u64(&v))
      .transpose()
  }

  pub fn tip_hash(&self) -> Result<Option<Hash>> {
    self
      .db
      .get(KEY_TIP_HASH)?
      .map(|v| {
        <Hash>::try_from(v.as_ref()).map_err(|_| anyhow!("tip hash has {} bytes", v.len()))
      })
      .transpose()
  }

  pub fn get_block(&self, index: u64) -> Result<Option<Block>> {
    self
      .blocks
      .get(index.to_be_bytes())?
      .map(|v| bincode::deserialize(&v).with_context(|| format!("decoding block {index}")))
      .transpose()
  }

  pub fn flush(&self) -> Result<()> {
    self.db.flush()?;
    Ok(())
  }
}

fn decode_u64(bytes: &[u8]) -> Result<u64> {
  let arr: [u8; 8] = bytes
    .try_into()
    .map_err(|_| anyhow!("expected 8 bytes, found {}", bytes.len()))?;
  Ok(u64::from_be_bytes(arr))
}

fn commit<F>(trees: (&Tree, &Tree), f: F) -> Result<()>
where
  F: Fn(
    &sled::transaction::TransactionalTree,
    &sled::transaction::TransactionalTree,
  ) -> Result<(), ConflictableTransactionError<()>>,
{
  trees
    .transaction(|(data, meta)| f(data, meta))
    .map_err(|e| anyhow!("sled transaction failed: {e:?}"))
}

impl ChainStore for SledStore {
  fn load_chain(&self) -> Result<Option<Vec<Block>>> {
    let mut blocks = Vec::new();
    for (expected, entry) in self.blocks.iter().enumerate() {
      let (key, value) = entry?;
      let index = decode_u64(&key)?;
      if index != expected as u64 {
        return Err(anyhow!("block {expected} missing from sled (found {index})"));
      }
      let block: Block =
        bincode::deserialize(&value).with_context(|| format!("decoding block {index}"))?;
      blocks.push(block);
    }
    Ok(if blocks.is_empty() { None } else { Some(blocks) })
  }

  /// Rewrites the whole chain in one transaction, dropping any indices past
  /// the new tip.
  fn save_chain(&self, blocks: &[Block]) -> Result<()> {
    let mut batch = Batch::default();
    for block in blocks {
      batch.insert(block.index.to_be_bytes().to_vec(), bincode::serialize(block)?);
    }
    let len = blocks.len() as u64;
    for key in self.blocks.range(len.to_be_bytes()..).keys() {
      batch.remove(key?);
    }
    let tip = blocks.last().map(|b| (b.index, b.hash));

    commit((&self.blocks, &*self.db), |data, meta| {
      data.apply_batch(&batch)?;
      match tip {
        Some((height, hash)) => {
          meta.insert(KEY_TIP_HEIGHT, height.to_be_bytes().to_vec())?;
          meta.insert(KEY_TIP_HASH, hash.to_vec())?;
        }
        None => {
          meta.remove(KEY_TIP_HEIGHT)?;
          meta.remove(KEY_TIP_HASH)?;
        }
      }
      Ok(())
    })?;
    self.flush()?;
    debug!(blocks = blocks.len(), "chain written to sled");
    Ok(())
  }

  fn load_balances(&self) -> Result<Option<BTreeMap<Address, Amount>>> {
    if !self.db.contains_key(KEY_BALANCES_SAVED)? {
      return Ok(None);
    }
    let mut balances = BTreeMap::new();
    for entry in self.balances.iter() {
      let (key, value) = entry?;
      let address = String::from_utf8(key.to_vec()).context("balance key is not utf-8")?;
      balances.insert(address, decode_u64(&value)?);
    }
    Ok(Some(balances))
  }

  fn save_balances(&self, balances: &BTreeMap<Address, Amount>) -> Result<()> {
    let mut batch = Batch::default();
    for key in self.balances.iter().keys() {
      let key = key?;
      if !balances.contains_key(String::from_utf8_lossy(&key).as_ref()) {
        batch.remove(key);
      }
    }
    for (address, amount) in balances {
      batch.insert(address.as_bytes(), amount.to_be_bytes().to_vec());
    }

    commit((&self.balances, &*self.db), |data, meta| {
      data.apply_batch(&batch)?;
      meta.insert(KEY_BALANCES_SAVED, vec![1u8])?;
      Ok(())
    })?;
    self.flush()
  }

  /// Copies the raw block entries into `rejected_blocks` (replacing any
  /// earlier rejection), then empties `blocks`.
  fn set_aside_chain(&self) -> Result<()> {
    let mut copy = Batch::default();
    for key in self.rejected.iter().keys() {
      copy.remove(key?);
    }
    let mut moved = 0usize;
    for entry in self.blocks.iter() {
      let (key, value) = entry?;
      copy.insert(key, value);
      moved += 1;
    }
    if moved == 0 {
      return Ok(());
    }
    self.rejected.apply_batch(copy)?;
    self.flush()?;
    self.save_chain(&[])?;
    warn!(blocks = moved, tree = TREE_REJECTED, "chain snapshot moved aside");
    Ok(())
  }
}
