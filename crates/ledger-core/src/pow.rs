use crate::{constants::NONCES_PER_BATCH, hash::Hash};
use rayon::prelude::*;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Number of leading `'0'` characters in the hex rendering of `hash`.
pub fn count_leading_zero_digits(hash: &Hash) -> u32 {
    let mut total = 0u32;
    for b in hash {
        if *b == 0 {
            total += 2;
        } else {
            if *b >> 4 == 0 {
                total += 1;
            }
            break;
        }
    }
    total
}

pub fn meets_difficulty(hash: &Hash, difficulty: u32) -> bool {
    count_leading_zero_digits(hash) >= difficulty
}

/// Shared stop signal for nonce searches and the mining loop.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Walk nonces upward from `start` until `hash_at(nonce)` meets `difficulty`.
/// Returns `None` when cancelled or the nonce space runs out.
pub fn search_nonce<F>(start: u64, difficulty: u32, cancel: &CancelFlag, hash_at: F) -> Option<(u64, Hash)>
where
    F: Fn(u64) -> Hash,
{
    let mut nonce = start;
    loop {
        let hash = hash_at(nonce);
        if meets_difficulty(&hash, difficulty) {
            return Some((nonce, hash));
        }
        if nonce % 4096 == 0 && cancel.is_cancelled() {
            return None;
        }
        nonce = nonce.checked_add(1)?;
    }
}

/// Parallel variant of [`search_nonce`]. Work is split into batches of
/// `NONCES_PER_BATCH` and each batch yields its lowest satisfying nonce, so the
/// result is the same nonce the sequential search finds.
pub fn search_nonce_parallel<F>(
    start: u64,
    difficulty: u32,
    cancel: &CancelFlag,
    hash_at: F,
) -> Option<(u64, Hash)>
where
    F: Fn(u64) -> Hash + Sync,
{
    let mut batch_start = start;
    loop {
        if cancel.is_cancelled() {
            return None;
        }
        let batch_end = batch_start.saturating_add(NONCES_PER_BATCH);
        let found = (batch_start..batch_end)
            .into_par_iter()
            .find_first(|nonce| meets_difficulty(&hash_at(*nonce), difficulty));
        if let Some(nonce) = found {
            return Some((nonce, hash_at(nonce)));
        }
        if batch_end == u64::MAX {
            return None;
        }
        batch_start = batch_end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    fn toy_hash(nonce: u64) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(b"toy header");
        hasher.update(nonce.to_le_bytes());
        crate::hash::digest(hasher)
    }

    #[test]
    fn leading_zero_digit_examples() {
        let mut h = [0u8; 32];
        assert_eq!(count_leading_zero_digits(&h), 64);
        h[0] = 0x0F;
        assert_eq!(count_leading_zero_digits(&h), 1);
        h[0] = 0xF0;
        assert_eq!(count_leading_zero_digits(&h), 0);
        h = [0u8; 32];
        h[1] = 0x80;
        assert_eq!(count_leading_zero_digits(&h), 2);
        h[1] = 0x08;
        assert_eq!(count_leading_zero_digits(&h), 3);
        assert!(meets_difficulty(&h, 3));
        assert!(!meets_difficulty(&h, 4));
    }

    #[test]
    fn parallel_search_matches_sequential() {
        let cancel = CancelFlag::new();
        let seq = search_nonce(0, 3, &cancel, toy_hash).unwrap();
        let par = search_nonce_parallel(0, 3, &cancel, toy_hash).unwrap();
        assert_eq!(seq, par);
        assert!(meets_difficulty(&seq.1, 3));
    }

    #[test]
    fn cancelled_search_gives_up() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        // Difficulty 64 is unreachable, so only cancellation can end these.
        assert!(search_nonce(0, 64, &cancel, toy_hash).is_none());
        assert!(search_nonce_parallel(0, 64, &cancel, toy_hash).is_none());
    }
}
