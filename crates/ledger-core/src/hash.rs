use crate::constants::HASH_SIZE;
use sha2::{Digest, Sha256};

pub type Hash = [u8; HASH_SIZE];

pub(crate) fn digest(hasher: Sha256) -> Hash {
    let digest = hasher.finalize();
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(&digest[..]);
    out
}

pub fn short(hash: &Hash) -> String {
    hex::encode(&hash[..6])
}

/// Serde adapter writing a [`Hash`] as lowercase hex in every format, so the
/// JSON snapshot and the wire protocol stay human-readable.
pub mod hash_hex {
    use super::Hash;
    use crate::constants::HASH_SIZE;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &Hash, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Hash, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(D::Error::custom)?;
        if bytes.len() != HASH_SIZE {
            return Err(D::Error::invalid_length(bytes.len(), &"32 bytes of hex"));
        }
        let mut out = [0u8; HASH_SIZE];
        out.copy_from_slice(&bytes);
        Ok(out)
    }
}
