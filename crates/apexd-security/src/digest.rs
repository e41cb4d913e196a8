use anyhow::{anyhow, Context, Result};
use sha2::{Digest, Sha256};

pub const SHA256_DIGEST_LEN: usize = 32;

pub type Sha256Digest = [u8; SHA256_DIGEST_LEN];

/// Hashes `salt || block`, the per-node hash used by dm-verity style trees.
pub fn salted_sha256(salt: &[u8], block: &[u8]) -> Sha256Digest {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(block);
    hasher.finalize().into()
}

pub fn decode_sha256_hex(value: &str) -> Result<Sha256Digest> {
    let bytes = hex::decode(value.trim()).context("failed to decode SHA-256 digest hex")?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        anyhow!(
            "invalid SHA-256 digest length: expected {} bytes, got {}",
            SHA256_DIGEST_LEN,
            len
        )
    })
}
