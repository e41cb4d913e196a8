use anyhow::{anyhow, Context, Result};
use apexd_security::{decode_sha256_hex, verify_ed25519_signature, Sha256Digest};
use serde::{Deserialize, Serialize};

pub const DEFAULT_VERITY_BLOCK_SIZE: u32 = 4096;

const SIGNING_DOMAIN: &str = "apex-verity-v1";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
}

impl HashAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
        }
    }
}

/// Verified integrity parameters of a package payload.
///
/// Only produced by a successful signature check, except for `Default`,
/// which callers use as a placeholder when no verification is possible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerityData {
    pub hash_algorithm: HashAlgorithm,
    pub block_size: u32,
    pub salt: Vec<u8>,
    pub root_digest: Sha256Digest,
}

impl Default for VerityData {
    fn default() -> Self {
        Self {
            hash_algorithm: HashAlgorithm::Sha256,
            block_size: DEFAULT_VERITY_BLOCK_SIZE,
            salt: Vec::new(),
            root_digest: [0; 32],
        }
    }
}

impl VerityData {
    pub fn root_digest_hex(&self) -> String {
        hex::encode(self.root_digest)
    }
}

/// On-disk, signed form of [`VerityData`] as shipped inside a package bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerityDescriptor {
    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,
    #[serde(default = "default_block_size")]
    pub block_size: u32,
    #[serde(default)]
    pub salt: String,
    pub root_digest: String,
    #[serde(default)]
    pub signature: String,
}

impl VerityDescriptor {
    pub fn from_json_str(input: &str) -> Result<Self> {
        serde_json::from_str(input).context("failed to parse verity descriptor")
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize verity descriptor")
    }

    /// Bytes covered by `signature`.
    pub fn signing_payload(&self) -> Vec<u8> {
        [
            SIGNING_DOMAIN,
            self.hash_algorithm.as_str(),
            &self.block_size.to_string(),
            &self.salt.trim().to_ascii_lowercase(),
            &self.root_digest.trim().to_ascii_lowercase(),
        ]
        .join("\0")
        .into_bytes()
    }

    pub fn verify(&self, public_key: &[u8]) -> Result<VerityData> {
        if self.signature.trim().is_empty() {
            return Err(anyhow!("verity descriptor is not signed"));
        }
        verify_ed25519_signature(&self.signing_payload(), public_key, &self.signature)
            .context("verity descriptor signature verification failed")?;

        validate_block_size(self.block_size)?;
        let salt = hex::decode(self.salt.trim()).context("failed to decode verity salt hex")?;
        let root_digest =
            decode_sha256_hex(&self.root_digest).context("invalid verity root digest")?;

        Ok(VerityData {
            hash_algorithm: self.hash_algorithm,
            block_size: self.block_size,
            salt,
            root_digest,
        })
    }
}

pub fn validate_block_size(block_size: u32) -> Result<()> {
    if block_size < 512 || !block_size.is_power_of_two() {
        return Err(anyhow!(
            "invalid verity block size {block_size}: must be a power of two >= 512"
        ));
    }
    Ok(())
}

fn default_block_size() -> u32 {
    DEFAULT_VERITY_BLOCK_SIZE
}
