use anyhow::{anyhow, Context, Result};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

pub const ED25519_PUBLIC_KEY_LEN: usize = 32;

pub fn parse_ed25519_public_key(bytes: &[u8]) -> Result<VerifyingKey> {
    let key: [u8; ED25519_PUBLIC_KEY_LEN] = bytes.try_into().map_err(|_| {
        anyhow!(
            "invalid Ed25519 public key length: expected {} bytes, got {}",
            ED25519_PUBLIC_KEY_LEN,
            bytes.len()
        )
    })?;
    VerifyingKey::from_bytes(&key).context("invalid Ed25519 public key bytes")
}

/// Fails unless `signature_hex` is a valid signature of `payload` under `public_key`.
pub fn verify_ed25519_signature(payload: &[u8], public_key: &[u8], signature_hex: &str) -> Result<()> {
    let verifying_key = parse_ed25519_public_key(public_key)?;
    let signature_bytes =
        hex::decode(signature_hex.trim()).context("failed to decode Ed25519 signature hex")?;
    let signature_len = signature_bytes.len();
    let signature_array: [u8; 64] = signature_bytes.try_into().map_err(|_| {
        anyhow!(
            "invalid Ed25519 signature length: expected 64 bytes, got {}",
            signature_len
        )
    })?;

    verifying_key
        .verify(payload, &Signature::from_bytes(&signature_array))
        .map_err(|_| anyhow!("Ed25519 signature does not match payload"))
}
