mod digest;
mod ed25519;

pub use digest::{decode_sha256_hex, salted_sha256, Sha256Digest, SHA256_DIGEST_LEN};
pub use ed25519::{parse_ed25519_public_key, verify_ed25519_signature, ED25519_PUBLIC_KEY_LEN};
