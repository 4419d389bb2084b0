//! Hashing utilities for identifiers and the audit chain
//!
//! Provides SHA-256 helpers used to derive transaction and emergency
//! action ids and to link audit entries into a tamper-evident chain.

use sha2::{Digest, Sha256};

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Computes SHA-256 hash and returns it as a hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Derive a short, prefixed identifier from arbitrary seed material
///
/// The first 16 bytes of the SHA-256 digest are hex-encoded, so ids are
/// 32 hex characters after the prefix (e.g. `tx-3fa1...`).
pub fn derive_id(prefix: &str, seed: &str) -> String {
    let digest = sha256(seed.as_bytes());
    format!("{}-{}", prefix, hex::encode(&digest[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256() {
        let data = b"hello world";
        let hash = sha256(data);
        assert_eq!(hash.len(), 32);
        assert_eq!(
            sha256_hex(data),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_derive_id_is_deterministic() {
        let a = derive_id("tx", "wallet:1:alice");
        let b = derive_id("tx", "wallet:1:alice");
        let c = derive_id("tx", "wallet:2:alice");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("tx-"));
        assert_eq!(a.len(), 3 + 32);
    }
}
