//! Hashing helpers
//!
//! SHA-256 is used for identifier derivation and the audit hash chain.
//! Signature verification belongs to the upstream identity layer.

pub mod hash;

pub use hash::{derive_id, sha256, sha256_hex};
