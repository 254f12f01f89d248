//! Stable identifier derivation.
//!
//! Row ids must be identical across processes and runs, so they are derived
//! from a SHA-256 digest of the identifying parts rather than from an
//! in-process hasher.

use sha2::{Digest, Sha256};

/// Length of a derived id in hex characters.
const ID_LEN: usize = 16;

/// Derive a stable id from the given parts, joined with `:`.
pub fn stable_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parts.join(":").as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..ID_LEN].to_string()
}
