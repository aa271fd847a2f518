//! Deterministic test keys

use anytrust_core::{hash, SigningKey};

/// Key derived from `seed`; the same seed always gives the same key
pub fn signing_key(seed: u64) -> SigningKey {
    let digest = hash(format!("anytrust-test-key-{seed}").as_bytes());
    SigningKey::from_bytes(digest.as_bytes())
}

/// `n` distinct keys, seeded `0..n`
pub fn committee_keys(n: usize) -> Vec<SigningKey> {
    (0..n as u64).map(signing_key).collect()
}
