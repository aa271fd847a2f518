//! Content hashing
//!
//! Hashing is pure and synchronous, so it lives outside the effect traits.
//! One algorithm is used everywhere a digest is compared: data hashes in
//! certificates, keyset hashes, the signed-payload digests of the streaming
//! protocol and the replay-cache keys of the receiver.
//!
//! Current algorithm: **SHA-256** (32-byte output)

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// 32-byte digest
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    /// Digest length in bytes
    pub const LEN: usize = 32;

    /// Borrow the raw digest
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Build from a slice, requiring exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> crate::Result<Self> {
        let array: [u8; 32] = bytes.try_into().map_err(|_| {
            crate::AnytrustError::serialization(format!(
                "expected a 32-byte hash, got {} bytes",
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Lowercase hex rendering with `0x` prefix
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<[u8; 32]> for Hash32 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Hash arbitrary bytes
pub fn hash(data: &[u8]) -> Hash32 {
    let mut h = hasher();
    h.update(data);
    h.finalize()
}

/// Incremental hasher for multi-part input
pub fn hasher() -> Hasher {
    Hasher(Sha256::new())
}

/// Incremental hasher
#[derive(Clone)]
pub struct Hasher(Sha256);

impl Hasher {
    /// Feed more bytes
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Consume the hasher and return the digest
    pub fn finalize(self) -> Hash32 {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.0.finalize());
        Hash32(out)
    }
}
