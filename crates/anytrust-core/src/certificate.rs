//! Data-availability certificates and committee keysets
//!
//! A certificate proves that the members named by `signers_mask` hold the data
//! behind `data_hash` until `timeout`. The keyset identifies which committee
//! produced it; its hash is embedded in every certificate and posted on-chain.

use crate::crypto::{AggregateSignature, PublicKey};
use crate::hash::{hash, Hash32};
use crate::{AnytrustError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Header flag marking an AnyTrust certificate
pub const ANYTRUST_HEADER_FLAG: u8 = 0x80;

/// Header flag marking a tree-hashed (version ≥ 1) certificate
pub const TREE_HEADER_FLAG: u8 = 0x08;

/// Maximum committee size (one signer-mask bit per member)
pub const MAX_COMMITTEE_SIZE: usize = 64;

/// Certificate version produced by current committees
pub const CURRENT_CERTIFICATE_VERSION: u8 = 1;

/// Signed proof that a quorum of backends hold a data hash until a timeout
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataAvailabilityCertificate {
    /// Hash of the committee keyset that signed
    pub keyset_hash: Hash32,
    /// Hash of the stored payload
    pub data_hash: Hash32,
    /// Expiry, unix seconds
    pub timeout: u64,
    /// OR of the contributing members' masks
    pub signers_mask: u64,
    /// Member signatures in mask order
    pub signature: AggregateSignature,
    /// Certificate format version
    pub version: u8,
}

impl DataAvailabilityCertificate {
    /// Bytes covered by member signatures
    pub fn signable_fields(&self) -> Vec<u8> {
        signable_fields(&self.data_hash, self.timeout, self.version)
    }

    /// Number of members that signed
    pub fn signer_count(&self) -> u32 {
        self.signers_mask.count_ones()
    }

    /// Encode to the sequencer-inbox wire format
    pub fn serialize(&self) -> Vec<u8> {
        let mut flags = ANYTRUST_HEADER_FLAG;
        if self.version != 0 {
            flags |= TREE_HEADER_FLAG;
        }
        let mut out = Vec::with_capacity(1 + 32 + 32 + 8 + 1 + 8 + 1 + 64 * self.signature.len());
        out.push(flags);
        out.extend_from_slice(self.keyset_hash.as_bytes());
        out.extend_from_slice(&self.signable_fields());
        out.extend_from_slice(&self.signers_mask.to_be_bytes());
        out.extend_from_slice(&self.signature.to_bytes());
        out
    }

    /// Decode from the sequencer-inbox wire format
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let header = reader.byte()?;
        if header & ANYTRUST_HEADER_FLAG == 0 {
            return Err(AnytrustError::serialization(
                "tried to deserialize a message that doesn't have the AnyTrust header",
            ));
        }
        let keyset_hash = Hash32::from_slice(reader.take(32)?)?;
        let data_hash = Hash32::from_slice(reader.take(32)?)?;
        let timeout = reader.u64_be()?;
        let version = if header & TREE_HEADER_FLAG != 0 {
            reader.byte()?
        } else {
            0
        };
        let signers_mask = reader.u64_be()?;
        let (signature, _) = AggregateSignature::decode_prefix(reader.rest())?;
        Ok(Self {
            keyset_hash,
            data_hash,
            timeout,
            signers_mask,
            signature,
            version,
        })
    }
}

/// `data_hash ‖ timeout_BE ‖ [version if non-zero]`
pub fn signable_fields(data_hash: &Hash32, timeout: u64, version: u8) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32 + 9);
    buf.extend_from_slice(data_hash.as_bytes());
    buf.extend_from_slice(&timeout.to_be_bytes());
    if version != 0 {
        buf.push(version);
    }
    buf
}

/// Committee membership plus the assumed-honest parameter
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Keyset {
    /// H: upper bound on members that may be dishonest or unavailable
    pub assumed_honest: u64,
    /// Member keys; key `i` belongs to signer-mask bit `i`
    pub pub_keys: Vec<PublicKey>,
}

impl Keyset {
    /// Encode as `H ‖ count ‖ (len_u16 ‖ key)*`
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.pub_keys.len() * 34);
        out.extend_from_slice(&self.assumed_honest.to_be_bytes());
        out.extend_from_slice(&(self.pub_keys.len() as u64).to_be_bytes());
        for key in &self.pub_keys {
            let bytes = key.to_bytes();
            out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
            out.extend_from_slice(&bytes);
        }
        out
    }

    /// Keyset hash embedded in certificates
    pub fn hash(&self) -> Hash32 {
        hash(&self.serialize())
    }

    /// Decode a serialized keyset
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let assumed_honest = reader.u64_be()?;
        let count = reader.u64_be()?;
        if count > MAX_COMMITTEE_SIZE as u64 {
            return Err(AnytrustError::serialization(
                "too many keys in serialized keyset",
            ));
        }
        let mut pub_keys = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = u16::from_be_bytes([reader.byte()?, reader.byte()?]) as usize;
            pub_keys.push(PublicKey::from_bytes(reader.take(len)?)?);
        }
        Ok(Self {
            assumed_honest,
            pub_keys,
        })
    }

    /// Check a certificate signature produced by members in `signers_mask`
    pub fn verify_signature(
        &self,
        signers_mask: u64,
        data: &[u8],
        signature: &AggregateSignature,
    ) -> Result<()> {
        let mut signers = Vec::new();
        let mut non_signers = 0u64;
        for (bit, key) in self.pub_keys.iter().enumerate() {
            if signers_mask & (1u64 << bit) != 0 {
                signers.push(*key);
            } else {
                non_signers += 1;
            }
        }
        if self.pub_keys.len() < MAX_COMMITTEE_SIZE && signers_mask >> self.pub_keys.len() != 0 {
            return Err(AnytrustError::verification(
                "signers mask names members outside the keyset",
            ));
        }
        if non_signers >= self.assumed_honest {
            return Err(AnytrustError::verification("not enough signers"));
        }
        signature.verify(data, &signers)
    }
}

/// How long a backend keeps stored data
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpirationPolicy {
    /// Data is kept forever
    KeepForever,
    /// Data is kept until the archive timeout of the archiving node
    DiscardAfterArchiveTimeout,
    /// Data is kept until the timeout supplied with the store call
    DiscardAfterDataTimeout,
    /// Backends behind an aggregate disagree
    MixedTimeout,
    /// Data is never stored
    DiscardImmediately,
}

impl fmt::Display for ExpirationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::KeepForever => "KeepForever",
            Self::DiscardAfterArchiveTimeout => "DiscardAfterArchiveTimeout",
            Self::DiscardAfterDataTimeout => "DiscardAfterDataTimeout",
            Self::MixedTimeout => "MixedTimeout",
            Self::DiscardImmediately => "DiscardImmediately",
        };
        f.write_str(name)
    }
}

impl FromStr for ExpirationPolicy {
    type Err = AnytrustError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "KeepForever" => Ok(Self::KeepForever),
            "DiscardAfterArchiveTimeout" => Ok(Self::DiscardAfterArchiveTimeout),
            "DiscardAfterDataTimeout" => Ok(Self::DiscardAfterDataTimeout),
            "MixedTimeout" => Ok(Self::MixedTimeout),
            "DiscardImmediately" => Ok(Self::DiscardImmediately),
            other => Err(AnytrustError::serialization(format!(
                "invalid expiration policy: {other}"
            ))),
        }
    }
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| AnytrustError::serialization("unexpected end of input"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u64_be(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(buf))
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }
}
