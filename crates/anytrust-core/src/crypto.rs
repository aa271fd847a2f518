//! Committee signing keys and signatures
//!
//! Committee members sign with Ed25519. Ed25519 signatures do not aggregate
//! algebraically, so an [`AggregateSignature`] is the list of member
//! signatures ordered by ascending signer-mask bit. Verification walks the
//! set bits of a signers mask and checks each signature against the key
//! registered for that bit, which gives the same accept/reject behaviour as
//! mask-indexed BLS aggregation.

use crate::{AnytrustError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signer, Verifier};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Ed25519 signature length in bytes
pub const SIGNATURE_LEN: usize = 64;

/// Ed25519 public key length in bytes
pub const PUBLIC_KEY_LEN: usize = 32;

/// Private signing key of one committee member or payload signer
#[derive(Clone)]
pub struct SigningKey(ed25519_dalek::SigningKey);

impl SigningKey {
    /// Build from a 32-byte secret
    pub fn from_bytes(secret: &[u8; 32]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(secret))
    }

    /// Generate a fresh key from the OS RNG
    pub fn generate() -> Self {
        Self(ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng))
    }

    /// Matching public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.0.sign(message).to_bytes())
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SigningKey").field(&self.public_key()).finish()
    }
}

/// Public verification key
#[derive(Clone, Copy)]
pub struct PublicKey(ed25519_dalek::VerifyingKey);

impl PublicKey {
    /// Parse raw key bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let array: [u8; PUBLIC_KEY_LEN] = bytes.try_into().map_err(|_| {
            AnytrustError::crypto(format!(
                "public key must be {PUBLIC_KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(ed25519_dalek::VerifyingKey::from_bytes(&array)?))
    }

    /// Parse the base64 form used in configuration files
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| AnytrustError::crypto(format!("invalid base64 public key: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Raw key bytes
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.0.to_bytes()
    }

    /// Base64 rendering
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    /// Verify a signature over `message`
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        self.0
            .verify(message, &sig)
            .map_err(|e| AnytrustError::verification(format!("bad signature: {e}")))
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes() == other.0.as_bytes()
    }
}

impl Eq for PublicKey {}

impl Hash for PublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.as_bytes().hash(state);
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.0.as_bytes()[..8]))
    }
}

/// Ed25519 signature
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; SIGNATURE_LEN]);

impl Signature {
    /// Parse from a 64-byte slice
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; SIGNATURE_LEN] = bytes.try_into().map_err(|_| {
            AnytrustError::crypto(format!(
                "signature must be {SIGNATURE_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Raw bytes
    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}..)", hex::encode(&self.0[..8]))
    }
}

/// Mask-ordered collection of member signatures
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AggregateSignature {
    signatures: Vec<Signature>,
}

impl AggregateSignature {
    /// Maximum number of member signatures (one per mask bit)
    pub const MAX_SIGNATURES: usize = 64;

    /// Signature produced by a single member
    pub fn single(signature: Signature) -> Self {
        Self {
            signatures: vec![signature],
        }
    }

    /// Build from signatures already ordered by ascending mask bit
    pub fn from_ordered(signatures: Vec<Signature>) -> Result<Self> {
        if signatures.len() > Self::MAX_SIGNATURES {
            return Err(AnytrustError::crypto(format!(
                "aggregate of {} signatures exceeds the 64-member limit",
                signatures.len()
            )));
        }
        Ok(Self { signatures })
    }

    /// Member signatures in mask order
    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    /// Number of member signatures
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    /// True if no member signed
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// The only signature, for certificates returned by a single backend
    pub fn as_single(&self) -> Result<&Signature> {
        match self.signatures.as_slice() {
            [sig] => Ok(sig),
            other => Err(AnytrustError::verification(format!(
                "expected a single-signer signature, got {} signatures",
                other.len()
            ))),
        }
    }

    /// Verify against keys listed in the same mask order
    pub fn verify(&self, message: &[u8], keys: &[PublicKey]) -> Result<()> {
        if keys.len() != self.signatures.len() {
            return Err(AnytrustError::verification(format!(
                "aggregate carries {} signatures for {} signers",
                self.signatures.len(),
                keys.len()
            )));
        }
        for (key, sig) in keys.iter().zip(&self.signatures) {
            key.verify(message, sig)?;
        }
        Ok(())
    }

    /// Encode as `count u8 ‖ count × 64 bytes`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.signatures.len() * SIGNATURE_LEN);
        out.push(self.signatures.len() as u8);
        for sig in &self.signatures {
            out.extend_from_slice(&sig.0);
        }
        out
    }

    /// Decode from the front of `bytes`, returning the value and bytes consumed
    pub fn decode_prefix(bytes: &[u8]) -> Result<(Self, usize)> {
        let (&count, rest) = bytes
            .split_first()
            .ok_or_else(|| AnytrustError::serialization("missing aggregate signature count"))?;
        let count = count as usize;
        if count > Self::MAX_SIGNATURES {
            return Err(AnytrustError::serialization(format!(
                "aggregate signature count {count} exceeds 64"
            )));
        }
        let needed = count * SIGNATURE_LEN;
        if rest.len() < needed {
            return Err(AnytrustError::serialization(
                "truncated aggregate signature",
            ));
        }
        let signatures = rest[..needed]
            .chunks_exact(SIGNATURE_LEN)
            .map(Signature::from_slice)
            .collect::<Result<Vec<_>>>()?;
        Ok((Self { signatures }, 1 + needed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    #[test]
    fn test_sign_verify() {
        let sk = key(1);
        let sig = sk.sign(b"payload");
        assert!(sk.public_key().verify(b"payload", &sig).is_ok());
        assert!(sk.public_key().verify(b"tampered", &sig).is_err());
    }

    #[test]
    fn test_public_key_base64() {
        let pk = key(2).public_key();
        let parsed = PublicKey::from_base64(&pk.to_base64()).unwrap();
        assert_eq!(pk, parsed);
        assert!(PublicKey::from_base64("not base64!").is_err());
        assert!(PublicKey::from_base64("AAAA").is_err());
    }

    #[test]
    fn test_aggregate_verify_requires_matching_keys() {
        let (a, b) = (key(3), key(4));
        let agg =
            AggregateSignature::from_ordered(vec![a.sign(b"m"), b.sign(b"m")]).unwrap();
        assert!(agg.verify(b"m", &[a.public_key(), b.public_key()]).is_ok());
        // Order matters: keys must follow mask order
        assert!(agg.verify(b"m", &[b.public_key(), a.public_key()]).is_err());
        assert!(agg.verify(b"m", &[a.public_key()]).is_err());
    }

    #[test]
    fn test_aggregate_encoding() {
        let agg = AggregateSignature::from_ordered(vec![key(5).sign(b"x"), key(6).sign(b"x")])
            .unwrap();
        let mut bytes = agg.to_bytes();
        bytes.push(0xff);
        let (decoded, used) = AggregateSignature::decode_prefix(&bytes).unwrap();
        assert_eq!(decoded, agg);
        assert_eq!(used, bytes.len() - 1);
        assert!(AggregateSignature::decode_prefix(&bytes[..10]).is_err());
    }

    #[test]
    fn test_as_single() {
        let sig = key(7).sign(b"y");
        assert_eq!(AggregateSignature::single(sig).as_single().unwrap(), &sig);
        assert!(AggregateSignature::default().as_single().is_err());
    }
}
